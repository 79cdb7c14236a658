//! Per-deal funding mix: bank only, insto only or mixed

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use tracing::{debug, warn};

use crate::data::{DealBook, LenderKind, LenderLine};

/// Funding mix of a deal, derived from the positive funded amounts of its lenders
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DealCategory {
    BankOnly,
    InstoOnly,
    Mixed,
    /// No positive funding from either kind
    Unclassified,
}

impl DealCategory {
    pub const ALL: [DealCategory; 4] = [
        DealCategory::BankOnly,
        DealCategory::InstoOnly,
        DealCategory::Mixed,
        DealCategory::Unclassified,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            DealCategory::BankOnly => "Bank only",
            DealCategory::InstoOnly => "Insto only",
            DealCategory::Mixed => "Mixed",
            DealCategory::Unclassified => "Unclassified",
        }
    }

    /// Deals that feed investor segmentation
    pub fn has_insto_funding(&self) -> bool {
        matches!(self, DealCategory::InstoOnly | DealCategory::Mixed)
    }
}

impl fmt::Display for DealCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Classify a deal from its summed bank and insto funding
pub fn classify(bank_sum: f64, insto_sum: f64) -> DealCategory {
    match (bank_sum > 0.0, insto_sum > 0.0) {
        (true, true) => DealCategory::Mixed,
        (false, true) => DealCategory::InstoOnly,
        (true, false) => DealCategory::BankOnly,
        (false, false) => DealCategory::Unclassified,
    }
}

/// A lender line tagged with its deal's category
#[derive(Debug, Clone, PartialEq)]
pub struct CategorizedLine {
    pub line: LenderLine,
    pub category: DealCategory,
}

/// Working set for every downstream view
#[derive(Debug, Clone, Default)]
pub struct CategorizedBook {
    pub lines: Vec<CategorizedLine>,
    /// Category of every deal that has at least one lender line
    pub deal_categories: BTreeMap<String, DealCategory>,
    /// Lines dropped because their deal has a non-positive debt size
    pub dropped_lines: usize,
}

impl CategorizedBook {
    /// Number of deals per category among the surviving lines
    pub fn deal_counts(&self) -> BTreeMap<DealCategory, usize> {
        let mut seen: BTreeMap<&str, DealCategory> = BTreeMap::new();
        for line in &self.lines {
            seen.entry(line.line.deal.as_str()).or_insert(line.category);
        }

        let mut counts = BTreeMap::new();
        for category in seen.values() {
            *counts.entry(*category).or_insert(0) += 1;
        }
        counts
    }
}

/// Sum of strictly positive funding per deal and lender kind
fn funding_by_deal(lines: &[LenderLine]) -> HashMap<&str, (f64, f64)> {
    let mut sums: HashMap<&str, (f64, f64)> = HashMap::new();
    for line in lines.iter().filter(|l| l.is_funded()) {
        let entry = sums.entry(line.deal.as_str()).or_insert((0.0, 0.0));
        match line.kind {
            LenderKind::Bank => entry.0 += line.amount(),
            LenderKind::Insto => entry.1 += line.amount(),
        }
    }
    sums
}

/// Attach a deal category to every lender line and drop deals without a positive debt size
pub fn categorize(book: &DealBook) -> CategorizedBook {
    let sums = funding_by_deal(&book.lines);

    let mut deal_categories = BTreeMap::new();
    for line in &book.lines {
        deal_categories.entry(line.deal.clone()).or_insert_with(|| {
            let (bank, insto) = sums.get(line.deal.as_str()).copied().unwrap_or((0.0, 0.0));
            classify(bank, insto)
        });
    }

    let mut dropped_lines = 0;
    let mut lines = Vec::with_capacity(book.lines.len());
    for line in &book.lines {
        if line.debt_size <= 0.0 {
            dropped_lines += 1;
            continue;
        }
        lines.push(CategorizedLine {
            category: deal_categories[&line.deal],
            line: line.clone(),
        });
    }

    let unclassified = deal_categories
        .values()
        .filter(|c| **c == DealCategory::Unclassified)
        .count();
    if unclassified > 0 {
        warn!(deals = unclassified, "Deals without positive funding left unclassified");
    }
    debug!(
        lines = lines.len(),
        dropped = dropped_lines,
        "Lender lines categorized"
    );

    CategorizedBook {
        lines,
        deal_categories,
        dropped_lines,
    }
}
