//! Deal loading: CSV ingestion with Polars, lender-list parsing and the
//! explode + reference join that produces one line per lender per deal

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::path::Path;

use anyhow::Context;
use polars::prelude::*;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::SegmentationError;

pub const DEAL_NAME: &str = "Deal name";
pub const DOMINANT_SECTOR: &str = "dominantSector";
pub const DOMINANT_COUNTRY: &str = "dominantCountry";
pub const DEBT_SIZE: &str = "summary.debtsizeEUR";
pub const TRANSACTION_TYPE: &str = "transactionType";
pub const LENDERS_FUNDING: &str = "lendersFundingValues";

pub const LENDER_NAME: &str = "Name";
pub const LENDER_KIND: &str = "Bank / Insto";
pub const LENDER_CATEGORY: &str = "Categories";

/// Bank or institutional investor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LenderKind {
    Bank,
    Insto,
}

impl LenderKind {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "Bank" => Some(LenderKind::Bank),
            "Insto" => Some(LenderKind::Insto),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LenderKind::Bank => "Bank",
            LenderKind::Insto => "Insto",
        }
    }
}

impl fmt::Display for LenderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of a deal's embedded lender list
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LenderFunding {
    pub name: String,
    #[serde(rename = "valueEUR", default)]
    pub value_eur: Option<f64>,
}

/// A financing transaction as read from the deals table
#[derive(Debug, Clone, PartialEq)]
pub struct Deal {
    pub name: String,
    pub sector: String,
    pub country: String,
    /// Total debt size, nulls read as 0
    pub debt_size: f64,
    pub transaction_type: String,
    pub lenders: Vec<LenderFunding>,
}

/// Row of the lender reference table
#[derive(Debug, Clone, PartialEq)]
pub struct LenderProfile {
    pub name: String,
    pub kind: LenderKind,
    pub category: String,
}

/// One lender's participation in one deal, with the deal attributes carried along
#[derive(Debug, Clone, PartialEq)]
pub struct LenderLine {
    pub deal: String,
    pub sector: String,
    pub country: String,
    pub debt_size: f64,
    pub transaction_type: String,
    pub lender: String,
    pub funded: Option<f64>,
    pub kind: LenderKind,
    pub category: String,
}

impl LenderLine {
    /// Funded amount with an absent value read as zero
    pub fn amount(&self) -> f64 {
        self.funded.unwrap_or(0.0)
    }

    pub fn is_funded(&self) -> bool {
        self.amount() > 0.0
    }
}

/// Counters gathered while exploding and joining the deals table
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadDiagnostics {
    pub deals: usize,
    pub lender_entries: usize,
    pub matched_lines: usize,
    pub unmatched_entries: usize,
    /// Lender names present in deals but absent from the reference table
    pub unmatched_lenders: BTreeSet<String>,
    pub duplicate_references: usize,
}

/// Raw tables plus the normalized lender-line table
#[derive(Debug, Clone)]
pub struct DealBook {
    pub deals: Vec<Deal>,
    pub lenders: Vec<LenderProfile>,
    pub lines: Vec<LenderLine>,
    pub diagnostics: LoadDiagnostics,
}

impl DealBook {
    /// Explode each deal's lender list and inner-join it against the reference table
    pub fn from_tables(deals: Vec<Deal>, lenders: Vec<LenderProfile>) -> Self {
        let mut diagnostics = LoadDiagnostics {
            deals: deals.len(),
            ..Default::default()
        };

        let mut reference: HashMap<&str, &LenderProfile> = HashMap::with_capacity(lenders.len());
        for profile in &lenders {
            if reference.contains_key(profile.name.as_str()) {
                diagnostics.duplicate_references += 1;
                warn!(lender = %profile.name, "Duplicate lender reference row ignored");
                continue;
            }
            reference.insert(profile.name.as_str(), profile);
        }

        let mut lines = Vec::new();
        for deal in &deals {
            for funding in &deal.lenders {
                diagnostics.lender_entries += 1;
                match reference.get(funding.name.as_str()) {
                    Some(profile) => lines.push(LenderLine {
                        deal: deal.name.clone(),
                        sector: deal.sector.clone(),
                        country: deal.country.clone(),
                        debt_size: deal.debt_size,
                        transaction_type: deal.transaction_type.clone(),
                        lender: funding.name.clone(),
                        funded: funding.value_eur,
                        kind: profile.kind,
                        category: profile.category.clone(),
                    }),
                    None => {
                        diagnostics.unmatched_entries += 1;
                        diagnostics.unmatched_lenders.insert(funding.name.clone());
                    }
                }
            }
        }
        diagnostics.matched_lines = lines.len();

        if diagnostics.unmatched_entries > 0 {
            warn!(
                entries = diagnostics.unmatched_entries,
                lenders = diagnostics.unmatched_lenders.len(),
                "Lender entries dropped: lender not found in reference table"
            );
            debug!(names = ?diagnostics.unmatched_lenders, "Unmatched lender names");
        }

        Self {
            deals,
            lenders,
            lines,
            diagnostics,
        }
    }

    /// Sorted distinct categories of institutional lenders
    pub fn insto_categories(&self) -> BTreeSet<String> {
        self.lenders
            .iter()
            .filter(|l| l.kind == LenderKind::Insto)
            .map(|l| l.category.clone())
            .collect()
    }

    /// Sorted distinct names of institutional lenders that appear on a deal
    pub fn instos(&self) -> BTreeSet<String> {
        self.lines
            .iter()
            .filter(|l| l.kind == LenderKind::Insto)
            .map(|l| l.lender.clone())
            .collect()
    }
}

/// Parse one serialized lender list (a JSON array of `{name, valueEUR}`)
pub fn parse_lender_list(deal: &str, raw: Option<&str>) -> crate::Result<Vec<LenderFunding>> {
    let raw = match raw.map(str::trim) {
        None | Some("") => return Ok(Vec::new()),
        Some(raw) => raw,
    };

    serde_json::from_str::<Vec<LenderFunding>>(raw).map_err(|e| {
        SegmentationError::MalformedLenderList {
            deal: deal.to_string(),
            reason: e.to_string(),
        }
        .into()
    })
}

/// Load the deals table. Any malformed lender list fails the whole load.
pub fn load_deals(file_path: impl AsRef<Path>) -> crate::Result<Vec<Deal>> {
    let path = file_path.as_ref();
    let df = LazyCsvReader::new(path)
        .with_has_header(true)
        .finish()?
        .select([
            col(DEAL_NAME).cast(DataType::String),
            col(DOMINANT_SECTOR).cast(DataType::String),
            col(DOMINANT_COUNTRY).cast(DataType::String),
            col(DEBT_SIZE).cast(DataType::Float64),
            col(TRANSACTION_TYPE).cast(DataType::String),
            col(LENDERS_FUNDING).cast(DataType::String),
        ])
        .collect()
        .with_context(|| format!("Failed to read deals table {}", path.display()))?;

    let names = df.column(DEAL_NAME)?.str()?;
    let sectors = df.column(DOMINANT_SECTOR)?.str()?;
    let countries = df.column(DOMINANT_COUNTRY)?.str()?;
    let debt_sizes = df.column(DEBT_SIZE)?.f64()?;
    let transaction_types = df.column(TRANSACTION_TYPE)?.str()?;
    let funding = df.column(LENDERS_FUNDING)?.str()?;

    let mut deals = Vec::with_capacity(df.height());
    for row in 0..df.height() {
        let name = names
            .get(row)
            .with_context(|| format!("Deal name missing on row {}", row + 1))?
            .to_string();
        let lenders = parse_lender_list(&name, funding.get(row))?;

        deals.push(Deal {
            sector: sectors.get(row).unwrap_or_default().to_string(),
            country: countries.get(row).unwrap_or_default().to_string(),
            debt_size: debt_sizes.get(row).unwrap_or(0.0),
            transaction_type: transaction_types.get(row).unwrap_or_default().to_string(),
            lenders,
            name,
        });
    }

    debug!(deals = deals.len(), path = %path.display(), "Deals table loaded");
    Ok(deals)
}

/// Load the lender classification reference table
pub fn load_lender_reference(file_path: impl AsRef<Path>) -> crate::Result<Vec<LenderProfile>> {
    let path = file_path.as_ref();
    let df = LazyCsvReader::new(path)
        .with_has_header(true)
        .finish()?
        .select([
            col(LENDER_NAME).cast(DataType::String),
            col(LENDER_KIND).cast(DataType::String),
            col(LENDER_CATEGORY).cast(DataType::String),
        ])
        .collect()
        .with_context(|| format!("Failed to read lender reference table {}", path.display()))?;

    let names = df.column(LENDER_NAME)?.str()?;
    let kinds = df.column(LENDER_KIND)?.str()?;
    let categories = df.column(LENDER_CATEGORY)?.str()?;

    let mut lenders = Vec::with_capacity(df.height());
    for row in 0..df.height() {
        let Some(name) = names.get(row) else {
            warn!(row = row + 1, "Lender reference row without a name skipped");
            continue;
        };
        let raw_kind = kinds.get(row).unwrap_or_default();
        let kind = LenderKind::parse(raw_kind).ok_or_else(|| {
            SegmentationError::InvalidLenderReference {
                lender: name.to_string(),
                reason: format!("unknown lender kind '{}'", raw_kind),
            }
        })?;
        let category = categories.get(row).ok_or_else(|| {
            SegmentationError::InvalidLenderReference {
                lender: name.to_string(),
                reason: "missing category".to_string(),
            }
        })?;

        lenders.push(LenderProfile {
            name: name.to_string(),
            kind,
            category: category.to_string(),
        });
    }

    Ok(lenders)
}

/// Load both tables and build the lender-line table
pub fn load_deal_book(
    deals_path: impl AsRef<Path>,
    lenders_path: impl AsRef<Path>,
) -> crate::Result<DealBook> {
    let deals = load_deals(deals_path)?;
    let lenders = load_lender_reference(lenders_path)?;
    let book = DealBook::from_tables(deals, lenders);

    info!(
        deals = book.diagnostics.deals,
        lender_entries = book.diagnostics.lender_entries,
        lines = book.diagnostics.matched_lines,
        "Deal book loaded"
    );
    Ok(book)
}
