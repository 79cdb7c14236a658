//! Behavioral feature tables for institutional investors
//!
//! Every selected dimension is built as its own named matrix (investors as
//! rows, one share column per dimension value) and the matrices are merged by
//! investor key into a single wide [`FeatureTable`].

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;

use ndarray::Array2;
use tracing::debug;

use crate::category::CategorizedBook;
use crate::data::{LenderKind, LenderLine};
use crate::error::SegmentationError;

/// Behavioral dimension an investor can be described by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Dimension {
    Sector,
    TicketSize,
    DealStage,
    Country,
}

impl Dimension {
    pub const ALL: [Dimension; 4] = [
        Dimension::Sector,
        Dimension::TicketSize,
        Dimension::DealStage,
        Dimension::Country,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Dimension::Sector => "sector",
            Dimension::TicketSize => "ticket",
            Dimension::DealStage => "stage",
            Dimension::Country => "country",
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Dimension {
    type Err = SegmentationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "sector" => Ok(Dimension::Sector),
            "ticket" | "ticket-size" | "ticket size" => Ok(Dimension::TicketSize),
            "stage" | "deal-stage" | "deal stage" => Ok(Dimension::DealStage),
            "country" => Ok(Dimension::Country),
            other => Err(SegmentationError::InvalidParameter {
                field: "dimensions".to_string(),
                reason: format!("unknown dimension '{}'", other),
            }),
        }
    }
}

/// Ticket size bucket, upper bounds inclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TicketBucket {
    UpTo60,
    UpTo100,
    Above100,
}

impl TicketBucket {
    pub const ALL: [TicketBucket; 3] = [TicketBucket::UpTo60, TicketBucket::UpTo100, TicketBucket::Above100];

    pub fn classify(amount: f64) -> Self {
        if amount <= 60.0 {
            TicketBucket::UpTo60
        } else if amount <= 100.0 {
            TicketBucket::UpTo100
        } else {
            TicketBucket::Above100
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            TicketBucket::UpTo60 => "≤60",
            TicketBucket::UpTo100 => "≤100",
            TicketBucket::Above100 => ">100",
        }
    }
}

/// Transaction types that count towards the deal-stage mix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DealStage {
    Greenfield,
    AdditionalFinancing,
    Refinancing,
}

impl DealStage {
    pub const ALL: [DealStage; 3] = [
        DealStage::Greenfield,
        DealStage::AdditionalFinancing,
        DealStage::Refinancing,
    ];

    /// Unlisted transaction types map to `None`
    pub fn classify(transaction_type: &str) -> Option<Self> {
        match transaction_type.trim().to_lowercase().as_str() {
            "greenfield" => Some(DealStage::Greenfield),
            "additional financing" => Some(DealStage::AdditionalFinancing),
            "refinancing" => Some(DealStage::Refinancing),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            DealStage::Greenfield => "Greenfield",
            DealStage::AdditionalFinancing => "Additional Financing",
            DealStage::Refinancing => "Refinancing",
        }
    }
}

/// Inputs of the feature builder
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentationParams {
    /// Investor categories to keep (e.g. "Pension Fund")
    pub categories: BTreeSet<String>,
    /// Dimensions in selection order
    pub dimensions: Vec<Dimension>,
    /// Minimum number of qualifying lines per investor
    pub min_deals: usize,
}

pub const DEFAULT_MIN_DEALS: usize = 2;

impl SegmentationParams {
    /// All dimensions with the default deal threshold
    pub fn new(categories: BTreeSet<String>) -> Self {
        Self {
            categories,
            dimensions: Dimension::ALL.to_vec(),
            min_deals: DEFAULT_MIN_DEALS,
        }
    }

    pub fn with_dimensions(mut self, dimensions: Vec<Dimension>) -> Self {
        self.dimensions = dimensions;
        self
    }

    pub fn with_min_deals(mut self, min_deals: usize) -> Self {
        self.min_deals = min_deals;
        self
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.dimensions.is_empty() {
            return Err(SegmentationError::InvalidParameter {
                field: "dimensions".to_string(),
                reason: "at least one dimension must be selected".to_string(),
            }
            .into());
        }
        let distinct: BTreeSet<_> = self.dimensions.iter().collect();
        if distinct.len() != self.dimensions.len() {
            return Err(SegmentationError::InvalidParameter {
                field: "dimensions".to_string(),
                reason: "dimensions must not repeat".to_string(),
            }
            .into());
        }
        if self.min_deals == 0 {
            return Err(SegmentationError::InvalidParameter {
                field: "min_deals".to_string(),
                reason: "must be a positive integer".to_string(),
            }
            .into());
        }
        Ok(())
    }

    pub fn key(&self) -> FeatureKey {
        FeatureKey {
            categories: self.categories.iter().cloned().collect(),
            dimensions: self.dimensions.clone(),
            min_deals: self.min_deals,
        }
    }
}

/// Memoization key for a feature table
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FeatureKey {
    pub categories: Vec<String>,
    pub dimensions: Vec<Dimension>,
    pub min_deals: usize,
}

/// Share matrix for a single dimension
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMatrix {
    pub dimension: Dimension,
    pub investors: Vec<String>,
    /// Column labels, `<dimension>:<value>`
    pub columns: Vec<String>,
    /// (n_investors, n_columns), each row sums to 1 or is all zeros
    pub values: Array2<f64>,
}

/// Concatenated feature vectors, one row per qualifying investor
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureTable {
    pub investors: Vec<String>,
    pub columns: Vec<String>,
    pub values: Array2<f64>,
    /// Per-dimension matrices in selection order
    pub blocks: Vec<FeatureMatrix>,
}

impl FeatureTable {
    pub fn len(&self) -> usize {
        self.investors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.investors.is_empty()
    }

    pub fn n_features(&self) -> usize {
        self.columns.len()
    }

    /// Merge dimension matrices column-wise, aligning rows by investor name
    pub fn merge(blocks: Vec<FeatureMatrix>) -> Self {
        let investors: Vec<String> = blocks
            .iter()
            .flat_map(|b| b.investors.iter().cloned())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let row_of: HashMap<&str, usize> = investors
            .iter()
            .enumerate()
            .map(|(i, name)| (name.as_str(), i))
            .collect();

        let n_features: usize = blocks.iter().map(|b| b.columns.len()).sum();
        let mut values = Array2::<f64>::zeros((investors.len(), n_features));
        let mut columns = Vec::with_capacity(n_features);

        let mut offset = 0;
        for block in &blocks {
            for (src_row, investor) in block.investors.iter().enumerate() {
                let dst_row = row_of[investor.as_str()];
                for col in 0..block.columns.len() {
                    values[[dst_row, offset + col]] = block.values[[src_row, col]];
                }
            }
            columns.extend(block.columns.iter().cloned());
            offset += block.columns.len();
        }

        Self {
            investors,
            columns,
            values,
            blocks,
        }
    }
}

/// Funded insto lines on insto-only or mixed deals, restricted to the selected
/// categories and to investors meeting the deal threshold
pub fn qualifying_lines<'a>(book: &'a CategorizedBook, params: &SegmentationParams) -> Vec<&'a LenderLine> {
    let candidates: Vec<&LenderLine> = book
        .lines
        .iter()
        .filter(|l| {
            l.line.kind == LenderKind::Insto
                && l.category.has_insto_funding()
                && l.line.is_funded()
                && params.categories.contains(&l.line.category)
        })
        .map(|l| &l.line)
        .collect();

    let mut deal_counts: HashMap<&str, usize> = HashMap::new();
    for line in &candidates {
        *deal_counts.entry(line.lender.as_str()).or_insert(0) += 1;
    }

    candidates
        .into_iter()
        .filter(|l| deal_counts[l.lender.as_str()] >= params.min_deals)
        .collect()
}

/// Weighted pivot normalized so each investor row sums to 1 (or stays all zero)
fn share_matrix<K, W>(
    dimension: Dimension,
    investors: &[String],
    lines: &[&LenderLine],
    levels: Vec<String>,
    key: K,
    weight: W,
) -> FeatureMatrix
where
    K: Fn(&LenderLine) -> Option<String>,
    W: Fn(&LenderLine) -> f64,
{
    let row_of: HashMap<&str, usize> = investors
        .iter()
        .enumerate()
        .map(|(i, name)| (name.as_str(), i))
        .collect();
    let col_of: HashMap<&str, usize> = levels
        .iter()
        .enumerate()
        .map(|(i, level)| (level.as_str(), i))
        .collect();

    let mut values = Array2::<f64>::zeros((investors.len(), levels.len()));
    for line in lines {
        let Some(level) = key(*line) else { continue };
        let (Some(&row), Some(&col)) = (row_of.get(line.lender.as_str()), col_of.get(level.as_str())) else {
            continue;
        };
        values[[row, col]] += weight(*line);
    }

    for mut row in values.rows_mut() {
        let total: f64 = row.sum();
        if total > 0.0 {
            row.mapv_inplace(|v| v / total);
        }
    }

    FeatureMatrix {
        dimension,
        investors: investors.to_vec(),
        columns: levels
            .iter()
            .map(|level| format!("{}:{}", dimension.label(), level))
            .collect(),
        values,
    }
}

fn observed_levels<F>(lines: &[&LenderLine], value: F) -> Vec<String>
where
    F: Fn(&LenderLine) -> &str,
{
    lines
        .iter()
        .map(|l| value(*l).to_string())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Build the share matrix of one dimension over the given investors
pub fn build_dimension(dimension: Dimension, investors: &[String], lines: &[&LenderLine]) -> FeatureMatrix {
    match dimension {
        Dimension::Sector => share_matrix(
            dimension,
            investors,
            lines,
            observed_levels(lines, |l| l.sector.as_str()),
            |l| Some(l.sector.clone()),
            |_| 1.0,
        ),
        Dimension::TicketSize => share_matrix(
            dimension,
            investors,
            lines,
            TicketBucket::ALL.iter().map(|b| b.label().to_string()).collect(),
            |l| Some(TicketBucket::classify(l.amount()).label().to_string()),
            |_| 1.0,
        ),
        Dimension::DealStage => share_matrix(
            dimension,
            investors,
            lines,
            DealStage::ALL.iter().map(|s| s.label().to_string()).collect(),
            |l| DealStage::classify(&l.transaction_type).map(|s| s.label().to_string()),
            |l| l.amount(),
        ),
        Dimension::Country => share_matrix(
            dimension,
            investors,
            lines,
            observed_levels(lines, |l| l.country.as_str()),
            |l| Some(l.country.clone()),
            |l| l.amount(),
        ),
    }
}

/// Build the concatenated feature table for the given parameters
pub fn build_feature_table(book: &CategorizedBook, params: &SegmentationParams) -> crate::Result<FeatureTable> {
    params.validate()?;

    let lines = qualifying_lines(book, params);
    let investors: Vec<String> = lines
        .iter()
        .map(|l| l.lender.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let blocks = params
        .dimensions
        .iter()
        .map(|&dimension| build_dimension(dimension, &investors, &lines))
        .collect();
    let table = FeatureTable::merge(blocks);

    debug!(
        investors = table.len(),
        features = table.n_features(),
        lines = lines.len(),
        "Feature table built"
    );
    Ok(table)
}

/// Per-investor count of qualifying lines, for display next to the features
pub fn investor_deal_counts(book: &CategorizedBook, params: &SegmentationParams) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for line in qualifying_lines(book, params) {
        *counts.entry(line.lender.clone()).or_insert(0) += 1;
    }
    counts
}
