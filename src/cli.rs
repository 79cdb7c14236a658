//! Command-line interface definitions and argument parsing

use std::collections::BTreeSet;
use std::path::PathBuf;

use clap::Parser;

use crate::features::{Dimension, SegmentationParams, DEFAULT_MIN_DEALS};
use crate::model::{ClusterParams, DEFAULT_CLUSTERS, DEFAULT_MAX_ITERS, DEFAULT_SEED, DEFAULT_TOLERANCE};

/// Segment institutional investors in project-finance deals using K-Means
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Deals CSV with an embedded JSON lender list per deal
    #[arg(short, long, default_value = "deals.csv")]
    pub deals: PathBuf,

    /// Lender reference CSV (Name, Bank / Insto, Categories)
    #[arg(short, long, default_value = "lenders.csv")]
    pub lenders: PathBuf,

    /// Investor categories to segment, comma-separated (default: every insto category)
    /// Example: --categories "Asset Manager,Pension Fund"
    #[arg(long)]
    pub categories: Option<String>,

    /// Feature dimensions, comma-separated: sector, ticket, stage, country
    #[arg(long, default_value = "sector,ticket,stage,country")]
    pub dimensions: String,

    /// Minimum number of qualifying deals per investor
    #[arg(long, default_value_t = DEFAULT_MIN_DEALS)]
    pub min_deals: usize,

    /// Number of clusters for K-Means (2-12)
    #[arg(short = 'k', long, default_value_t = DEFAULT_CLUSTERS)]
    pub clusters: usize,

    /// Maximum iterations for K-Means algorithm
    #[arg(long, default_value_t = DEFAULT_MAX_ITERS)]
    pub max_iters: u64,

    /// Tolerance for K-Means convergence
    #[arg(long, default_value_t = DEFAULT_TOLERANCE)]
    pub tolerance: f64,

    /// Random seed for centroid initialization
    #[arg(long, default_value_t = DEFAULT_SEED)]
    pub seed: u64,

    /// Output path for the cluster assignment CSV
    #[arg(short, long, default_value = "cluster_assignments.csv")]
    pub output: PathBuf,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

impl Args {
    /// Parse the dimension list, keeping the given order
    pub fn parse_dimensions(&self) -> crate::Result<Vec<Dimension>> {
        self.dimensions
            .split(',')
            .filter(|part| !part.trim().is_empty())
            .map(|part| part.parse::<Dimension>().map_err(anyhow::Error::from))
            .collect()
    }

    /// Explicit category filter, or `None` to use every insto category
    pub fn parse_categories(&self) -> Option<BTreeSet<String>> {
        self.categories.as_ref().map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|part| !part.is_empty())
                .map(str::to_string)
                .collect()
        })
    }

    pub fn segmentation_params(&self, default_categories: BTreeSet<String>) -> crate::Result<SegmentationParams> {
        let params = SegmentationParams::new(self.parse_categories().unwrap_or(default_categories))
            .with_dimensions(self.parse_dimensions()?)
            .with_min_deals(self.min_deals);
        params.validate()?;
        Ok(params)
    }

    pub fn cluster_params(&self) -> ClusterParams {
        ClusterParams {
            k: self.clusters,
            max_iters: self.max_iters,
            tolerance: self.tolerance,
            seed: self.seed,
        }
    }
}
