//! DealScope: institutional investor segmentation for European project-finance deals
//!
//! The pipeline loads deals with their lender lists, tags every deal as bank
//! only, insto only or mixed, builds behavioral share features per
//! institutional investor and clusters the investors with K-Means.

pub mod category;
pub mod cli;
pub mod data;
pub mod error;
pub mod features;
pub mod logging;
pub mod model;
pub mod report;
pub mod session;

// Re-export public items for easier access
pub use category::{categorize, classify, CategorizedBook, DealCategory};
pub use cli::Args;
pub use data::{load_deal_book, DealBook, LenderKind, LenderLine};
pub use error::SegmentationError;
pub use features::{build_feature_table, Dimension, FeatureTable, SegmentationParams, TicketBucket};
pub use model::{cluster_means, elbow_curve, fit_kmeans, ClusterModel, ClusterParams};
pub use session::{DealBookCache, Segmentation, Session};

/// Common result type used throughout the application
pub type Result<T> = anyhow::Result<T>;
