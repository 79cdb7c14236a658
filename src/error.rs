//! Typed failures reported back to the interactive caller

use thiserror::Error;

/// Recoverable configuration and data failures of the segmentation pipeline.
///
/// These travel inside [`crate::Result`] and can be recovered with
/// `anyhow::Error::downcast_ref::<SegmentationError>()`.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SegmentationError {
    #[error("Malformed lender list for deal '{deal}': {reason}")]
    MalformedLenderList { deal: String, reason: String },

    #[error("Invalid lender reference row for '{lender}': {reason}")]
    InvalidLenderReference { lender: String, reason: String },

    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("Cluster count {k} is outside the supported range {min}..={max}")]
    ClusterCountOutOfRange { k: usize, min: usize, max: usize },

    #[error("Cannot form {k} clusters from {investors} qualifying investors")]
    TooFewInvestors { k: usize, investors: usize },

    #[error("Invalid parameter: {field} - {reason}")]
    InvalidParameter { field: String, reason: String },
}
