//! Error types for the core data model.

use thiserror::Error;

/// Core data model errors.
#[derive(Error, Debug)]
pub enum CoreError {
    /// A document failed an invariant check.
    #[error("validation error: {0}")]
    Validation(String),

    /// Unknown catalog region referenced.
    #[error("unknown region: {0}")]
    UnknownRegion(String),

    /// JSON serialisation error.
    #[error("serialisation error: {0}")]
    Serialisation(#[from] serde_json::Error),
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
