//! Error types for bucket access.

use thiserror::Error;

/// Bucket access errors.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The requested object does not exist.
    #[error("object not found: {0}")]
    NotFound(String),

    /// Backend configuration error.
    #[error("storage configuration error: {0}")]
    Config(String),

    /// Underlying object store error.
    #[error("object store error: {0}")]
    ObjectStore(#[from] object_store::Error),

    /// JSON serialisation error.
    #[error("serialisation error: {0}")]
    Serialisation(#[from] serde_json::Error),
}

/// Result type for bucket operations.
pub type Result<T> = std::result::Result<T, StoreError>;
