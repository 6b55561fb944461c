//! Error types for the planner.

use thiserror::Error;

/// Planner errors.
#[derive(Error, Debug)]
pub enum PlannerError {
    /// Configuration error; fatal at startup.
    #[error("configuration error: {0}")]
    Config(String),

    /// Registry document is missing or malformed.
    #[error("registry error: {0}")]
    Registry(String),

    /// Core data model violation.
    #[error(transparent)]
    Core(#[from] verdant_core::CoreError),

    /// Bucket access error.
    #[error(transparent)]
    Store(#[from] verdant_store::StoreError),

    /// Outbound HTTP error.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Oracle returned output violating the requested schema.
    #[error("oracle output invalid: {0}")]
    OracleOutput(String),

    /// Extraction confidence below the acceptance threshold.
    #[error("extraction confidence {confidence:.2} below threshold for {function}")]
    LowConfidence { function: String, confidence: f64 },

    /// Deployer call failed.
    #[error("deployer error: {0}")]
    Deployer(String),

    /// No scoreable candidates for a function.
    #[error("no candidates for {0}")]
    NoCandidates(String),

    /// A single-function planning pass ended in a failed state.
    #[error("planning failed: {0}")]
    Planning(String),

    /// A per-function or cycle-wide deadline elapsed.
    #[error("deadline elapsed: {0}")]
    Timeout(String),

    /// JSON serialisation error.
    #[error("serialisation error: {0}")]
    Serialisation(#[from] serde_json::Error),
}

impl PlannerError {
    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(e) => {
                e.is_timeout()
                    || e.is_connect()
                    || e.status().is_some_and(|s| s.is_server_error())
            }
            Self::Store(verdant_store::StoreError::ObjectStore(_)) => true,
            _ => false,
        }
    }
}

/// Result type for planner operations.
pub type Result<T> = std::result::Result<T, PlannerError>;
