//! Error types for telemetry.

use thiserror::Error;

/// Telemetry errors.
#[derive(Error, Debug)]
pub enum TelemetryError {
    /// Event buffer is full; callers should treat this as backpressure.
    #[error("event buffer full: {0} events")]
    BufferOverflow(usize),

    /// Flush to the bucket failed after all retries.
    #[error("flush failed: {0}")]
    Flush(#[from] verdant_store::StoreError),

    /// JSON serialisation error.
    #[error("serialisation error: {0}")]
    Serialisation(#[from] serde_json::Error),
}

/// Result type for telemetry operations.
pub type Result<T> = std::result::Result<T, TelemetryError>;
