//! Well-known object names in the configuration bucket.

use chrono::{DateTime, Utc};

/// Static region catalog.
pub const STATIC_CONFIG: &str = "static_config.json";

/// Registry document with all function descriptors.
pub const FUNCTION_METADATA: &str = "function_metadata.json";

/// Latest merged carbon forecast.
pub const CARBON_FORECASTS: &str = "carbon_forecasts.json";

/// Deployment state tracked across planner cycles.
pub const DEPLOYMENT_STATE: &str = "deployment_state.json";

/// Per-function schedule document.
pub fn schedule(function_id: &str) -> String {
    format!("schedule_{function_id}.json")
}

/// Deployable artifact source, addressed by content hash.
pub fn function_source(function_id: &str, code_hash: &str, ext: &str) -> String {
    format!("function-source/{function_id}/{code_hash}.{ext}")
}

/// Daily telemetry event batch.
pub fn telemetry_batch(day: DateTime<Utc>, sequence: u64) -> String {
    format!(
        "telemetry/events-{}-{sequence:06}.jsonl",
        day.format("%Y-%m-%d")
    )
}
