//! Event model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use verdant_core::{ForecastMode, FunctionId};

/// Terminal status of a function within one planning cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanOutcome {
    /// A cached schedule with a matching key was reused.
    CachedHit,
    /// A fresh schedule was written to the bucket.
    Written,
    /// Planning failed; any prior schedule is left in place.
    Failed,
    /// The cycle deadline elapsed before this function was planned.
    FailedTimeout,
}

/// What the dispatcher did with a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchDecision {
    /// Forwarded immediately to the chosen region.
    Forwarded,
    /// Enqueued as a delayed task for a future slot.
    Deferred,
}

/// Result of one per-region deployment attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeployOutcome {
    Deployed,
    /// Already deployed with a matching code hash.
    Skipped,
    DeployFailed,
}

/// A telemetry event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Event {
    /// Emitted once per function per planning cycle.
    PlannerRun {
        cycle_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        scenario: Option<String>,
        function_id: FunctionId,
        status: PlanOutcome,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mode: Option<ForecastMode>,
        /// Top-ranked region, when a schedule was produced.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        region: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        hour_start_utc: Option<DateTime<Utc>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        forecast_g_per_kwh: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        carbon_g: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cost_usd: Option<f64>,
        /// External-call retries spent on this function.
        retries: u32,
    },

    /// Emitted once per dispatched request.
    Dispatch {
        request_id: String,
        function_id: FunctionId,
        decision: DispatchDecision,
        region: String,
        hour_start_utc: DateTime<Utc>,
        /// Delayed-task id, for deferrals.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        task_id: Option<String>,
        forecast_g_per_kwh: f64,
        carbon_g: Option<f64>,
        cost_usd: f64,
    },

    /// Emitted once per (function, region) deployment attempt.
    Deploy {
        function_id: FunctionId,
        region: String,
        outcome: DeployOutcome,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code_hash: Option<String>,
    },
}

/// A timestamped event, one JSON line in a flushed batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub timestamp_utc: DateTime<Utc>,
    #[serde(flatten)]
    pub event: Event,
}

impl EventRecord {
    /// Stamps an event with the current time.
    pub fn now(event: Event) -> Self {
        Self {
            timestamp_utc: Utc::now(),
            event,
        }
    }
}
