//! Verdant telemetry - structured event records.
//!
//! Every planner run, dispatch decision, and deployment attempt emits
//! one event. Events are buffered in memory and flushed to the
//! configuration bucket as JSON-lines batches, one object per flush,
//! named by day and sequence number. The downstream evaluation pipeline
//! consumes these objects; nothing in the core reads them back.

pub mod error;
pub mod event;
pub mod recorder;

pub use error::{Result, TelemetryError};
pub use event::{DeployOutcome, DispatchDecision, Event, EventRecord, PlanOutcome};
pub use recorder::{FlushHandle, Recorder, RecorderConfig};
