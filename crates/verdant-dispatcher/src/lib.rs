//! Verdant dispatcher - routes invocations per the active schedule.
//!
//! The dispatcher sits between callers and deployed functions. For
//! each request it loads the function's schedule from the bucket
//! (cached in memory with a short TTL), picks the effective slot, and
//! either forwards the call to the chosen region or enqueues it on the
//! delayed-task queue for the chosen future hour. Caller-supplied
//! request ids make dispatch decisions idempotent over a rolling
//! window.

pub mod api;
pub mod config;
pub mod error;
pub mod idempotency;
pub mod queue;
pub mod schedule_cache;
pub mod slot;

pub use config::DispatcherConfig;
pub use error::{DispatchError, Result};
pub use idempotency::{IdempotencyCache, StoredDecision};
pub use queue::{DelayedTask, HttpTaskQueue, InMemoryTaskQueue, TaskQueue};
pub use schedule_cache::ScheduleCache;
pub use slot::{viable_slots, EffectiveSlot, SlotKind};
