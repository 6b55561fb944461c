//! Buffered event recorder.
//!
//! Events are cheap to record and flushed in batches. A failed flush is
//! retried with exponential backoff; if every attempt fails the events
//! are restored to the buffer for the next flush.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{oneshot, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use verdant_store::{layout, BucketStore};

use crate::error::{Result, TelemetryError};
use crate::event::{Event, EventRecord};

/// Recorder tuning knobs.
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    /// Flush when the buffer reaches this many events.
    pub max_batch_size: usize,
    /// Hard cap on buffered events; recording beyond it is rejected.
    pub max_buffer_events: usize,
    /// Background flush interval in seconds.
    pub flush_interval_secs: u64,
    /// Flush retry attempts.
    pub max_retries: u32,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 256,
            max_buffer_events: 8192,
            flush_interval_secs: 30,
            max_retries: 5,
        }
    }
}

/// Calculate exponential backoff delay for retry attempts.
fn calculate_backoff_delay(attempt: u32, initial_delay: Duration, max_delay: Duration) -> Duration {
    let multiplier = 2u32.saturating_pow(attempt);
    initial_delay.saturating_mul(multiplier).min(max_delay)
}

/// Buffers telemetry events and flushes them to the bucket.
pub struct Recorder {
    store: BucketStore,
    buffer: RwLock<Vec<EventRecord>>,
    sequence: AtomicU64,
    config: RecorderConfig,
}

impl Recorder {
    /// Creates a new recorder writing batches to the given bucket.
    pub fn new(store: BucketStore, config: RecorderConfig) -> Self {
        Self {
            store,
            buffer: RwLock::new(Vec::new()),
            sequence: AtomicU64::new(0),
            config,
        }
    }

    /// Records one event, flushing if the batch threshold is reached.
    pub async fn record(&self, event: Event) -> Result<()> {
        let len = {
            let mut buffer = self.buffer.write().await;
            if buffer.len() >= self.config.max_buffer_events {
                return Err(TelemetryError::BufferOverflow(buffer.len()));
            }
            buffer.push(EventRecord::now(event));
            buffer.len()
        };

        if len >= self.config.max_batch_size {
            self.flush().await?;
        }
        Ok(())
    }

    /// Number of buffered, un-flushed events.
    pub async fn buffered(&self) -> usize {
        self.buffer.read().await.len()
    }

    /// Flushes all buffered events as one JSON-lines object.
    ///
    /// Holds the buffer lock for the whole flush so a concurrent
    /// recorder cannot interleave a batch. On failure the drained
    /// events are put back in front of the buffer.
    pub async fn flush(&self) -> Result<()> {
        let mut buffer = self.buffer.write().await;
        if buffer.is_empty() {
            return Ok(());
        }

        let records = std::mem::take(&mut *buffer);
        let mut lines = String::new();
        for record in &records {
            lines.push_str(&serde_json::to_string(record)?);
            lines.push('\n');
        }

        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
        let name = layout::telemetry_batch(Utc::now(), sequence);

        let mut last_error = None;
        for attempt in 0..self.config.max_retries {
            match self
                .store
                .put_bytes(&name, lines.clone().into_bytes().into())
                .await
            {
                Ok(()) => {
                    debug!(object = %name, events = records.len(), "telemetry batch flushed");
                    return Ok(());
                }
                Err(e) => {
                    warn!(error = %e, attempt, "telemetry flush failed");
                    last_error = Some(e);
                    if attempt + 1 < self.config.max_retries {
                        let delay = calculate_backoff_delay(
                            attempt,
                            Duration::from_millis(500),
                            Duration::from_secs(8),
                        );
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        // All retries exhausted: keep the events for the next flush.
        let mut restored = records;
        restored.extend(buffer.drain(..));
        *buffer = restored;

        Err(TelemetryError::Flush(last_error.expect("retries > 0")))
    }

    /// Spawns the periodic background flush task.
    pub fn spawn_flush_task(self: Arc<Self>) -> FlushHandle {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        let interval = Duration::from_secs(self.config.flush_interval_secs);

        let join_handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.flush().await {
                            warn!(error = %e, "periodic telemetry flush failed");
                        }
                    }
                    _ = &mut shutdown_rx => {
                        if let Err(e) = self.flush().await {
                            warn!(error = %e, "final telemetry flush failed");
                        }
                        break;
                    }
                }
            }
        });

        FlushHandle {
            shutdown_tx: Some(shutdown_tx),
            join_handle,
        }
    }
}

/// Handle for controlling the background flush task.
pub struct FlushHandle {
    shutdown_tx: Option<oneshot::Sender<()>>,
    join_handle: JoinHandle<()>,
}

impl FlushHandle {
    /// Signals the background task to stop and waits for the final
    /// flush to complete.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        let _ = self.join_handle.await;
    }

    /// Aborts the background task immediately without flushing.
    pub fn abort(self) {
        self.join_handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{DeployOutcome, Event};
    use verdant_core::FunctionId;

    fn deploy_event(region: &str) -> Event {
        Event::Deploy {
            function_id: FunctionId::new("f"),
            region: region.to_string(),
            outcome: DeployOutcome::Deployed,
            code_hash: None,
        }
    }

    #[tokio::test]
    async fn record_buffers_until_flush() {
        let recorder = Recorder::new(BucketStore::in_memory(), RecorderConfig::default());
        recorder.record(deploy_event("eu-north")).await.unwrap();
        recorder.record(deploy_event("eu-west")).await.unwrap();
        assert_eq!(recorder.buffered().await, 2);

        recorder.flush().await.unwrap();
        assert_eq!(recorder.buffered().await, 0);
    }

    #[tokio::test]
    async fn flush_of_empty_buffer_is_noop() {
        let recorder = Recorder::new(BucketStore::in_memory(), RecorderConfig::default());
        recorder.flush().await.unwrap();
    }

    #[tokio::test]
    async fn batch_threshold_triggers_flush() {
        let config = RecorderConfig {
            max_batch_size: 2,
            ..RecorderConfig::default()
        };
        let recorder = Recorder::new(BucketStore::in_memory(), config);
        recorder.record(deploy_event("a")).await.unwrap();
        recorder.record(deploy_event("b")).await.unwrap();
        // Second record crossed the threshold and flushed inline.
        assert_eq!(recorder.buffered().await, 0);
    }

    #[tokio::test]
    async fn overflow_is_rejected() {
        let config = RecorderConfig {
            max_batch_size: 100,
            max_buffer_events: 1,
            ..RecorderConfig::default()
        };
        let recorder = Recorder::new(BucketStore::in_memory(), config);
        recorder.record(deploy_event("a")).await.unwrap();
        assert!(matches!(
            recorder.record(deploy_event("b")).await,
            Err(TelemetryError::BufferOverflow(_))
        ));
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let initial = Duration::from_millis(500);
        let max = Duration::from_secs(8);
        assert_eq!(calculate_backoff_delay(0, initial, max), initial);
        assert_eq!(
            calculate_backoff_delay(1, initial, max),
            Duration::from_secs(1)
        );
        assert_eq!(calculate_backoff_delay(10, initial, max), max);
    }
}
