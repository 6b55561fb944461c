//! Retry with exponential backoff for transient external errors.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::{PlannerError, Result};

/// Backoff policy applied to external calls.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Ceiling on any single delay.
    pub max_delay: Duration,
    /// Total attempts, including the first.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            max_attempts: 5,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0-based), doubling each time.
    pub fn delay(&self, attempt: u32) -> Duration {
        let multiplier = 2u32.saturating_pow(attempt);
        self.base_delay.saturating_mul(multiplier).min(self.max_delay)
    }
}

/// Runs `operation` until it succeeds, a permanent error occurs, or the
/// policy is exhausted.
///
/// Returns the value together with the number of retries spent, so
/// callers can attribute retry counts in telemetry.
pub async fn retry<T, F, Fut>(
    policy: RetryPolicy,
    label: &str,
    mut operation: F,
) -> Result<(T, u32)>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut retries = 0;
    loop {
        match operation().await {
            Ok(value) => return Ok((value, retries)),
            Err(e) if e.is_transient() && retries + 1 < policy.max_attempts => {
                let delay = policy.delay(retries);
                warn!(
                    call = label,
                    error = %e,
                    retry = retries + 1,
                    delay_ms = delay.as_millis() as u64,
                    "transient error, retrying"
                );
                retries += 1;
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}
