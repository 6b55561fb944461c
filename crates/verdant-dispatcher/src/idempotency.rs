//! Request idempotency.
//!
//! A caller-supplied `X-Request-Id` pins the dispatch decision for a
//! rolling window: repeats see the same outcome - the same task id for
//! a deferral, or the cached response for a forward.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;

/// A remembered dispatch decision.
#[derive(Debug, Clone)]
pub enum StoredDecision {
    /// The request was forwarded; the response is replayed verbatim.
    Forwarded {
        region: String,
        hour_start_utc: DateTime<Utc>,
        status: u16,
        body: Vec<u8>,
    },
    /// The request was deferred; the same task id is returned.
    Deferred {
        region: String,
        task_id: String,
        scheduled_for_utc: DateTime<Utc>,
    },
}

struct StoredEntry {
    decided_at: DateTime<Utc>,
    decision: StoredDecision,
}

/// Rolling-window request-id cache.
pub struct IdempotencyCache {
    window: Duration,
    entries: DashMap<String, StoredEntry>,
}

impl IdempotencyCache {
    /// Creates a cache with the given window in hours.
    pub fn new(window_hours: i64) -> Self {
        Self {
            window: Duration::hours(window_hours),
            entries: DashMap::new(),
        }
    }

    /// The stored decision for a request id, if still inside the
    /// window. Expired entries are dropped on access.
    pub fn get(&self, request_id: &str) -> Option<StoredDecision> {
        let expired = match self.entries.get(request_id) {
            Some(entry) if Utc::now() - entry.decided_at <= self.window => {
                return Some(entry.decision.clone());
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.remove(request_id);
        }
        None
    }

    /// Remembers a decision for a request id.
    pub fn insert(&self, request_id: &str, decision: StoredDecision) {
        self.entries.insert(
            request_id.to_string(),
            StoredEntry {
                decided_at: Utc::now(),
                decision,
            },
        );
    }

    /// Drops every entry older than the window.
    pub fn purge_expired(&self) {
        let now = Utc::now();
        self.entries
            .retain(|_, entry| now - entry.decided_at <= self.window);
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
