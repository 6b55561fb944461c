//! In-memory schedule cache.
//!
//! Schedules live in the bucket; the dispatcher keeps a short-TTL copy
//! per function to stay off the bucket in the request path. Stale reads
//! within the TTL are tolerated by design.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use verdant_core::Schedule;
use verdant_store::{layout, BucketStore};

use crate::error::{DispatchError, Result};

struct CachedEntry {
    fetched_at: Instant,
    schedule: Arc<Schedule>,
}

/// TTL'd per-function schedule cache over the bucket.
pub struct ScheduleCache {
    store: BucketStore,
    ttl: Duration,
    entries: DashMap<String, CachedEntry>,
}

impl ScheduleCache {
    /// Creates a cache with the given TTL.
    pub fn new(store: BucketStore, ttl: Duration) -> Self {
        Self {
            store,
            ttl,
            entries: DashMap::new(),
        }
    }

    /// The active schedule for a function.
    ///
    /// Serves from memory within the TTL, otherwise re-reads the
    /// bucket. A missing document maps to `FunctionNotFound`.
    pub async fn get(&self, function_id: &str) -> Result<Arc<Schedule>> {
        if let Some(entry) = self.entries.get(function_id) {
            if entry.fetched_at.elapsed() < self.ttl {
                return Ok(entry.schedule.clone());
            }
        }

        let name = layout::schedule(function_id);
        let schedule: Schedule = match self.store.try_get_json(&name).await? {
            Some(schedule) => schedule,
            None => return Err(DispatchError::FunctionNotFound(function_id.to_string())),
        };

        let schedule = Arc::new(schedule);
        self.entries.insert(
            function_id.to_string(),
            CachedEntry {
                fetched_at: Instant::now(),
                schedule: schedule.clone(),
            },
        );
        Ok(schedule)
    }

    /// Drops a cached entry, forcing the next read through the bucket.
    pub fn invalidate(&self, function_id: &str) {
        self.entries.remove(function_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::BTreeMap;
    use verdant_core::{ForecastMode, FunctionId};

    fn schedule(hash: &str) -> Schedule {
        Schedule {
            function_id: FunctionId::new("f"),
            horizon_start_utc: Utc::now(),
            generated_at_utc: Utc::now(),
            mode: ForecastMode::Forecast,
            recommendations: vec![],
            deployment: BTreeMap::new(),
            metadata_hash: hash.to_string(),
        }
    }

    #[tokio::test]
    async fn caches_within_ttl() {
        let store = BucketStore::in_memory();
        store
            .put_json_atomic(&layout::schedule("f"), &schedule("v1"))
            .await
            .unwrap();

        let cache = ScheduleCache::new(store.clone(), Duration::from_secs(60));
        assert_eq!(cache.get("f").await.unwrap().metadata_hash, "v1");

        // Overwrite behind the cache's back; within the TTL the stale
        // copy is served.
        store
            .put_json_atomic(&layout::schedule("f"), &schedule("v2"))
            .await
            .unwrap();
        assert_eq!(cache.get("f").await.unwrap().metadata_hash, "v1");

        cache.invalidate("f");
        assert_eq!(cache.get("f").await.unwrap().metadata_hash, "v2");
    }

    #[tokio::test]
    async fn zero_ttl_always_rereads() {
        let store = BucketStore::in_memory();
        store
            .put_json_atomic(&layout::schedule("f"), &schedule("v1"))
            .await
            .unwrap();

        let cache = ScheduleCache::new(store.clone(), Duration::ZERO);
        assert_eq!(cache.get("f").await.unwrap().metadata_hash, "v1");
        store
            .put_json_atomic(&layout::schedule("f"), &schedule("v2"))
            .await
            .unwrap();
        assert_eq!(cache.get("f").await.unwrap().metadata_hash, "v2");
    }

    #[tokio::test]
    async fn unknown_function_maps_to_not_found() {
        let cache = ScheduleCache::new(BucketStore::in_memory(), Duration::from_secs(60));
        assert!(matches!(
            cache.get("missing").await,
            Err(DispatchError::FunctionNotFound(_))
        ));
    }
}
