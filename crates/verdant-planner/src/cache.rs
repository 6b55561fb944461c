//! Plan cache.
//!
//! A schedule is keyed by (function id, metadata hash, horizon date).
//! If the bucket already holds a schedule with the same key that is
//! younger than the maximum age, planning is skipped for the cycle and
//! the cached document reused.

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use verdant_core::{FunctionId, Schedule};
use verdant_store::{layout, BucketStore};

/// Plan-cache lookups against the bucket.
#[derive(Debug, Clone)]
pub struct PlanCache {
    store: BucketStore,
    max_age: Duration,
}

impl PlanCache {
    /// Creates a cache with the given maximum schedule age in days.
    pub fn new(store: BucketStore, max_age_days: i64) -> Self {
        Self {
            store,
            max_age: Duration::days(max_age_days),
        }
    }

    /// Returns the cached schedule when the key matches and the cached
    /// document is fresh enough.
    ///
    /// Any read or parse failure is treated as a miss: a torn or
    /// corrupt document must never abort the cycle.
    pub async fn lookup(
        &self,
        function_id: &FunctionId,
        metadata_hash: &str,
        horizon_start: DateTime<Utc>,
    ) -> Option<Schedule> {
        let name = layout::schedule(function_id.as_str());
        let schedule: Schedule = match self.store.try_get_json(&name).await {
            Ok(Some(schedule)) => schedule,
            Ok(None) => return None,
            Err(e) => {
                debug!(function = %function_id, error = %e, "cache read failed, treating as miss");
                return None;
            }
        };

        if schedule.metadata_hash != metadata_hash {
            debug!(function = %function_id, "metadata hash changed, cache miss");
            return None;
        }
        if schedule.horizon_start_utc.date_naive() != horizon_start.date_naive() {
            debug!(function = %function_id, "horizon date changed, cache miss");
            return None;
        }
        let age = Utc::now() - schedule.generated_at_utc;
        if age > self.max_age {
            debug!(function = %function_id, age_days = age.num_days(), "cached schedule too old");
            return None;
        }
        if schedule.validate().is_err() {
            debug!(function = %function_id, "cached schedule fails validation, cache miss");
            return None;
        }

        Some(schedule)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DurationRound;
    use std::collections::BTreeMap;
    use verdant_core::{ForecastMode, Recommendation};

    fn horizon() -> DateTime<Utc> {
        Utc::now().duration_trunc(Duration::hours(1)).unwrap()
    }

    fn schedule(hash: &str, generated_at: DateTime<Utc>) -> Schedule {
        Schedule {
            function_id: FunctionId::new("f"),
            horizon_start_utc: horizon(),
            generated_at_utc: generated_at,
            mode: ForecastMode::Forecast,
            recommendations: vec![Recommendation {
                priority: 1,
                region: "r1".to_string(),
                hour_start_utc: horizon(),
                carbon_intensity_g_per_kwh: 50.0,
                transfer_cost_usd: 0.0,
                rationale: String::new(),
            }],
            deployment: BTreeMap::new(),
            metadata_hash: hash.to_string(),
        }
    }

    async fn store_with(schedule: &Schedule) -> BucketStore {
        let store = BucketStore::in_memory();
        store
            .put_json_atomic(&layout::schedule("f"), schedule)
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn fresh_matching_schedule_hits() {
        let store = store_with(&schedule("abc", Utc::now())).await;
        let cache = PlanCache::new(store, 7);
        let hit = cache
            .lookup(&FunctionId::new("f"), "abc", horizon())
            .await;
        assert!(hit.is_some());
    }

    #[tokio::test]
    async fn changed_hash_misses() {
        let store = store_with(&schedule("abc", Utc::now())).await;
        let cache = PlanCache::new(store, 7);
        let hit = cache
            .lookup(&FunctionId::new("f"), "different", horizon())
            .await;
        assert!(hit.is_none());
    }

    #[tokio::test]
    async fn stale_schedule_misses() {
        let store = store_with(&schedule("abc", Utc::now() - Duration::days(8))).await;
        let cache = PlanCache::new(store, 7);
        let hit = cache
            .lookup(&FunctionId::new("f"), "abc", horizon())
            .await;
        assert!(hit.is_none());
    }

    #[tokio::test]
    async fn absent_schedule_misses() {
        let cache = PlanCache::new(BucketStore::in_memory(), 7);
        let hit = cache
            .lookup(&FunctionId::new("f"), "abc", horizon())
            .await;
        assert!(hit.is_none());
    }

    #[tokio::test]
    async fn corrupt_document_misses() {
        let store = BucketStore::in_memory();
        store
            .put_bytes(&layout::schedule("f"), "{not json".into())
            .await
            .unwrap();
        let cache = PlanCache::new(store, 7);
        let hit = cache
            .lookup(&FunctionId::new("f"), "abc", horizon())
            .await;
        assert!(hit.is_none());
    }
}
