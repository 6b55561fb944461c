//! Shared wiring for planner integration tests.

pub mod fixtures;

use std::sync::Arc;

use verdant_core::Catalog;
use verdant_planner::config::{CycleConfig, ForecastConfig};
use verdant_planner::{
    DeterministicRanker, ForecastFetcher, ForecastProvider, Normalizer, PlanCache, Planner,
};
use verdant_store::{layout, BucketStore};
use verdant_telemetry::{Recorder, RecorderConfig};

use self::fixtures::NullOracle;

/// A fully wired planner over an in-memory bucket.
pub struct TestPlanner {
    pub planner: Planner,
    pub store: BucketStore,
}

impl TestPlanner {
    /// Builds a planner with the standard two-region test catalog, the
    /// given forecast provider, and a deterministic ranker.
    pub async fn new(
        catalog: Catalog,
        provider: Arc<dyn ForecastProvider>,
        registry: serde_json::Value,
    ) -> Self {
        let store = BucketStore::in_memory();
        store
            .put_json(layout::STATIC_CONFIG, &catalog)
            .await
            .unwrap();
        store
            .put_json(layout::FUNCTION_METADATA, &registry)
            .await
            .unwrap();

        let catalog = Arc::new(catalog);
        let recorder = Arc::new(Recorder::new(store.clone(), RecorderConfig::default()));
        let fetcher = ForecastFetcher::new(provider, store.clone(), &ForecastConfig::default());
        let normalizer = Arc::new(Normalizer::new(Arc::new(NullOracle), 0.5));
        let cycle_config = CycleConfig::default();
        let ranker = Arc::new(DeterministicRanker::new(cycle_config.top_n));
        let cache = PlanCache::new(store.clone(), cycle_config.cache_max_age_days);

        let planner = Planner::new(
            catalog,
            store.clone(),
            fetcher,
            normalizer,
            ranker,
            cache,
            None,
            recorder,
            cycle_config,
        );

        Self { planner, store }
    }
}
