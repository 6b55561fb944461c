//! Verdant planner binary.
//!
//! Serves the control plane and runs planning cycles on demand. An
//! external periodic trigger (cron or equivalent) is expected to POST
//! `/run` daily; the endpoint is cache-protected and safe to call more
//! often.

use std::sync::Arc;

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tracing::info;
use tracing_subscriber::EnvFilter;

use verdant_core::Catalog;
use verdant_planner::api::{self, AppState, SecretsStatus};
use verdant_planner::{
    DeploymentOrchestrator, DeterministicRanker, ForecastFetcher, HttpForecastProvider,
    HttpOracle, JsonRpcDeployer, LlmRanker, Normalizer, PlanCache, Planner, PlannerConfig,
    RankingOracle,
};
use verdant_store::{layout, BucketStore};
use verdant_telemetry::Recorder;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("verdant_planner=info".parse()?),
        )
        .init();

    info!("Verdant planner starting");

    // Load configuration; secrets arrive via the environment.
    let mut config: PlannerConfig = Figment::new()
        .merge(Toml::file("planner.toml"))
        .merge(Env::prefixed("PLANNER_").split("__"))
        .extract()?;
    config.forecast.token = std::env::var("FORECAST_TOKEN").ok().or(config.forecast.token);
    config.oracle.token = std::env::var("ORACLE_TOKEN").ok().or(config.oracle.token);
    config.deployer.token = std::env::var("DEPLOYER_TOKEN").ok().or(config.deployer.token);

    info!(listen_addr = %config.api.listen_addr, "Configuration loaded");

    // The bucket and catalog are required; failure here is fatal.
    let store = BucketStore::new(&config.bucket)?;
    let catalog_bytes = store.get_bytes(layout::STATIC_CONFIG).await?;
    let catalog = Arc::new(Catalog::from_json(&catalog_bytes)?);
    info!(regions = catalog.region_keys().count(), "Catalog loaded");

    // Telemetry recorder with background flush.
    let recorder = Arc::new(Recorder::new(store.clone(), config.telemetry.clone()));
    let flush_handle = recorder.clone().spawn_flush_task();

    // Forecast fetcher.
    let provider = Arc::new(HttpForecastProvider::new(&config.forecast)?);
    let fetcher = ForecastFetcher::new(provider, store.clone(), &config.forecast);
    info!(mode = ?config.forecast.mode, "Forecast fetcher configured");

    // Oracle-backed normalizer and the configured ranking oracle.
    let oracle = Arc::new(HttpOracle::new(&config.oracle)?);
    let normalizer = Arc::new(Normalizer::new(oracle.clone(), config.oracle.min_confidence));
    let ranker: Arc<dyn RankingOracle> = if config.oracle.rank_with_oracle {
        Arc::new(LlmRanker::new(oracle, config.cycle.top_n))
    } else {
        Arc::new(DeterministicRanker::new(config.cycle.top_n))
    };
    info!(ranker = ranker.name(), "Ranking oracle configured");

    // Deployment orchestrator.
    let deployer = Arc::new(JsonRpcDeployer::new(&config.deployer)?);
    let orchestrator = Arc::new(DeploymentOrchestrator::new(
        deployer,
        store.clone(),
        recorder.clone(),
        config.deployer.clone(),
    ));

    let cache = PlanCache::new(store.clone(), config.cycle.cache_max_age_days);

    let planner = Arc::new(Planner::new(
        catalog.clone(),
        store.clone(),
        fetcher,
        normalizer,
        ranker,
        cache,
        Some(orchestrator),
        recorder.clone(),
        config.cycle.clone(),
    ));

    let state = Arc::new(AppState {
        planner,
        store,
        catalog,
        secrets: SecretsStatus {
            has_forecast_token: config.forecast.token.is_some(),
            has_oracle_token: config.oracle.token.is_some(),
            has_deployer_token: config.deployer.token.is_some(),
        },
        planning_region: config.planning_region.clone(),
        last_cycle: RwLock::new(None),
    });

    let app = api::router(state);
    let listener = TcpListener::bind(&config.api.listen_addr).await?;
    info!(addr = %config.api.listen_addr, "Planner API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    flush_handle.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}
