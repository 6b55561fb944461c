//! Verdant dispatcher binary.

use std::sync::Arc;
use std::time::Duration;

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use verdant_dispatcher::api::{self, AppState, Forwarder};
use verdant_dispatcher::{DispatcherConfig, HttpTaskQueue, IdempotencyCache, ScheduleCache};
use verdant_store::BucketStore;
use verdant_telemetry::Recorder;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("verdant_dispatcher=info".parse()?),
        )
        .init();

    info!("Verdant dispatcher starting");

    let mut config: DispatcherConfig = Figment::new()
        .merge(Toml::file("dispatcher.toml"))
        .merge(Env::prefixed("DISPATCHER_").split("__"))
        .extract()?;
    config.queue.token = std::env::var("QUEUE_TOKEN").ok().or(config.queue.token);

    info!(listen_addr = %config.api.listen_addr, "Configuration loaded");

    let store = BucketStore::new(&config.bucket)?;

    let recorder = Arc::new(Recorder::new(store.clone(), config.telemetry.clone()));
    let flush_handle = recorder.clone().spawn_flush_task();

    let schedules = ScheduleCache::new(
        store.clone(),
        Duration::from_secs(config.cache.schedule_ttl_secs),
    );
    let queue = Arc::new(HttpTaskQueue::new(&config.queue)?);
    let idempotency = IdempotencyCache::new(config.forward.idempotency_window_hours);
    let forwarder = Forwarder::new(Duration::from_secs(config.forward.timeout_secs))?;

    let state = Arc::new(AppState {
        store,
        schedules,
        queue,
        idempotency,
        recorder,
        forwarder,
    });

    // Keep the idempotency cache from growing without bound.
    let purge_state = state.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(3600));
        loop {
            ticker.tick().await;
            purge_state.idempotency.purge_expired();
        }
    });

    let app = api::router(state);
    let listener = TcpListener::bind(&config.api.listen_addr).await?;
    info!(addr = %config.api.listen_addr, "Dispatcher API listening");

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
