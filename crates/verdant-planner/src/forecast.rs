//! Forecast fetcher.
//!
//! Retrieves hourly carbon intensity per grid zone, one request per
//! zone, fanned out under a bounded concurrency cap. In historical mode
//! the provider's past 24 hours are reinterpreted as the next 24 hours
//! by shifting every timestamp forward a day. The merged document is
//! persisted to the bucket under a deterministic name.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, DurationRound, Utc};
use futures::future::join_all;
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use verdant_core::{ForecastDocument, ForecastMode, ForecastPoint, ZoneForecast};
use verdant_store::{layout, BucketStore};

use crate::config::ForecastConfig;
use crate::error::{PlannerError, Result};
use crate::retry::{retry, RetryPolicy};

/// Upstream carbon-intensity source.
#[async_trait]
pub trait ForecastProvider: Send + Sync {
    /// Fetches the hourly series for one zone.
    async fn fetch_zone(
        &self,
        zone: &str,
        mode: ForecastMode,
        horizon_hours: u32,
    ) -> Result<ZoneForecast>;
}

/// One data point as returned by the provider.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProviderPoint {
    carbon_intensity: f64,
    datetime: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct ForecastResponse {
    #[serde(default)]
    forecast: Vec<ProviderPoint>,
}

#[derive(Debug, Deserialize)]
struct HistoryResponse {
    #[serde(default)]
    history: Vec<ProviderPoint>,
}

/// HTTP client for the carbon-intensity provider.
#[derive(Debug, Clone)]
pub struct HttpForecastProvider {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl HttpForecastProvider {
    /// Creates a provider client from configuration.
    pub fn new(config: &ForecastConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_owned(),
            token: config.token.clone(),
        })
    }

    async fn get_points(&self, url: &str, query: &[(&str, String)]) -> Result<Vec<ProviderPoint>> {
        let mut request = self.client.get(url).query(query);
        if let Some(token) = &self.token {
            request = request.header("auth-token", token);
        }
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            // Keep the status on the error so 5xx classifies as transient.
            let error = response.error_for_status().expect_err("status checked");
            return Err(PlannerError::Http(error));
        }
        if url.ends_with("/history") {
            let body: HistoryResponse = response.json().await?;
            Ok(body.history)
        } else {
            let body: ForecastResponse = response.json().await?;
            Ok(body.forecast)
        }
    }
}

#[async_trait]
impl ForecastProvider for HttpForecastProvider {
    async fn fetch_zone(
        &self,
        zone: &str,
        mode: ForecastMode,
        horizon_hours: u32,
    ) -> Result<ZoneForecast> {
        let points = match mode {
            ForecastMode::Forecast => {
                let url = format!("{}/carbon-intensity/forecast", self.base_url);
                self.get_points(
                    &url,
                    &[
                        ("zone", zone.to_owned()),
                        ("horizonHours", horizon_hours.to_string()),
                    ],
                )
                .await?
            }
            ForecastMode::Historical => {
                let url = format!("{}/carbon-intensity/history", self.base_url);
                self.get_points(&url, &[("zone", zone.to_owned())]).await?
            }
        };

        let mut forecast = ZoneForecast {
            zone: zone.to_owned(),
            points: points
                .into_iter()
                .map(|p| {
                    Ok(ForecastPoint {
                        hour_start_utc: p
                            .datetime
                            .duration_trunc(chrono::Duration::hours(1))
                            .map_err(|e| {
                                PlannerError::Registry(format!("bad timestamp from provider: {e}"))
                            })?,
                        carbon_intensity: p.carbon_intensity,
                    })
                })
                .collect::<Result<Vec<_>>>()?,
        };

        if mode == ForecastMode::Historical {
            forecast = forecast.shifted(24);
        }
        forecast.validate()?;
        Ok(forecast)
    }
}

/// Fetches and persists the merged forecast for a planning cycle.
pub struct ForecastFetcher {
    provider: Arc<dyn ForecastProvider>,
    store: BucketStore,
    mode: ForecastMode,
    horizon_hours: u32,
    semaphore: Arc<Semaphore>,
    retry_policy: RetryPolicy,
}

impl ForecastFetcher {
    /// Creates a fetcher using the configured mode and concurrency cap.
    pub fn new(
        provider: Arc<dyn ForecastProvider>,
        store: BucketStore,
        config: &ForecastConfig,
    ) -> Self {
        Self {
            provider,
            store,
            mode: config.mode,
            horizon_hours: config.horizon_hours,
            semaphore: Arc::new(Semaphore::new(config.max_concurrent_fetches.max(1))),
            retry_policy: RetryPolicy::default(),
        }
    }

    /// The mode forecasts are fetched in.
    pub fn mode(&self) -> ForecastMode {
        self.mode
    }

    /// Fetches every zone in parallel and persists the merged document.
    ///
    /// Individual zone failures are recorded in `failed_zones`; the
    /// cycle proceeds with whatever succeeded. Returns the document and
    /// the total retries spent.
    pub async fn fetch(&self, zones: &BTreeSet<String>) -> Result<(ForecastDocument, u32)> {
        let fetches = zones.iter().map(|zone| {
            let zone = zone.clone();
            let provider = self.provider.clone();
            let semaphore = self.semaphore.clone();
            let mode = self.mode;
            let horizon = self.horizon_hours;
            let policy = self.retry_policy;
            async move {
                let _permit = semaphore.acquire().await.expect("semaphore not closed");
                let result = retry(policy, "forecast.fetch_zone", || {
                    provider.fetch_zone(&zone, mode, horizon)
                })
                .await;
                (zone, result)
            }
        });

        let mut document = ForecastDocument {
            fetched_at_utc: Utc::now(),
            mode: self.mode,
            zones: Default::default(),
            failed_zones: Vec::new(),
        };
        let mut total_retries = 0;

        for (zone, result) in join_all(fetches).await {
            match result {
                Ok((forecast, retries)) => {
                    total_retries += retries;
                    info!(zone = %zone, points = forecast.points.len(), "fetched forecast");
                    document.zones.insert(zone, forecast);
                }
                Err(e) => {
                    warn!(zone = %zone, error = %e, "forecast fetch failed");
                    document.failed_zones.push(zone);
                }
            }
        }

        if document.zones.is_empty() {
            return Err(PlannerError::Registry(
                "failed to fetch forecasts for all zones".into(),
            ));
        }

        self.store
            .put_json_atomic(layout::CARBON_FORECASTS, &document)
            .await?;

        Ok((document, total_retries))
    }
}
