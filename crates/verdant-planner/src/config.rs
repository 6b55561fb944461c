//! Configuration types for the planner service.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use serde::Deserialize;

use verdant_core::ForecastMode;
use verdant_store::BucketConfig;
use verdant_telemetry::RecorderConfig;

/// Planner service configuration.
///
/// Loaded from `planner.toml` merged with `PLANNER_`-prefixed
/// environment variables. Secrets (provider tokens) come from the
/// environment only.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// HTTP API configuration.
    pub api: ApiConfig,
    /// Region this planner runs in; default source region for ad-hoc
    /// submissions. Falls back to the first catalog region when empty.
    pub planning_region: String,
    /// Configuration bucket.
    pub bucket: BucketConfig,
    /// Forecast provider.
    pub forecast: ForecastConfig,
    /// Extraction / ranking oracle.
    pub oracle: OracleConfig,
    /// Function deployer.
    pub deployer: DeployerConfig,
    /// Planning cycle tuning.
    pub cycle: CycleConfig,
    /// Telemetry recorder.
    pub telemetry: RecorderConfig,
}

/// HTTP API configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Address to listen on.
    pub listen_addr: SocketAddr,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 8090),
        }
    }
}

/// Forecast provider configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ForecastConfig {
    /// Provider base URL.
    pub base_url: String,
    /// Auth token; required unless the provider is unauthenticated.
    pub token: Option<String>,
    /// Forecast vs historical mode, chosen at startup.
    pub mode: ForecastMode,
    /// Forecast horizon in hours.
    pub horizon_hours: u32,
    /// Parallel zone fetches.
    pub max_concurrent_fetches: usize,
    /// Per-call deadline in seconds.
    pub timeout_secs: u64,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.electricitymaps.com/v3".to_owned(),
            token: None,
            mode: ForecastMode::Forecast,
            horizon_hours: 24,
            max_concurrent_fetches: 8,
            timeout_secs: 30,
        }
    }
}

/// Oracle configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OracleConfig {
    /// Oracle service base URL.
    pub base_url: String,
    /// Auth token.
    pub token: Option<String>,
    /// Model identifier passed through to the service.
    pub model: String,
    /// Use the oracle for ranking; the deterministic ranker is used
    /// when unset or on validation failure.
    pub rank_with_oracle: bool,
    /// Minimum extraction confidence to accept a free-text descriptor.
    pub min_confidence: f64,
    /// Per-call deadline in seconds; oracle calls are the slowest.
    pub timeout_secs: u64,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8200".to_owned(),
            token: None,
            model: "gemini-2.5-flash".to_owned(),
            rank_with_oracle: false,
            min_confidence: 0.5,
            timeout_secs: 120,
        }
    }
}

/// Deployer configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DeployerConfig {
    /// Deployer JSON-RPC endpoint.
    pub base_url: String,
    /// Auth token.
    pub token: Option<String>,
    /// How many top-priority regions to keep deployed.
    pub top_regions: usize,
    /// Per-call deadline in seconds.
    pub timeout_secs: u64,
    /// Function runtime identifier passed to the deployer.
    pub runtime: String,
    /// Function timeout passed to the deployer, in seconds.
    pub function_timeout_secs: u64,
}

impl Default for DeployerConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8100/rpc".to_owned(),
            token: None,
            top_regions: 3,
            timeout_secs: 30,
            runtime: "python312".to_owned(),
            function_timeout_secs: 60,
        }
    }
}

/// Planning cycle tuning.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CycleConfig {
    /// Cycle-wide deadline.
    #[serde(with = "serde_duration_secs")]
    pub deadline: Duration,
    /// Bound on concurrent per-function planning work.
    pub concurrency: usize,
    /// Recommendations per schedule.
    pub top_n: usize,
    /// Maximum cached-schedule age before regeneration.
    pub cache_max_age_days: i64,
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            deadline: Duration::from_secs(240),
            concurrency: 8,
            top_n: 24,
            cache_max_age_days: 7,
        }
    }
}

/// Serde helper for Duration as seconds.
mod serde_duration_secs {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
