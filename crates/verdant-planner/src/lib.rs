//! Verdant planner - the carbon-aware planning service.
//!
//! The planner is responsible for:
//!
//! - **Registry loading**: reading function descriptors from the bucket
//! - **Normalization**: turning free-text descriptors into canonical
//!   metadata via the extraction oracle
//! - **Forecast ingestion**: fetching hourly carbon intensity per zone
//! - **Scoring and ranking**: producing a ranked (region, hour) schedule
//!   per function under its priority weights
//! - **Deployment**: keeping top-priority regions deployed via the
//!   external deployer
//!
//! # Architecture
//!
//! The bucket is the source of truth. One planning cycle reads the
//! registry, fetches forecasts, and writes one schedule document per
//! function with an atomic rename; the dispatcher only ever reads those
//! documents. Schedules are cache-protected: unchanged metadata within
//! the horizon date reuses the existing document, so the `/run`
//! endpoint is safe to trigger at any rate.

pub mod api;
pub mod cache;
pub mod config;
pub mod cycle;
pub mod deploy;
pub mod error;
pub mod forecast;
pub mod normalize;
pub mod oracle;
pub mod rank;
pub mod registry;
pub mod retry;
pub mod score;

pub use cache::PlanCache;
pub use config::PlannerConfig;
pub use cycle::{CycleSummary, FunctionReport, Planner};
pub use deploy::{DeployerClient, DeploymentOrchestrator, JsonRpcDeployer};
pub use error::{PlannerError, Result};
pub use forecast::{ForecastFetcher, ForecastProvider, HttpForecastProvider};
pub use normalize::Normalizer;
pub use oracle::{HttpOracle, Oracle};
pub use rank::{DeterministicRanker, LlmRanker, RankingOracle};
pub use score::{score_candidates, Candidate};
