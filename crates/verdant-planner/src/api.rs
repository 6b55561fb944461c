//! Control-plane HTTP API.
//!
//! Three endpoints drive the planner: `/health` for liveness and
//! configuration checks, `/run` to execute a full planning cycle, and
//! `/submit` for ad-hoc single-function submissions. `/run` is safe to
//! call at any rate; the plan cache absorbs repeats.

use std::collections::BTreeSet;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::error;
use uuid::Uuid;

use verdant_core::{ArtifactSpec, Catalog, FunctionId, FunctionMetadata, Weights};
use verdant_store::{layout, BucketStore};

use crate::cycle::{CycleSummary, Planner};

/// Which secrets the process was started with.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct SecretsStatus {
    pub has_forecast_token: bool,
    pub has_oracle_token: bool,
    pub has_deployer_token: bool,
}

impl SecretsStatus {
    fn all_present(self) -> bool {
        self.has_forecast_token && self.has_oracle_token && self.has_deployer_token
    }
}

/// Shared application state.
pub struct AppState {
    pub planner: Arc<Planner>,
    pub store: BucketStore,
    pub catalog: Arc<Catalog>,
    pub secrets: SecretsStatus,
    /// Default source region for ad-hoc submissions.
    pub planning_region: String,
    pub last_cycle: RwLock<Option<CycleSummary>>,
}

/// Creates the control-plane router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/run", post(run_cycle))
        .route("/submit", post(submit))
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    bucket_reachable: bool,
    #[serde(flatten)]
    secrets: SecretsStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_cycle: Option<LastCycle>,
}

#[derive(Serialize)]
struct LastCycle {
    cycle_id: String,
    started_at_utc: DateTime<Utc>,
    all_succeeded: bool,
}

/// Health check: secrets present, bucket reachable, last cycle status.
async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let bucket_reachable = state
        .store
        .exists(layout::STATIC_CONFIG)
        .await
        .unwrap_or(false);

    let last_cycle = state.last_cycle.read().await.as_ref().map(|s| LastCycle {
        cycle_id: s.cycle_id.clone(),
        started_at_utc: s.started_at_utc,
        all_succeeded: s.all_succeeded(),
    });

    let healthy = bucket_reachable && state.secrets.all_present();
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(HealthResponse {
            status: if healthy { "healthy" } else { "misconfigured" },
            bucket_reachable,
            secrets: state.secrets,
            last_cycle,
        }),
    )
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

/// Runs a full planning cycle and reports per-function outcomes.
async fn run_cycle(
    State(state): State<Arc<AppState>>,
) -> Result<Json<CycleSummary>, (StatusCode, Json<ErrorResponse>)> {
    match state.planner.run_cycle().await {
        Ok(summary) => {
            *state.last_cycle.write().await = Some(summary.clone());
            Ok(Json(summary))
        }
        Err(e) => {
            error!(error = %e, "planning cycle failed");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: e.to_string(),
                }),
            ))
        }
    }
}

/// Ad-hoc submission body.
#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    pub code: String,
    pub deadline_utc: DateTime<Utc>,
    pub memory_mb: u32,
    #[serde(default)]
    pub requirements: Vec<String>,
    /// Estimated runtime; a conservative default applies when omitted.
    #[serde(default)]
    pub runtime_ms: Option<u64>,
    #[serde(default)]
    pub source_region: Option<String>,
    #[serde(default)]
    pub allowed_regions: Option<BTreeSet<String>>,
    #[serde(default)]
    pub weights: Option<Weights>,
}

#[derive(Serialize)]
struct SubmitResponse {
    function_id: FunctionId,
    scheduled_region: String,
    scheduled_for_utc: DateTime<Utc>,
    carbon_intensity_g_per_kwh: f64,
    schedule_object: String,
}

/// Plans, deploys, and schedules one ad-hoc function.
async fn submit(
    State(state): State<Arc<AppState>>,
    body: Result<Json<SubmitRequest>, JsonRejection>,
) -> Result<Json<SubmitResponse>, (StatusCode, Json<ErrorResponse>)> {
    let Json(request) = body.map_err(|e| bad_request(e.to_string()))?;

    if request.code.trim().is_empty() {
        return Err(bad_request("code must not be empty".into()));
    }
    if request.memory_mb == 0 {
        return Err(bad_request("memory_mb must be positive".into()));
    }

    let deadline_hours = (request.deadline_utc - Utc::now()).num_hours().max(0) as u32;
    let metadata = build_metadata(&state, request, deadline_hours).map_err(bad_request)?;
    let function_id = metadata.function_id.clone();

    match state.planner.plan_single(metadata).await {
        Ok((schedule, _report)) => {
            let top = schedule
                .ranked()
                .first()
                .map(|r| (*r).clone())
                .ok_or_else(|| bad_request("empty schedule".into()))?;
            Ok(Json(SubmitResponse {
                function_id: function_id.clone(),
                scheduled_region: top.region,
                scheduled_for_utc: top.hour_start_utc,
                carbon_intensity_g_per_kwh: top.carbon_intensity_g_per_kwh,
                schedule_object: layout::schedule(function_id.as_str()),
            }))
        }
        Err(e) => {
            error!(error = %e, "ad-hoc submission failed");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: e.to_string(),
                }),
            ))
        }
    }
}

fn bad_request(message: String) -> (StatusCode, Json<ErrorResponse>) {
    (StatusCode::BAD_REQUEST, Json(ErrorResponse { error: message }))
}

/// Builds metadata for an ad-hoc submission, defaulting the fields the
/// body leaves open.
fn build_metadata(
    state: &AppState,
    request: SubmitRequest,
    deadline_hours: u32,
) -> Result<FunctionMetadata, String> {
    let source_region = request
        .source_region
        .or_else(|| {
            if state.planning_region.is_empty() {
                state.catalog.region_keys().next().map(String::from)
            } else {
                Some(state.planning_region.clone())
            }
        })
        .ok_or_else(|| "no source region available".to_string())?;

    let allowed_regions = request
        .allowed_regions
        .unwrap_or_else(|| state.catalog.region_keys().map(String::from).collect());

    let short_id = Uuid::new_v4().simple().to_string();
    let metadata = FunctionMetadata {
        function_id: FunctionId::new(format!("user-func-{}", &short_id[..8])),
        runtime_ms: request.runtime_ms.unwrap_or(5000),
        memory_mb: request.memory_mb,
        vcpus: None,
        gpu_required: false,
        gpu_type: None,
        data_input_gb: 0.0,
        data_output_gb: 0.0,
        source_region,
        invocations_per_day: 1,
        allowed_regions,
        weights: request.weights.unwrap_or_default(),
        deadline_hours,
        cpu_utilization: None,
        artifact: Some(ArtifactSpec {
            code: request.code,
            requirements: request.requirements,
            entry_point: None,
        }),
        allow_schedule_caching: false,
    };
    metadata
        .validate(&state.catalog)
        .map_err(|e| e.to_string())?;
    Ok(metadata)
}
