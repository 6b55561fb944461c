//! Dispatch HTTP API.
//!
//! One endpoint does the work: `POST /dispatch/{function_id}` consults
//! the function's active schedule and either forwards the request to
//! the chosen region immediately or enqueues it for the chosen future
//! hour. Regions without a deployed URL and targets that fail are
//! skipped in favour of the next-ranked slot.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use verdant_core::FunctionId;
use verdant_store::{layout, BucketStore};
use verdant_telemetry::{DispatchDecision, Event, Recorder};

use crate::error::{DispatchError, Result};
use crate::idempotency::{IdempotencyCache, StoredDecision};
use crate::queue::{DelayedTask, TaskQueue};
use crate::schedule_cache::ScheduleCache;
use crate::slot::{viable_slots, SlotKind};

/// Forwards requests to deployed function URLs.
pub struct Forwarder {
    client: Client,
}

impl Forwarder {
    /// Creates a forwarder with the given per-call timeout.
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DispatchError::Internal(format!("building client: {e}")))?;
        Ok(Self { client })
    }

    /// POSTs the payload to a target; a reachable function that answers
    /// below 500 counts as delivered, and its response is relayed.
    pub async fn forward(&self, url: &str, payload: &Value) -> Result<(u16, Vec<u8>)> {
        let response = self
            .client
            .post(url)
            .json(payload)
            .send()
            .await
            .map_err(|e| DispatchError::TargetsFailed(format!("{url}: {e}")))?;

        let status = response.status();
        if status.is_server_error() {
            return Err(DispatchError::TargetsFailed(format!("{url}: {status}")));
        }
        let body = response
            .bytes()
            .await
            .map_err(|e| DispatchError::TargetsFailed(format!("{url}: {e}")))?;
        Ok((status.as_u16(), body.to_vec()))
    }
}

/// Shared application state.
pub struct AppState {
    pub store: BucketStore,
    pub schedules: ScheduleCache,
    pub queue: Arc<dyn TaskQueue>,
    pub idempotency: IdempotencyCache,
    pub recorder: Arc<Recorder>,
    pub forwarder: Forwarder,
}

/// Creates the dispatcher router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/dispatch/{function_id}", post(dispatch))
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    bucket_reachable: bool,
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let bucket_reachable = state
        .store
        .exists(layout::STATIC_CONFIG)
        .await
        .unwrap_or(false);
    let status = if bucket_reachable {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(HealthResponse {
            status: if bucket_reachable {
                "healthy"
            } else {
                "misconfigured"
            },
            bucket_reachable,
        }),
    )
}

/// Deferral response body.
#[derive(Serialize)]
struct DeferResponse {
    task_id: String,
    scheduled_for_utc: DateTime<Utc>,
    region: String,
}

/// Dispatches one request per the function's active schedule.
async fn dispatch(
    State(state): State<Arc<AppState>>,
    Path(function_id): Path<String>,
    headers: HeaderMap,
    body: std::result::Result<Json<Value>, JsonRejection>,
) -> Result<Response> {
    let Json(payload) =
        body.map_err(|e| DispatchError::InvalidRequest(e.to_string()))?;

    let request_id = headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(String::from);

    // Repeats inside the window replay the original decision.
    if let Some(rid) = &request_id {
        if let Some(decision) = state.idempotency.get(rid) {
            info!(function = %function_id, request_id = %rid, "replaying idempotent decision");
            return Ok(replay(decision));
        }
    }

    let schedule = state.schedules.get(&function_id).await?;
    let now = Utc::now();
    let slots = viable_slots(&schedule, now);
    if slots.is_empty() {
        return Err(DispatchError::NoViableSlot(function_id));
    }

    let effective_request_id = request_id
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let mut targets_attempted = false;

    for slot in &slots {
        let rec = slot.recommendation;
        let Some(url) = schedule.url_for(&rec.region) else {
            // Not deployed there yet; try the next-ranked slot.
            continue;
        };

        match slot.kind {
            SlotKind::Deferred => {
                let task_id = state
                    .queue
                    .enqueue(DelayedTask {
                        target_url: url.to_string(),
                        payload: payload.clone(),
                        not_before_utc: rec.hour_start_utc,
                    })
                    .await?;
                info!(
                    function = %function_id,
                    region = %rec.region,
                    task_id = %task_id,
                    scheduled_for = %rec.hour_start_utc,
                    "request deferred"
                );

                emit_dispatch(
                    &state,
                    &effective_request_id,
                    &function_id,
                    DispatchDecision::Deferred,
                    rec.region.clone(),
                    rec.hour_start_utc,
                    Some(task_id.clone()),
                    rec.carbon_intensity_g_per_kwh,
                    rec.transfer_cost_usd,
                )
                .await;

                let decision = StoredDecision::Deferred {
                    region: rec.region.clone(),
                    task_id,
                    scheduled_for_utc: rec.hour_start_utc,
                };
                if let Some(rid) = &request_id {
                    state.idempotency.insert(rid, decision.clone());
                }
                return Ok(replay(decision));
            }
            SlotKind::Now => match state.forwarder.forward(url, &payload).await {
                Ok((status, response_body)) => {
                    info!(
                        function = %function_id,
                        region = %rec.region,
                        status,
                        "request forwarded"
                    );

                    emit_dispatch(
                        &state,
                        &effective_request_id,
                        &function_id,
                        DispatchDecision::Forwarded,
                        rec.region.clone(),
                        rec.hour_start_utc,
                        None,
                        rec.carbon_intensity_g_per_kwh,
                        rec.transfer_cost_usd,
                    )
                    .await;

                    let decision = StoredDecision::Forwarded {
                        region: rec.region.clone(),
                        hour_start_utc: rec.hour_start_utc,
                        status,
                        body: response_body,
                    };
                    if let Some(rid) = &request_id {
                        state.idempotency.insert(rid, decision.clone());
                    }
                    return Ok(replay(decision));
                }
                Err(e) => {
                    warn!(
                        function = %function_id,
                        region = %rec.region,
                        error = %e,
                        "target failed, trying next slot"
                    );
                    targets_attempted = true;
                }
            },
        }
    }

    if targets_attempted {
        Err(DispatchError::TargetsFailed(function_id))
    } else {
        Err(DispatchError::NoViableSlot(function_id))
    }
}

/// Renders a stored decision as an HTTP response.
fn replay(decision: StoredDecision) -> Response {
    match decision {
        StoredDecision::Forwarded { status, body, .. } => (
            StatusCode::from_u16(status).unwrap_or(StatusCode::OK),
            [(header::CONTENT_TYPE, "application/json")],
            body,
        )
            .into_response(),
        StoredDecision::Deferred {
            region,
            task_id,
            scheduled_for_utc,
        } => (
            StatusCode::ACCEPTED,
            Json(DeferResponse {
                task_id,
                scheduled_for_utc,
                region,
            }),
        )
            .into_response(),
    }
}

#[allow(clippy::too_many_arguments)]
async fn emit_dispatch(
    state: &AppState,
    request_id: &str,
    function_id: &str,
    decision: DispatchDecision,
    region: String,
    hour_start_utc: DateTime<Utc>,
    task_id: Option<String>,
    forecast_g_per_kwh: f64,
    cost_usd: f64,
) {
    let event = Event::Dispatch {
        request_id: request_id.to_string(),
        function_id: FunctionId::new(function_id),
        decision,
        region,
        hour_start_utc,
        task_id,
        forecast_g_per_kwh,
        carbon_g: None,
        cost_usd,
    };
    if let Err(e) = state.recorder.record(event).await {
        warn!(error = %e, "failed to record dispatch event");
    }
}
