//! Integration tests for the dispatch endpoint.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::{DateTime, DurationRound, Utc};
use serde_json::json;
use tower::ServiceExt;

use verdant_core::{ForecastMode, FunctionId, Recommendation, RegionDeployment, Schedule};
use verdant_dispatcher::api::{router, AppState, Forwarder};
use verdant_dispatcher::{IdempotencyCache, InMemoryTaskQueue, ScheduleCache};
use verdant_store::{layout, BucketStore};
use verdant_telemetry::{Recorder, RecorderConfig};

fn current_hour() -> DateTime<Utc> {
    Utc::now()
        .duration_trunc(chrono::Duration::hours(1))
        .unwrap()
}

fn rec(priority: u32, region: &str, hour_offset: i64, ci: f64) -> Recommendation {
    Recommendation {
        priority,
        region: region.to_string(),
        hour_start_utc: current_hour() + chrono::Duration::hours(hour_offset),
        carbon_intensity_g_per_kwh: ci,
        transfer_cost_usd: 0.0,
        rationale: String::new(),
    }
}

fn deployment(regions: &[(&str, &str)]) -> BTreeMap<String, RegionDeployment> {
    regions
        .iter()
        .map(|(region, url)| {
            (
                region.to_string(),
                RegionDeployment {
                    url: url.to_string(),
                    code_hash: "abc".to_string(),
                    deployed_at_utc: Utc::now(),
                },
            )
        })
        .collect()
}

fn schedule(
    recommendations: Vec<Recommendation>,
    deployment: BTreeMap<String, RegionDeployment>,
) -> Schedule {
    Schedule {
        function_id: FunctionId::new("vid"),
        horizon_start_utc: current_hour(),
        generated_at_utc: Utc::now(),
        mode: ForecastMode::Forecast,
        recommendations,
        deployment,
        metadata_hash: "00".to_string(),
    }
}

struct TestDispatcher {
    state: Arc<AppState>,
    queue: Arc<InMemoryTaskQueue>,
}

async fn dispatcher_with(schedule: Schedule) -> TestDispatcher {
    let store = BucketStore::in_memory();
    store
        .put_json_atomic(&layout::schedule("vid"), &schedule)
        .await
        .unwrap();

    let queue = Arc::new(InMemoryTaskQueue::new());
    let state = Arc::new(AppState {
        store: store.clone(),
        schedules: ScheduleCache::new(store.clone(), Duration::from_secs(60)),
        queue: queue.clone(),
        idempotency: IdempotencyCache::new(24),
        recorder: Arc::new(Recorder::new(store, RecorderConfig::default())),
        forwarder: Forwarder::new(Duration::from_secs(2)).unwrap(),
    });
    TestDispatcher { state, queue }
}

fn dispatch_request(request_id: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/dispatch/vid")
        .header("content-type", "application/json");
    if let Some(rid) = request_id {
        builder = builder.header("x-request-id", rid);
    }
    builder
        .body(Body::from(r#"{"video": "a.mp4"}"#))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn future_slot_is_deferred_with_202() {
    // Priority 1 at the next hour in r2; the request is enqueued for
    // that hour rather than run in the worse active slot.
    let test = dispatcher_with(schedule(
        vec![rec(1, "r2", 1, 50.0), rec(2, "r1", 0, 200.0)],
        deployment(&[
            ("r1", "https://r1.functions.test/vid"),
            ("r2", "https://r2.functions.test/vid"),
        ]),
    ))
    .await;
    let app = router(test.state.clone());

    let response = app.oneshot(dispatch_request(None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let body = body_json(response).await;
    assert_eq!(body["region"], "r2");
    let scheduled: DateTime<Utc> =
        serde_json::from_value(body["scheduled_for_utc"].clone()).unwrap();
    assert_eq!(scheduled, current_hour() + chrono::Duration::hours(1));
    assert!(body["task_id"].as_str().is_some());

    let tasks = test.queue.tasks();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].1.not_before_utc, scheduled);
    assert_eq!(tasks[0].1.target_url, "https://r2.functions.test/vid");
    assert_eq!(tasks[0].1.payload, json!({"video": "a.mp4"}));
}

#[tokio::test]
async fn repeated_request_id_returns_same_task() {
    let test = dispatcher_with(schedule(
        vec![rec(1, "r2", 1, 50.0)],
        deployment(&[("r2", "https://r2.functions.test/vid")]),
    ))
    .await;

    let first = router(test.state.clone())
        .oneshot(dispatch_request(Some("req-42")))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::ACCEPTED);
    let first_body = body_json(first).await;

    let second = router(test.state.clone())
        .oneshot(dispatch_request(Some("req-42")))
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::ACCEPTED);
    let second_body = body_json(second).await;

    assert_eq!(first_body["task_id"], second_body["task_id"]);
    assert_eq!(
        first_body["scheduled_for_utc"],
        second_body["scheduled_for_utc"]
    );
    // Only one task ever reached the queue.
    assert_eq!(test.queue.tasks().len(), 1);
}

#[tokio::test]
async fn unknown_function_is_404() {
    let test = dispatcher_with(schedule(
        vec![rec(1, "r2", 1, 50.0)],
        deployment(&[("r2", "https://r2.functions.test/vid")]),
    ))
    .await;
    let app = router(test.state.clone());

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/dispatch/nope")
                .header("content-type", "application/json")
                .body(Body::from("{}"))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn missing_url_falls_back_to_next_ranked_slot() {
    // Priority 1 region has no deployment; priority 2 does.
    let test = dispatcher_with(schedule(
        vec![rec(1, "r1", 1, 50.0), rec(2, "r2", 2, 60.0)],
        deployment(&[("r2", "https://r2.functions.test/vid")]),
    ))
    .await;
    let app = router(test.state.clone());

    let response = app.oneshot(dispatch_request(None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let body = body_json(response).await;
    assert_eq!(body["region"], "r2");
}

#[tokio::test]
async fn no_deployed_url_anywhere_is_503() {
    let test = dispatcher_with(schedule(
        vec![rec(1, "r1", 0, 50.0)],
        BTreeMap::new(),
    ))
    .await;
    let app = router(test.state.clone());

    let response = app.oneshot(dispatch_request(None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn fully_expired_schedule_is_503() {
    let test = dispatcher_with(schedule(
        vec![rec(1, "r1", -3, 50.0), rec(2, "r2", -2, 60.0)],
        deployment(&[("r1", "https://r1.functions.test/vid")]),
    ))
    .await;
    let app = router(test.state.clone());

    let response = app.oneshot(dispatch_request(None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn unreachable_active_target_is_502() {
    // The only viable slot is active now, but nothing listens at the
    // deployed URL.
    let test = dispatcher_with(schedule(
        vec![rec(1, "r1", 0, 50.0)],
        deployment(&[("r1", "http://127.0.0.1:9/vid")]),
    ))
    .await;
    let app = router(test.state.clone());

    let response = app.oneshot(dispatch_request(None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn malformed_payload_is_400() {
    let test = dispatcher_with(schedule(
        vec![rec(1, "r2", 1, 50.0)],
        deployment(&[("r2", "https://r2.functions.test/vid")]),
    ))
    .await;
    let app = router(test.state.clone());

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/dispatch/vid")
                .header("content-type", "application/json")
                .body(Body::from("{not json"))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
