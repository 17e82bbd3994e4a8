// tests/api_status.rs
//
// HTTP-level tests for the status API without opening sockets, via
// tower::ServiceExt::oneshot.
//
// Covered:
// - GET /health
// - GET /capacity (reads the ledger, never uploads)
// - POST /score (single object and array)
// - GET /metrics when metrics are mounted

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    body::{self, Body},
    http::{Request, StatusCode},
    Router,
};
use chrono::NaiveDate;
use serde_json::{json, Value};
use tower::ServiceExt as _;

use video_autopilot::api::{create_router, AppState};
use video_autopilot::clock::FixedClock;
use video_autopilot::dispatch::{Identity, MemoryLedgerStore, QuotaAwareDispatcher, QuotaLedger};
use video_autopilot::metrics::Metrics;
use video_autopilot::publish::{Artifact, PublishClient, PublishError, PublishedId, VideoMetadata};
use video_autopilot::OpportunityScorer;

const BODY_LIMIT: usize = 1024 * 1024;

struct NeverCalled;

#[async_trait]
impl PublishClient for NeverCalled {
    async fn attempt_publish(
        &self,
        _identity: &Identity,
        _artifact: &Artifact,
        _metadata: &VideoMetadata,
    ) -> Result<PublishedId, PublishError> {
        panic!("status api must not upload");
    }
}

fn state() -> AppState {
    let day = NaiveDate::from_ymd_opt(2026, 7, 1).unwrap();
    let mut seed = QuotaLedger::default();
    seed.mark_exhausted("2026-07-01", 1, day.and_hms_opt(7, 30, 0).unwrap());
    let pool = (1..=3).map(|i| Identity::new(i, format!("t{i}.json"))).collect();
    let dispatcher = QuotaAwareDispatcher::new(
        pool,
        Arc::new(NeverCalled),
        Arc::new(MemoryLedgerStore::new(seed)),
    )
    .with_clock(Arc::new(FixedClock::on(day)));
    AppState {
        dispatcher: Arc::new(dispatcher),
        scorer: Arc::new(OpportunityScorer::default()),
    }
}

fn app() -> Router {
    create_router(state(), None)
}

async fn json_body(resp: axum::response::Response) -> Value {
    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT)
        .await
        .expect("read body");
    serde_json::from_slice(&bytes).expect("json body")
}

#[tokio::test]
async fn health_is_ok() {
    let resp = app()
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT).await.unwrap();
    assert_eq!(&bytes[..], b"ok");
}

#[tokio::test]
async fn capacity_reports_todays_pool() {
    let resp = app()
        .oneshot(Request::get("/capacity").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let v = json_body(resp).await;
    assert_eq!(v["date"], "2026-07-01");
    assert_eq!(v["total"], 3);
    assert_eq!(v["available"], 2);
    assert_eq!(v["exhausted"], 1);
    assert_eq!(v["estimated_min_uploads"], 12);
    assert_eq!(v["estimated_max_uploads"], 20);
}

#[tokio::test]
async fn score_ranks_an_array_best_first() {
    let payload = json!([
        { "label": "weak", "search_volume": 10, "competitor_count": 5000 },
        { "label": "strong", "search_volume": 200000, "trend_velocity_percent": 2000.0,
          "competitor_count": 5, "category": "finance", "engagement_count": 60000,
          "freshness_days": 0.5 }
    ]);
    let resp = app()
        .oneshot(
            Request::post("/score")
                .header("content-type", "application/json")
                .body(Body::from(payload.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let v = json_body(resp).await;
    let arr = v.as_array().expect("array");
    assert_eq!(arr.len(), 2);
    assert_eq!(arr[0]["opportunity"]["label"], "strong");
    assert!(arr[0]["breakdown"]["total"].as_u64().unwrap() > arr[1]["breakdown"]["total"].as_u64().unwrap());
    assert!(arr[0]["breakdown"]["components"]["search_volume"].is_object());
}

#[tokio::test]
async fn score_accepts_a_single_object() {
    let resp = app()
        .oneshot(
            Request::post("/score")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"label":"Financial Anxiety","emotion":"Fear"}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let v = json_body(resp).await;
    assert_eq!(v.as_array().map(Vec::len), Some(1));
    // "anxiety" is evergreen
    assert_eq!(v[0]["breakdown"]["components"]["seasonality"]["points"], 10);
}

#[tokio::test]
async fn score_rejects_malformed_json() {
    let resp = app()
        .oneshot(
            Request::post("/score")
                .header("content-type", "application/json")
                .body(Body::from("{\"label\":"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert!(resp.status().is_client_error());
}

#[tokio::test]
async fn metrics_route_is_mounted_when_enabled() {
    let metrics = Metrics::init().expect("metrics init");
    let router = create_router(state(), Some(&metrics));

    // produce at least one series
    let _ = router
        .clone()
        .oneshot(
            Request::post("/score")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"label":"x"}"#))
                .unwrap(),
        )
        .await
        .unwrap();

    let resp = router
        .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT).await.unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("opportunities_scored_total"), "metrics body: {text}");
}
