// src/api.rs
//! Status API: health, today's upload capacity, ad-hoc scoring, metrics.

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tracing::error;

use crate::dispatch::{CapacityReport, QuotaAwareDispatcher};
use crate::metrics::Metrics;
use crate::opportunity::{Opportunity, OpportunityScorer, ScoredOpportunity};

#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<QuotaAwareDispatcher>,
    pub scorer: Arc<OpportunityScorer>,
}

pub fn create_router(state: AppState, metrics: Option<&Metrics>) -> Router {
    let router = Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/capacity", get(capacity))
        .route("/score", post(score))
        .layer(CorsLayer::very_permissive())
        .with_state(state);

    match metrics {
        Some(m) => router.merge(m.router()),
        None => router,
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ScoreReq {
    Many(Vec<Opportunity>),
    One(Opportunity),
}

#[derive(serde::Serialize)]
struct ErrorResp {
    error: String,
}

async fn capacity(
    State(state): State<AppState>,
) -> Result<Json<CapacityReport>, (StatusCode, Json<ErrorResp>)> {
    let dispatcher = state.dispatcher.clone();
    // ledger reads take a file lock
    let res = tokio::task::spawn_blocking(move || dispatcher.estimate_remaining_capacity()).await;
    match res {
        Ok(Ok(report)) => Ok(Json(report)),
        Ok(Err(e)) => {
            error!(error = %e, "capacity estimate failed");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResp { error: e.to_string() }),
            ))
        }
        Err(e) => Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResp { error: e.to_string() }),
        )),
    }
}

/// Ranked, best first. Competitor counts are taken as given.
async fn score(State(state): State<AppState>, Json(body): Json<ScoreReq>) -> Json<Vec<ScoredOpportunity>> {
    let candidates = match body {
        ScoreReq::Many(v) => v,
        ScoreReq::One(o) => vec![o],
    };
    Json(state.scorer.rank(&candidates))
}
