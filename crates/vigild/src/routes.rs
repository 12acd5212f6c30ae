//! API routes for vigild
//!
//! - `POST /v1/query`   structured query against the current snapshot
//! - `GET  /v1/status`  knowledge base status
//! - `GET  /v1/stats`   aggregate statistics of the current snapshot
//! - `POST /v1/refresh` trigger or join a build and wait for it
//! - `GET  /v1/health`  liveness

use crate::knowledge::{BuildReport, CollectionError};
use crate::server::AppState;
use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tower_http::timeout::TimeoutLayer;
use tracing::{info, warn};
use vigil_common::error::QueryErrorBody;
use vigil_common::{AggregateStats, KnowledgeStatus, QueryError, QueryResponse, StructuredQuery};

type AppStateArc = Arc<AppState>;

/// Queries run in memory; anything slower than this is a bug
const QUERY_TIMEOUT: Duration = Duration::from_secs(10);

fn query_error(e: QueryError) -> (StatusCode, Json<QueryErrorBody>) {
    let status = match e {
        QueryError::UnknownMetric(_)
        | QueryError::InvalidPredicate(_)
        | QueryError::InvalidQuery(_) => StatusCode::BAD_REQUEST,
        QueryError::UnknownService(_) => StatusCode::NOT_FOUND,
        QueryError::NotReady => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status, Json(e.to_body()))
}

// ============================================================================
// Query Routes
// ============================================================================

pub fn query_routes() -> Router<AppStateArc> {
    Router::new()
        .route("/v1/query", post(run_query))
        .layer(TimeoutLayer::new(QUERY_TIMEOUT))
}

async fn run_query(
    State(state): State<AppStateArc>,
    payload: Result<Json<StructuredQuery>, JsonRejection>,
) -> Result<Json<QueryResponse>, (StatusCode, Json<QueryErrorBody>)> {
    let Json(query) = payload.map_err(|rejection| {
        warn!("  Malformed query body: {}", rejection.body_text());
        query_error(QueryError::InvalidQuery(rejection.body_text()))
    })?;
    info!("  Query: {}", query.action());

    state.kb.query(&query).map(Json).map_err(|e| {
        warn!("  Query rejected: {}", e);
        query_error(e)
    })
}

// ============================================================================
// Status Routes
// ============================================================================

pub fn status_routes() -> Router<AppStateArc> {
    Router::new()
        .route("/v1/status", get(get_status))
        .route("/v1/stats", get(get_stats))
}

async fn get_status(State(state): State<AppStateArc>) -> Json<KnowledgeStatus> {
    Json(state.kb.status())
}

async fn get_stats(
    State(state): State<AppStateArc>,
) -> Result<Json<AggregateStats>, (StatusCode, Json<QueryErrorBody>)> {
    let snapshot = state
        .kb
        .current_snapshot()
        .ok_or_else(|| query_error(QueryError::NotReady))?;
    Ok(Json(snapshot.stats().clone()))
}

// ============================================================================
// Refresh Routes
// ============================================================================

pub fn refresh_routes() -> Router<AppStateArc> {
    Router::new().route("/v1/refresh", post(refresh))
}

async fn refresh(
    State(state): State<AppStateArc>,
) -> Result<Json<BuildReport>, (StatusCode, Json<CollectionError>)> {
    let handle = state.kb.trigger_refresh();
    info!(
        "  Manual refresh {}",
        if handle.joined() { "joined in-flight build" } else { "started" }
    );

    handle.wait().await.map(Json).map_err(|e| {
        warn!("  Manual refresh failed: {}", e);
        (StatusCode::BAD_GATEWAY, Json(e))
    })
}

// ============================================================================
// Health Routes
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub ready: bool,
}

pub fn health_routes() -> Router<AppStateArc> {
    Router::new().route("/v1/health", get(health))
}

async fn health(State(state): State<AppStateArc>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        ready: state.kb.current_snapshot().is_some(),
    })
}
