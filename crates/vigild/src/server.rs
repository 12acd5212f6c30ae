//! HTTP server for vigild

use crate::knowledge::KnowledgeBase;
use crate::routes;
use anyhow::{Context, Result};
use axum::Router;
use std::sync::Arc;
use std::time::Instant;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Application state shared across handlers
pub struct AppState {
    pub kb: KnowledgeBase,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(kb: KnowledgeBase) -> Self {
        Self {
            kb,
            start_time: Instant::now(),
        }
    }
}

/// Full router with tracing, ready to serve or to drive from tests
pub fn router(state: AppState) -> Router {
    let state = Arc::new(state);

    Router::new()
        .merge(routes::query_routes())
        .merge(routes::status_routes())
        .merge(routes::refresh_routes())
        .merge(routes::health_routes())
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Run the HTTP server
pub async fn run(state: AppState, addr: &str) -> Result<()> {
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("  Listening on http://{}", addr);

    axum::serve(listener, app).await?;
    Ok(())
}
