//! Router configuration for the ingestion server.

use axum::routing::{get, post};
use axum::Router;

use super::health::{health_check, metrics, readiness_check};
use super::ingest::capture_link;
use super::state::AppState;

/// Build the complete Axum router.
#[must_use]
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/metrics", get(metrics))
        .route("/links", post(capture_link))
        .with_state(state)
}
