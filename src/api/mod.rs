//! HTTP status and approval API

pub mod error;
pub mod health;
pub mod runs;

use crate::execution::Orchestrator;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

/// Header carrying the caller identity, set by the fronting auth proxy
pub const ACTOR_HEADER: &str = "x-conduit-actor";

/// Create the API router with all endpoints
pub fn create_router(orchestrator: Orchestrator) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/triggers", post(runs::trigger))
        .route("/runs", get(runs::list_active))
        .route("/runs/history", get(runs::history))
        .route("/runs/{run_id}", get(runs::get_run))
        .route("/runs/{run_id}/cancel", post(runs::cancel))
        .route("/runs/{run_id}/stages/{stage_id}/approve", post(runs::approve))
        .route("/runs/{run_id}/stages/{stage_id}/reject", post(runs::reject))
        .with_state(orchestrator)
        .layer(TraceLayer::new_for_http())
}
