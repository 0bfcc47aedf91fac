//! Trigger, status and approval handlers

use crate::api::error::{ApiError, ApiResult};
use crate::api::ACTOR_HEADER;
use crate::core::{Run, TriggerEvent};
use crate::execution::Orchestrator;
use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

const DEFAULT_HISTORY_LIMIT: usize = 20;

/// Caller identity from the auth proxy header
fn actor(headers: &HeaderMap) -> ApiResult<String> {
    headers
        .get(ACTOR_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|actor| !actor.is_empty())
        .map(str::to_string)
        .ok_or(ApiError::MissingActor)
}

/// POST /triggers
/// Start a run for every pipeline matching the event
pub async fn trigger(
    State(orchestrator): State<Orchestrator>,
    Json(event): Json<TriggerEvent>,
) -> ApiResult<Json<Vec<Run>>> {
    tracing::info!(
        "Trigger: {} on {}/{} by {}",
        event.kind,
        event.repository,
        event.branch,
        event.actor
    );
    Ok(Json(orchestrator.trigger(event).await?))
}

/// GET /runs
pub async fn list_active(State(orchestrator): State<Orchestrator>) -> ApiResult<Json<Vec<Run>>> {
    Ok(Json(orchestrator.list_active().await?))
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub pipeline: Option<String>,
    pub limit: Option<usize>,
}

/// GET /runs/history
pub async fn history(
    State(orchestrator): State<Orchestrator>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Json<Vec<Run>>> {
    let runs = orchestrator
        .list_runs(
            query.pipeline.as_deref(),
            query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT),
        )
        .await?;
    Ok(Json(runs))
}

/// GET /runs/{run_id}
pub async fn get_run(
    State(orchestrator): State<Orchestrator>,
    Path(run_id): Path<Uuid>,
) -> ApiResult<Json<Run>> {
    tracing::debug!("Getting run: {}", run_id);
    Ok(Json(orchestrator.status(run_id).await?))
}

/// POST /runs/{run_id}/stages/{stage_id}/approve
pub async fn approve(
    State(orchestrator): State<Orchestrator>,
    Path((run_id, stage_id)): Path<(Uuid, String)>,
    headers: HeaderMap,
) -> ApiResult<Json<Run>> {
    let actor = actor(&headers)?;
    Ok(Json(orchestrator.approve(run_id, &stage_id, &actor).await?))
}

/// POST /runs/{run_id}/stages/{stage_id}/reject
pub async fn reject(
    State(orchestrator): State<Orchestrator>,
    Path((run_id, stage_id)): Path<(Uuid, String)>,
    headers: HeaderMap,
) -> ApiResult<Json<Run>> {
    let actor = actor(&headers)?;
    Ok(Json(orchestrator.reject(run_id, &stage_id, &actor).await?))
}

/// POST /runs/{run_id}/cancel
pub async fn cancel(
    State(orchestrator): State<Orchestrator>,
    Path(run_id): Path<Uuid>,
    headers: HeaderMap,
) -> ApiResult<Json<Run>> {
    let actor = actor(&headers)?;
    tracing::info!("Cancel of run {} requested by {}", run_id, actor);
    Ok(Json(orchestrator.cancel(run_id).await?))
}
