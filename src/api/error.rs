//! API error responses

use crate::execution::OrchestratorError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

#[derive(Debug)]
pub enum ApiError {
    /// No caller identity on a request that needs one
    MissingActor,
    Orchestrator(OrchestratorError),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::MissingActor => StatusCode::UNAUTHORIZED,
            ApiError::Orchestrator(err) => match err {
                OrchestratorError::Config(_) | OrchestratorError::DuplicateTrigger { .. } => {
                    StatusCode::BAD_REQUEST
                }
                OrchestratorError::TriggerMismatch(_) => StatusCode::UNPROCESSABLE_ENTITY,
                OrchestratorError::Unauthorized { .. } => StatusCode::FORBIDDEN,
                OrchestratorError::InvalidState { .. } | OrchestratorError::RunFinished(_) => {
                    StatusCode::CONFLICT
                }
                OrchestratorError::RunNotFound(_)
                | OrchestratorError::StageNotFound { .. }
                | OrchestratorError::PipelineNotFound(_) => StatusCode::NOT_FOUND,
                OrchestratorError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    fn code(&self) -> &'static str {
        match self {
            ApiError::MissingActor => "UNAUTHENTICATED",
            ApiError::Orchestrator(err) => err.code(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            ApiError::MissingActor => "Missing X-Conduit-Actor header".to_string(),
            ApiError::Orchestrator(OrchestratorError::Store(err)) => {
                tracing::error!("Run store error: {}", err);
                "Internal server error".to_string()
            }
            ApiError::Orchestrator(err) => err.to_string(),
        };

        (
            status,
            Json(serde_json::json!({ "error": message, "code": self.code() })),
        )
            .into_response()
    }
}

impl From<OrchestratorError> for ApiError {
    fn from(err: OrchestratorError) -> Self {
        ApiError::Orchestrator(err)
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
