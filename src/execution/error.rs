//! Orchestrator errors

use crate::core::{ConfigError, StageStatus};
use crate::persistence::StoreError;
use thiserror::Error;
use uuid::Uuid;

/// Errors surfaced synchronously to callers of the orchestrator
///
/// Stage execution failures are never returned here; they are recorded
/// in the run and observable through `status`.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Invalid pipeline definition: {0}")]
    Config(#[from] ConfigError),

    #[error("Event does not match the trigger of pipeline '{0}'")]
    TriggerMismatch(String),

    #[error("'{actor}' is not an approver for stage '{stage_id}'")]
    Unauthorized { stage_id: String, actor: String },

    #[error("Stage '{stage_id}' is {actual}, expected {expected}")]
    InvalidState {
        stage_id: String,
        expected: String,
        actual: StageStatus,
    },

    #[error("Run {0} is already finished")]
    RunFinished(Uuid),

    #[error("Run {0} not found")]
    RunNotFound(Uuid),

    #[error("Stage '{stage_id}' not found in run {run_id}")]
    StageNotFound { run_id: Uuid, stage_id: String },

    #[error("Pipeline '{0}' not registered")]
    PipelineNotFound(String),

    #[error("Pipeline '{existing}' already uses this trigger configuration")]
    DuplicateTrigger { existing: String },

    #[error("Run store error: {0}")]
    Store(StoreError),
}

impl From<StoreError> for OrchestratorError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::RunNotFound(id) => OrchestratorError::RunNotFound(id),
            StoreError::StageNotFound { run_id, stage_id } => {
                OrchestratorError::StageNotFound { run_id, stage_id }
            }
            other => OrchestratorError::Store(other),
        }
    }
}

impl OrchestratorError {
    /// Taxonomy code reported by the API
    pub fn code(&self) -> &'static str {
        match self {
            OrchestratorError::Config(_) => "CONFIG_ERROR",
            OrchestratorError::TriggerMismatch(_) => "TRIGGER_MISMATCH",
            OrchestratorError::Unauthorized { .. } => "UNAUTHORIZED",
            OrchestratorError::InvalidState { .. } | OrchestratorError::RunFinished(_) => "INVALID_STATE",
            OrchestratorError::RunNotFound(_)
            | OrchestratorError::StageNotFound { .. }
            | OrchestratorError::PipelineNotFound(_) => "NOT_FOUND",
            OrchestratorError::DuplicateTrigger { .. } => "DUPLICATE_TRIGGER",
            OrchestratorError::Store(_) => "STORE_ERROR",
        }
    }
}
