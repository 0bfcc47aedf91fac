//! Run store - durable keyed storage of run state
//!
//! The orchestrator never mutates a [`Run`] directly. Every stage
//! transition goes through [`RunStore::compare_and_set_stage`], which is
//! what keeps concurrent `advance` calls from dispatching a stage twice.

#[cfg(feature = "sqlite")]
pub mod store;

#[cfg(feature = "sqlite")]
pub use store::SqliteRunStore;

use crate::core::{ApprovalRecord, Run, StageStatus, StageTransition};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Errors from a run store backend
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Run {0} not found")]
    RunNotFound(Uuid),

    #[error("Stage '{stage_id}' not found in run {run_id}")]
    StageNotFound { run_id: Uuid, stage_id: String },

    #[error("Run {0} already exists")]
    AlreadyExists(Uuid),

    #[error("Corrupt run record: {0}")]
    Corrupt(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[cfg(feature = "sqlite")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Trait for run store backends
#[async_trait::async_trait]
pub trait RunStore: Send + Sync {
    /// Persist a newly created run
    async fn create(&self, run: &Run) -> Result<(), StoreError>;

    /// Load a run by ID
    async fn get(&self, run_id: Uuid) -> Result<Option<Run>, StoreError>;

    /// Atomically apply `transition` to one stage if its current status is in `expected`
    ///
    /// A transition carrying an approval appends it in the same step.
    /// Returns `false`, leaving the run untouched, when the status did not match.
    async fn compare_and_set_stage(
        &self,
        run_id: Uuid,
        stage_id: &str,
        expected: &[StageStatus],
        transition: &StageTransition,
    ) -> Result<bool, StoreError>;

    /// Append an approval or rejection to the run
    async fn record_approval(&self, run_id: Uuid, approval: &ApprovalRecord) -> Result<(), StoreError>;

    /// Recompute the overall status from the stage records and return the run
    async fn refresh_status(&self, run_id: Uuid) -> Result<Run, StoreError>;

    /// Runs with at least one non-terminal stage
    async fn list_active(&self) -> Result<Vec<Run>, StoreError>;

    /// Most recent runs first, optionally for one pipeline
    async fn list_runs(&self, pipeline_name: Option<&str>, limit: usize) -> Result<Vec<Run>, StoreError>;
}

/// In-memory run store (for testing or ephemeral use)
///
/// Each run sits behind its own mutex, so operations on different runs
/// never contend.
pub struct InMemoryRunStore {
    runs: RwLock<HashMap<Uuid, Arc<Mutex<Run>>>>,
}

impl InMemoryRunStore {
    pub fn new() -> Self {
        Self {
            runs: RwLock::new(HashMap::new()),
        }
    }

    async fn entry(&self, run_id: Uuid) -> Result<Arc<Mutex<Run>>, StoreError> {
        self.runs
            .read()
            .await
            .get(&run_id)
            .cloned()
            .ok_or(StoreError::RunNotFound(run_id))
    }

    fn snapshot(entries: Vec<Arc<Mutex<Run>>>) -> Vec<Run> {
        entries
            .iter()
            .map(|entry| lock(entry).clone())
            .collect()
    }
}

impl Default for InMemoryRunStore {
    fn default() -> Self {
        Self::new()
    }
}

fn lock(entry: &Mutex<Run>) -> std::sync::MutexGuard<'_, Run> {
    // A panic while holding the guard cannot leave a half-applied transition behind.
    entry.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait::async_trait]
impl RunStore for InMemoryRunStore {
    async fn create(&self, run: &Run) -> Result<(), StoreError> {
        let mut runs = self.runs.write().await;
        if runs.contains_key(&run.id) {
            return Err(StoreError::AlreadyExists(run.id));
        }
        runs.insert(run.id, Arc::new(Mutex::new(run.clone())));
        Ok(())
    }

    async fn get(&self, run_id: Uuid) -> Result<Option<Run>, StoreError> {
        let runs = self.runs.read().await;
        Ok(runs.get(&run_id).map(|entry| lock(entry).clone()))
    }

    async fn compare_and_set_stage(
        &self,
        run_id: Uuid,
        stage_id: &str,
        expected: &[StageStatus],
        transition: &StageTransition,
    ) -> Result<bool, StoreError> {
        let entry = self.entry(run_id).await?;
        let mut run = lock(&entry);

        let record = run.stage_mut(stage_id).ok_or_else(|| StoreError::StageNotFound {
            run_id,
            stage_id: stage_id.to_string(),
        })?;

        if !expected.contains(&record.status) {
            return Ok(false);
        }

        record.apply(transition, Utc::now());
        if let Some(approval) = &transition.approval {
            run.approvals.push(approval.clone());
        }
        Ok(true)
    }

    async fn record_approval(&self, run_id: Uuid, approval: &ApprovalRecord) -> Result<(), StoreError> {
        let entry = self.entry(run_id).await?;
        lock(&entry).approvals.push(approval.clone());
        Ok(())
    }

    async fn refresh_status(&self, run_id: Uuid) -> Result<Run, StoreError> {
        let entry = self.entry(run_id).await?;
        let mut run = lock(&entry);
        run.refresh(Utc::now());
        Ok(run.clone())
    }

    async fn list_active(&self) -> Result<Vec<Run>, StoreError> {
        let entries: Vec<_> = self.runs.read().await.values().cloned().collect();
        let mut active: Vec<Run> = Self::snapshot(entries)
            .into_iter()
            .filter(|run| !run.is_settled())
            .collect();
        active.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(active)
    }

    async fn list_runs(&self, pipeline_name: Option<&str>, limit: usize) -> Result<Vec<Run>, StoreError> {
        let entries: Vec<_> = self.runs.read().await.values().cloned().collect();
        let mut runs: Vec<Run> = Self::snapshot(entries)
            .into_iter()
            .filter(|run| pipeline_name.map_or(true, |name| run.pipeline_name == name))
            .collect();
        runs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        runs.truncate(limit);
        Ok(runs)
    }
}
