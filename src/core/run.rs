//! Run model - one execution of a pipeline for one trigger event

use crate::core::{
    pipeline::Pipeline,
    state::{RunStatus, StageStatus},
    trigger::TriggerEvent,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Status and timestamps of one stage inside a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRecord {
    pub stage_id: String,
    pub status: StageStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Executor attempts, including infrastructure retries
    pub attempts: u32,
    /// Why the stage ended up in its status (failure reason, skip cause)
    pub message: Option<String>,
    /// Captured command output
    pub log: String,
}

impl StageRecord {
    pub fn new(stage_id: impl Into<String>) -> Self {
        Self {
            stage_id: stage_id.into(),
            status: StageStatus::Pending,
            started_at: None,
            finished_at: None,
            attempts: 0,
            message: None,
            log: String::new(),
        }
    }

    /// Apply a transition; the caller has already checked the expected status
    pub fn apply(&mut self, transition: &StageTransition, now: DateTime<Utc>) {
        self.status = transition.to;

        if transition.to == StageStatus::Running {
            self.started_at = Some(now);
        }
        if transition.to.is_terminal() {
            self.finished_at = Some(now);
        }
        self.attempts += transition.attempts;
        if let Some(message) = &transition.message {
            self.message = Some(message.clone());
        }
        if let Some(log) = &transition.log {
            self.log = log.clone();
        }
    }
}

/// A requested stage status change, applied atomically by the run store
#[derive(Debug, Clone, PartialEq)]
pub struct StageTransition {
    pub to: StageStatus,
    pub message: Option<String>,
    pub log: Option<String>,
    /// Attempts to add to the record
    pub attempts: u32,
    /// Gate decision stored together with the status change
    pub approval: Option<ApprovalRecord>,
}

impl StageTransition {
    pub fn to(status: StageStatus) -> Self {
        Self {
            to: status,
            message: None,
            log: None,
            attempts: 0,
            approval: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_log(mut self, log: impl Into<String>) -> Self {
        self.log = Some(log.into());
        self
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    pub fn with_approval(mut self, approval: ApprovalRecord) -> Self {
        self.approval = Some(approval);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApprovalDecision {
    Approved,
    Rejected,
}

impl ApprovalDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalDecision::Approved => "APPROVED",
            ApprovalDecision::Rejected => "REJECTED",
        }
    }
}

/// A decision recorded against a manual gate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRecord {
    pub stage_id: String,
    pub actor: String,
    pub decision: ApprovalDecision,
    pub decided_at: DateTime<Utc>,
}

/// One execution instance of a pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub id: Uuid,
    pub pipeline_name: String,
    pub pipeline_version: Option<String>,
    pub trigger: TriggerEvent,
    pub status: RunStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Stage records in declaration order
    pub stages: Vec<StageRecord>,
    pub approvals: Vec<ApprovalRecord>,
}

impl Run {
    /// Create a run with every stage PENDING
    pub fn new(pipeline: &Pipeline, trigger: TriggerEvent) -> Self {
        Self {
            id: Uuid::new_v4(),
            pipeline_name: pipeline.name.clone(),
            pipeline_version: pipeline.version.clone(),
            trigger,
            status: RunStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            stages: pipeline
                .stages()
                .iter()
                .map(|s| StageRecord::new(&s.id))
                .collect(),
            approvals: Vec::new(),
        }
    }

    pub fn stage(&self, id: &str) -> Option<&StageRecord> {
        self.stages.iter().find(|s| s.stage_id == id)
    }

    pub fn stage_mut(&mut self, id: &str) -> Option<&mut StageRecord> {
        self.stages.iter_mut().find(|s| s.stage_id == id)
    }

    pub fn stage_status(&self, id: &str) -> Option<StageStatus> {
        self.stage(id).map(|s| s.status)
    }

    /// Stage id -> status
    pub fn statuses(&self) -> HashMap<&str, StageStatus> {
        self.stages
            .iter()
            .map(|s| (s.stage_id.as_str(), s.status))
            .collect()
    }

    pub fn is_approved(&self, stage_id: &str) -> bool {
        self.approvals
            .iter()
            .any(|a| a.stage_id == stage_id && a.decision == ApprovalDecision::Approved)
    }

    pub fn is_rejected(&self) -> bool {
        self.approvals
            .iter()
            .any(|a| a.decision == ApprovalDecision::Rejected)
    }

    /// True when any stage failed or a gate was rejected
    pub fn has_failure(&self) -> bool {
        self.is_rejected() || self.stages.iter().any(|s| s.status == StageStatus::Failed)
    }

    /// Every stage reached a terminal status
    pub fn is_settled(&self) -> bool {
        self.stages.iter().all(|s| s.status.is_terminal())
    }

    pub fn derive_status(&self) -> RunStatus {
        RunStatus::derive(self.stages.iter().map(|s| s.status), self.is_rejected())
    }

    /// Recompute the overall status and timestamps from the stage records
    ///
    /// Returns true if anything changed.
    pub fn refresh(&mut self, now: DateTime<Utc>) -> bool {
        let before = (self.status, self.started_at, self.finished_at);

        self.status = self.derive_status();
        if self.started_at.is_none() && self.status != RunStatus::Pending {
            self.started_at = Some(now);
        }
        if self.finished_at.is_none() && self.is_settled() {
            self.finished_at = Some(now);
        }

        before != (self.status, self.started_at, self.finished_at)
    }
}
