//! Execution state models

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Status of a single stage within a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StageStatus {
    /// Stage has not been examined by the scheduler yet
    Pending,
    /// Stage is waiting for its dependencies to finish
    Blocked,
    /// Stage has been dispatched to the executor
    Running,
    /// All commands exited successfully
    Succeeded,
    /// A command exited non-zero, timed out, or the executor gave up
    Failed,
    /// Stage will never run (failed dependency, rejection, or failed run)
    Skipped,
    /// Stage is held by a manual gate until someone approves or rejects it
    AwaitingApproval,
    /// Run was cancelled before the stage could finish
    Cancelled,
}

impl StageStatus {
    /// All statuses, in code order
    pub const ALL: [StageStatus; 8] = [
        StageStatus::Pending,
        StageStatus::Blocked,
        StageStatus::Running,
        StageStatus::Succeeded,
        StageStatus::Failed,
        StageStatus::Skipped,
        StageStatus::AwaitingApproval,
        StageStatus::Cancelled,
    ];

    /// Statuses a stage can still leave
    pub const ACTIVE: [StageStatus; 4] = [
        StageStatus::Pending,
        StageStatus::Blocked,
        StageStatus::Running,
        StageStatus::AwaitingApproval,
    ];

    /// Check if stage is in a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StageStatus::Succeeded
                | StageStatus::Failed
                | StageStatus::Skipped
                | StageStatus::Cancelled
        )
    }

    /// Numeric code surfaced to callers; `Pending` is always 0
    pub fn code(&self) -> u8 {
        match self {
            StageStatus::Pending => 0,
            StageStatus::Blocked => 1,
            StageStatus::Running => 2,
            StageStatus::Succeeded => 3,
            StageStatus::Failed => 4,
            StageStatus::Skipped => 5,
            StageStatus::AwaitingApproval => 6,
            StageStatus::Cancelled => 7,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StageStatus::Pending => "PENDING",
            StageStatus::Blocked => "BLOCKED",
            StageStatus::Running => "RUNNING",
            StageStatus::Succeeded => "SUCCEEDED",
            StageStatus::Failed => "FAILED",
            StageStatus::Skipped => "SKIPPED",
            StageStatus::AwaitingApproval => "AWAITING_APPROVAL",
            StageStatus::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StageStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StageStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("Unknown stage status: {}", s))
    }
}

/// Overall run status, derived from the stage statuses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    /// Run was created but nothing has been scheduled
    Pending,
    /// At least one stage is in flight
    Running,
    /// Every open branch is held by a manual gate
    AwaitingApproval,
    /// All stages succeeded
    Succeeded,
    /// A stage failed or a gate was rejected
    Failed,
    /// Run was cancelled externally
    Cancelled,
}

impl RunStatus {
    const ALL: [RunStatus; 6] = [
        RunStatus::Pending,
        RunStatus::Running,
        RunStatus::AwaitingApproval,
        RunStatus::Succeeded,
        RunStatus::Failed,
        RunStatus::Cancelled,
    ];

    /// Derive the overall status from stage statuses
    ///
    /// `rejected` is set when any manual gate of the run was rejected; a
    /// rejection leaves only SKIPPED stages behind, which would otherwise
    /// look like a clean run.
    pub fn derive<I>(statuses: I, rejected: bool) -> Self
    where
        I: IntoIterator<Item = StageStatus>,
    {
        let statuses: Vec<StageStatus> = statuses.into_iter().collect();

        if statuses.contains(&StageStatus::Cancelled) {
            return RunStatus::Cancelled;
        }
        if rejected || statuses.contains(&StageStatus::Failed) {
            return RunStatus::Failed;
        }
        if statuses.iter().all(|s| s.is_terminal()) {
            return RunStatus::Succeeded;
        }
        if statuses.contains(&StageStatus::Running) {
            return RunStatus::Running;
        }
        if statuses.contains(&StageStatus::AwaitingApproval) {
            return RunStatus::AwaitingApproval;
        }
        if statuses.iter().all(|s| *s == StageStatus::Pending) {
            return RunStatus::Pending;
        }
        RunStatus::Running
    }

    /// Whether this status reports a finished outcome
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Succeeded | RunStatus::Failed | RunStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "PENDING",
            RunStatus::Running => "RUNNING",
            RunStatus::AwaitingApproval => "AWAITING_APPROVAL",
            RunStatus::Succeeded => "SUCCEEDED",
            RunStatus::Failed => "FAILED",
            RunStatus::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RunStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("Unknown run status: {}", s))
    }
}
