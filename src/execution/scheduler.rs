//! Stage scheduler - determines which stage transitions a run needs next

use crate::core::{Pipeline, Run, StageStatus};
use std::collections::HashMap;
use tracing::debug;

/// One stage transition the orchestrator should attempt
///
/// `from` is the status the plan was computed against; the orchestrator
/// applies the decision as a compare-and-set from that status, so a
/// stale plan loses instead of double-applying.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub stage_id: String,
    pub from: StageStatus,
    pub to: StageStatus,
    pub reason: Option<String>,
}

impl Decision {
    fn new(stage_id: &str, from: StageStatus, to: StageStatus) -> Self {
        Self {
            stage_id: stage_id.to_string(),
            from,
            to,
            reason: None,
        }
    }

    fn skip(stage_id: &str, from: StageStatus, reason: String) -> Self {
        Self {
            reason: Some(reason),
            ..Self::new(stage_id, from, StageStatus::Skipped)
        }
    }
}

/// Compute the transitions that bring `run` up to date with `pipeline`
///
/// Skips come first in topological order, so a cascade resolves in one
/// plan. The remaining decisions follow declaration order, which is the
/// dispatch order for ready stages.
pub fn plan(pipeline: &Pipeline, run: &Run) -> Vec<Decision> {
    let mut statuses = run.statuses();
    let failing = run.has_failure();

    let mut skips = Vec::new();
    let mut others = Vec::new();

    for stage_id in pipeline.execution_order() {
        let Some(stage) = pipeline.stage(stage_id) else {
            continue;
        };
        let Some(&current) = statuses.get(stage_id.as_str()) else {
            continue;
        };
        if !matches!(
            current,
            StageStatus::Pending | StageStatus::Blocked | StageStatus::AwaitingApproval
        ) {
            continue;
        }

        let decision = if let Some(dependency) = stage.broken_dependency(&statuses) {
            let status = statuses
                .get(dependency)
                .copied()
                .unwrap_or(StageStatus::Skipped);
            Some(Decision::skip(
                stage_id,
                current,
                format!("dependency '{}' is {}", dependency, status),
            ))
        } else if failing {
            Some(Decision::skip(stage_id, current, "run failed".to_string()))
        } else if stage.dependencies_succeeded(&statuses) {
            if stage.gate.is_manual() && !run.is_approved(stage_id) {
                (current != StageStatus::AwaitingApproval)
                    .then(|| Decision::new(stage_id, current, StageStatus::AwaitingApproval))
            } else {
                Some(Decision::new(stage_id, current, StageStatus::Running))
            }
        } else {
            (current == StageStatus::Pending)
                .then(|| Decision::new(stage_id, current, StageStatus::Blocked))
        };

        if let Some(decision) = decision {
            debug!(
                "Run {}: stage {} {} -> {}",
                run.id, decision.stage_id, decision.from, decision.to
            );
            statuses.insert(stage_id.as_str(), decision.to);
            if decision.to == StageStatus::Skipped {
                skips.push(decision);
            } else {
                others.push(decision);
            }
        }
    }

    let position: HashMap<&str, usize> = pipeline
        .stages()
        .iter()
        .enumerate()
        .map(|(i, s)| (s.id.as_str(), i))
        .collect();
    others.sort_by_key(|d| position.get(d.stage_id.as_str()).copied().unwrap_or(usize::MAX));

    skips.extend(others);
    skips
}
