//! Test: Manual Gates - approval, rejection and authorization

use crate::helpers::*;
use conduit::core::{ApprovalDecision, RunStatus, StageStatus};
use conduit::execution::OrchestratorError;
use std::sync::Arc;

#[tokio::test]
async fn test_gate_holds_until_approved() {
    let executor = Arc::new(MockExecutor::new());
    let orchestrator = orchestrator(executor.clone());

    let run = start(&orchestrator, GATED).await;
    let run = wait_until(&orchestrator, run.id, |run| run.status == RunStatus::AwaitingApproval).await;

    assert_stage(&run, "push", StageStatus::AwaitingApproval);
    assert_stage(&run, "build", StageStatus::Succeeded);
    assert_stage(&run, "notify", StageStatus::Blocked);
    assert_eq!(executor.calls("push"), 0);

    orchestrator.approve(run.id, "push", "alice").await.unwrap();
    let run = finish(&orchestrator, run.id).await;

    assert_eq!(run.status, RunStatus::Succeeded);
    assert_stage(&run, "push", StageStatus::Succeeded);
    assert_stage(&run, "notify", StageStatus::Succeeded);
    assert_eq!(run.approvals.len(), 1);
    assert_eq!(run.approvals[0].actor, "alice");
    assert_eq!(run.approvals[0].decision, ApprovalDecision::Approved);
}

#[tokio::test]
async fn test_unauthorized_approval_changes_nothing() {
    let executor = Arc::new(MockExecutor::new());
    let orchestrator = orchestrator(executor.clone());

    let run = start(&orchestrator, GATED).await;
    wait_for_stage(&orchestrator, run.id, "push", StageStatus::AwaitingApproval).await;

    let result = orchestrator.approve(run.id, "push", "mallory").await;
    assert!(matches!(
        result,
        Err(OrchestratorError::Unauthorized { ref actor, .. }) if actor == "mallory"
    ));
    assert_eq!(result.unwrap_err().code(), "UNAUTHORIZED");

    let result = orchestrator.reject(run.id, "push", "bob").await;
    assert!(matches!(result, Err(OrchestratorError::Unauthorized { .. })));

    let run = orchestrator.status(run.id).await.unwrap();
    assert_stage(&run, "push", StageStatus::AwaitingApproval);
    assert!(run.approvals.is_empty());
    assert_eq!(executor.calls("push"), 0);
}

#[tokio::test]
async fn test_rejection_skips_stage_and_dependents() {
    let executor = Arc::new(MockExecutor::new());
    let orchestrator = orchestrator(executor.clone());

    let run = start(&orchestrator, GATED).await;
    wait_for_stage(&orchestrator, run.id, "push", StageStatus::AwaitingApproval).await;

    orchestrator.reject(run.id, "push", "carol").await.unwrap();
    let run = finish(&orchestrator, run.id).await;

    assert_eq!(run.status, RunStatus::Failed);
    assert_stage(&run, "push", StageStatus::Skipped);
    assert_stage(&run, "notify", StageStatus::Skipped);
    assert_eq!(run.stage("push").unwrap().message.as_deref(), Some("Rejected by carol"));
    assert_eq!(
        run.stage("notify").unwrap().message.as_deref(),
        Some("dependency 'push' is SKIPPED")
    );
    assert_eq!(run.approvals[0].decision, ApprovalDecision::Rejected);
    assert_eq!(executor.calls("push"), 0);
    assert_eq!(executor.calls("notify"), 0);
}

#[tokio::test]
async fn test_approve_stage_without_manual_gate() {
    let executor = Arc::new(MockExecutor::new());
    let orchestrator = orchestrator(executor);

    let run = start(&orchestrator, GATED).await;
    wait_for_stage(&orchestrator, run.id, "push", StageStatus::AwaitingApproval).await;

    let result = orchestrator.approve(run.id, "lint", "alice").await;
    assert!(matches!(result, Err(OrchestratorError::InvalidState { .. })));
}

#[tokio::test]
async fn test_approve_before_gate_is_reached() {
    let executor = Arc::new(MockExecutor::new().with("build", Behavior::Hang));
    let orchestrator = orchestrator(executor.clone());

    let run = start(&orchestrator, GATED).await;
    wait_for_stage(&orchestrator, run.id, "build", StageStatus::Running).await;

    let result = orchestrator.approve(run.id, "push", "alice").await;
    match result {
        Err(OrchestratorError::InvalidState { actual, .. }) => {
            assert_eq!(actual, StageStatus::Blocked)
        }
        other => panic!("expected InvalidState, got {:?}", other.map(|r| r.status)),
    }

    let run = orchestrator.cancel(run.id).await.unwrap();
    assert!(run.approvals.is_empty());
}

#[tokio::test]
async fn test_second_decision_is_rejected() {
    let executor = Arc::new(MockExecutor::new());
    let orchestrator = orchestrator(executor.clone());

    let run = start(&orchestrator, GATED).await;
    wait_for_stage(&orchestrator, run.id, "push", StageStatus::AwaitingApproval).await;

    orchestrator.approve(run.id, "push", "alice").await.unwrap();
    let result = orchestrator.reject(run.id, "push", "carol").await;
    assert!(matches!(result, Err(OrchestratorError::InvalidState { .. })));

    let run = finish(&orchestrator, run.id).await;
    assert_eq!(run.status, RunStatus::Succeeded);
    assert_eq!(executor.calls("push"), 1);
    assert_eq!(run.approvals.len(), 1);
    assert_eq!(run.approvals[0].decision, ApprovalDecision::Approved);
}

#[tokio::test]
async fn test_late_rejection_leaves_no_record() {
    let executor = Arc::new(MockExecutor::new().with("push", Behavior::Hang));
    let orchestrator = orchestrator(executor.clone());

    let run = start(&orchestrator, GATED).await;
    wait_for_stage(&orchestrator, run.id, "push", StageStatus::AwaitingApproval).await;
    orchestrator.approve(run.id, "push", "alice").await.unwrap();
    wait_for_stage(&orchestrator, run.id, "push", StageStatus::Running).await;

    let result = orchestrator.reject(run.id, "push", "carol").await;
    match result {
        Err(OrchestratorError::InvalidState { actual, .. }) => {
            assert_eq!(actual, StageStatus::Running)
        }
        other => panic!("expected InvalidState, got {:?}", other.map(|r| r.status)),
    }

    let run = orchestrator.status(run.id).await.unwrap();
    assert_eq!(run.status, RunStatus::Running);
    assert!(run
        .approvals
        .iter()
        .all(|a| a.decision != ApprovalDecision::Rejected));
    orchestrator.cancel(run.id).await.unwrap();
}

#[tokio::test]
async fn test_gate_in_one_branch_does_not_hold_the_other() {
    let yaml = r#"
name: "site"
stages:
  - id: build
    commands: ["make"]
  - id: deploy
    depends_on: [build]
    gate:
      kind: manual
      environment: production
      approvers: [alice]
    commands: ["make deploy"]
  - id: docs
    depends_on: [build]
    commands: ["make docs"]
"#;
    let executor = Arc::new(MockExecutor::new());
    let orchestrator = orchestrator(executor.clone());

    let run = start(&orchestrator, yaml).await;
    let run = wait_until(&orchestrator, run.id, |run| {
        run.stage_status("docs") == Some(StageStatus::Succeeded)
            && run.stage_status("deploy") == Some(StageStatus::AwaitingApproval)
            && run.status == RunStatus::AwaitingApproval
    })
    .await;
    assert_stage(&run, "build", StageStatus::Succeeded);

    orchestrator.approve(run.id, "deploy", "alice").await.unwrap();
    let run = finish(&orchestrator, run.id).await;
    assert_eq!(run.status, RunStatus::Succeeded);
}
