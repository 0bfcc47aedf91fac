//! Test: Infrastructure Retries - executor failures are retried with backoff

use crate::helpers::*;
use conduit::core::{RunStatus, StageStatus};
use conduit::execution::ExecutionEvent;
use std::sync::{Arc, Mutex};

#[tokio::test]
async fn test_transient_failure_is_retried() {
    let executor = Arc::new(MockExecutor::new().with("build", Behavior::InfraFailThenSucceed(2)));
    let orchestrator = orchestrator(executor.clone());
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    orchestrator.add_event_handler(move |event| sink.lock().unwrap().push(event));

    let run = start(&orchestrator, LINEAR).await;
    let run = finish(&orchestrator, run.id).await;

    assert_eq!(run.status, RunStatus::Succeeded);
    assert_eq!(executor.calls("build"), 3);
    assert_eq!(run.stage("build").unwrap().attempts, 3);

    let retries: Vec<u32> = events
        .lock()
        .unwrap()
        .iter()
        .filter_map(|e| match e {
            ExecutionEvent::StageRetrying { attempt, .. } => Some(*attempt),
            _ => None,
        })
        .collect();
    assert_eq!(retries, vec![1, 2]);
}

#[tokio::test]
async fn test_retries_are_bounded() {
    let executor = Arc::new(MockExecutor::new().with("build", Behavior::InfraFailAlways));
    let orchestrator = orchestrator(executor.clone());

    let run = start(&orchestrator, LINEAR).await;
    let run = finish(&orchestrator, run.id).await;

    assert_eq!(run.status, RunStatus::Failed);
    assert_stage(&run, "build", StageStatus::Failed);
    assert_stage(&run, "push", StageStatus::Skipped);
    // One attempt plus two retries
    assert_eq!(executor.calls("build"), 3);
    let message = run.stage("build").unwrap().message.clone().unwrap();
    assert!(message.starts_with("Infrastructure failure"), "{}", message);
}

#[tokio::test]
async fn test_missing_secret_is_not_retried() {
    let executor = Arc::new(
        MockExecutor::new().with("push", Behavior::MissingSecret("DOCKERHUB_TOKEN".to_string())),
    );
    let orchestrator = orchestrator(executor.clone());

    let run = start(&orchestrator, LINEAR).await;
    let run = finish(&orchestrator, run.id).await;

    assert_stage(&run, "push", StageStatus::Failed);
    assert_eq!(executor.calls("push"), 1);
    assert!(run
        .stage("push")
        .unwrap()
        .message
        .as_deref()
        .unwrap()
        .contains("DOCKERHUB_TOKEN"));
}
