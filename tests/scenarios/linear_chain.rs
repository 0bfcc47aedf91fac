//! Test: Linear Chain - stages run one after another in dependency order

use crate::helpers::*;
use conduit::core::{RunStatus, StageStatus};
use conduit::execution::ExecutionEvent;
use std::sync::{Arc, Mutex};

#[tokio::test]
async fn test_linear_chain_succeeds() {
    let executor = Arc::new(MockExecutor::new());
    let orchestrator = orchestrator(executor.clone());

    let run = start(&orchestrator, LINEAR).await;
    let run = finish(&orchestrator, run.id).await;

    assert_eq!(run.status, RunStatus::Succeeded);
    for stage in ["lint", "build", "push"] {
        assert_stage(&run, stage, StageStatus::Succeeded);
        assert_eq!(run.stage(stage).unwrap().attempts, 1);
    }
    assert_eq!(executor.started(), vec!["lint", "build", "push"]);
    assert!(run.started_at.is_some());
    assert!(run.finished_at.is_some());
}

#[tokio::test]
async fn test_stage_log_is_recorded() {
    let executor = Arc::new(MockExecutor::new());
    let orchestrator = orchestrator(executor);

    let run = start(&orchestrator, LINEAR).await;
    let run = finish(&orchestrator, run.id).await;

    let push = run.stage("push").unwrap();
    assert!(push.log.contains("docker push acme/site"));
    assert!(push.started_at.unwrap() <= push.finished_at.unwrap());
}

#[tokio::test]
async fn test_diamond_waits_for_both_branches() {
    let yaml = r#"
name: "diamond"
stages:
  - id: checkout
    commands: ["git fetch"]
  - id: unit
    depends_on: [checkout]
    commands: ["cargo test"]
  - id: lint
    depends_on: [checkout]
    commands: ["cargo clippy"]
  - id: package
    depends_on: [unit, lint]
    commands: ["cargo build --release"]
"#;
    let executor = Arc::new(
        MockExecutor::new().with("lint", Behavior::Delay(std::time::Duration::from_millis(50))),
    );
    let orchestrator = orchestrator(executor.clone());

    let run = start(&orchestrator, yaml).await;
    let run = finish(&orchestrator, run.id).await;

    assert_eq!(run.status, RunStatus::Succeeded);
    let started = executor.started();
    assert_eq!(started.first().map(String::as_str), Some("checkout"));
    assert_eq!(started.last().map(String::as_str), Some("package"));

    let package = run.stage("package").unwrap().started_at.unwrap();
    let lint = run.stage("lint").unwrap().finished_at.unwrap();
    assert!(package >= lint);
}

#[tokio::test]
async fn test_events_follow_stage_progress() {
    let executor = Arc::new(MockExecutor::new());
    let orchestrator = orchestrator(executor);
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    orchestrator.add_event_handler(move |event| sink.lock().unwrap().push(event));

    let run = start(&orchestrator, LINEAR).await;
    finish(&orchestrator, run.id).await;

    let events = events.lock().unwrap().clone();
    let succeeded: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            ExecutionEvent::StageSucceeded { stage_id, .. } => Some(stage_id.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(succeeded, vec!["lint", "build", "push"]);

    let finished = events
        .iter()
        .filter(|e| matches!(e, ExecutionEvent::RunFinished { .. }))
        .count();
    assert_eq!(finished, 1);
}

#[tokio::test]
async fn test_finished_run_stays_finished() {
    let executor = Arc::new(MockExecutor::new());
    let orchestrator = orchestrator(executor.clone());

    let run = start(&orchestrator, LINEAR).await;
    let done = finish(&orchestrator, run.id).await;

    let again = orchestrator.advance(run.id).await.unwrap();
    assert_eq!(again.status, RunStatus::Succeeded);
    assert_eq!(again.finished_at, done.finished_at);
    assert_eq!(executor.calls("lint"), 1);
}
