//! Test: Concurrency - at-most-once dispatch and the shared stage limit

use crate::helpers::*;
use conduit::core::{RunStatus, StageStatus};
use conduit::settings::OrchestratorSettings;
use std::sync::Arc;
use std::time::Duration;

const FANOUT: &str = r#"
name: "fanout"
stages:
  - id: a
    commands: ["make a"]
  - id: b
    commands: ["make b"]
  - id: c
    commands: ["make c"]
  - id: d
    commands: ["make d"]
  - id: e
    commands: ["make e"]
  - id: merge
    depends_on: [a, b, c, d, e]
    commands: ["make all"]
"#;

fn slow_fanout() -> MockExecutor {
    ["a", "b", "c", "d", "e"]
        .into_iter()
        .fold(MockExecutor::new(), |executor, id| {
            executor.with(id, Behavior::Delay(Duration::from_millis(40)))
        })
}

#[tokio::test]
async fn test_concurrent_advance_dispatches_once() {
    let executor = Arc::new(slow_fanout());
    let orchestrator = orchestrator(executor.clone());

    let run_id = start(&orchestrator, FANOUT).await.id;

    let mut handles = Vec::new();
    for _ in 0..8 {
        let orchestrator = orchestrator.clone();
        handles.push(tokio::spawn(async move { orchestrator.advance(run_id).await }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let run = finish(&orchestrator, run_id).await;
    assert_eq!(run.status, RunStatus::Succeeded);
    for id in ["a", "b", "c", "d", "e", "merge"] {
        assert_eq!(executor.calls(id), 1, "stage {} dispatched more than once", id);
        assert_eq!(run.stage(id).unwrap().attempts, 1);
    }
}

#[tokio::test]
async fn test_stage_limit_is_respected() {
    let executor = Arc::new(slow_fanout());
    let settings = OrchestratorSettings {
        max_concurrent_stages: 2,
        ..test_settings()
    };
    let orchestrator = orchestrator_with(executor.clone(), settings);

    let run = start(&orchestrator, FANOUT).await;
    let run = finish(&orchestrator, run.id).await;

    assert_eq!(run.status, RunStatus::Succeeded);
    assert!(executor.max_running() <= 2);
    assert_eq!(executor.started().last().map(String::as_str), Some("merge"));
}

#[tokio::test]
async fn test_independent_stages_run_in_parallel() {
    let executor = Arc::new(slow_fanout());
    let orchestrator = orchestrator(executor.clone());

    let run = start(&orchestrator, FANOUT).await;
    finish(&orchestrator, run.id).await;

    assert!(executor.max_running() >= 2);
    assert!(executor.max_running() <= 4);
}

#[tokio::test]
async fn test_runs_progress_independently() {
    let executor = Arc::new(MockExecutor::new());
    let orchestrator = orchestrator(executor.clone());
    orchestrator.register(pipeline(GATED)).unwrap();

    let first = orchestrator.trigger(push_event()).await.unwrap().remove(0);
    let second = orchestrator.trigger(push_event()).await.unwrap().remove(0);
    assert_ne!(first.id, second.id);

    for run in [&first, &second] {
        wait_for_stage(&orchestrator, run.id, "push", StageStatus::AwaitingApproval).await;
    }

    orchestrator.reject(first.id, "push", "alice").await.unwrap();
    orchestrator.approve(second.id, "push", "carol").await.unwrap();

    let first = finish(&orchestrator, first.id).await;
    let second = finish(&orchestrator, second.id).await;
    assert_eq!(first.status, RunStatus::Failed);
    assert_eq!(second.status, RunStatus::Succeeded);
    assert_eq!(executor.calls("push"), 1);

    let history = orchestrator.list_runs(Some("site"), 10).await.unwrap();
    assert_eq!(history.len(), 2);
    assert!(orchestrator.list_active().await.unwrap().is_empty());
}
