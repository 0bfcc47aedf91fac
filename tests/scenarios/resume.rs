//! Test: Resume - runs left active by a previous process are picked up

use crate::helpers::*;
use conduit::core::{Run, RunStatus, StageStatus, StageTransition};
use conduit::execution::Orchestrator;
use conduit::persistence::{RunStore, SqliteRunStore};
use std::path::Path;
use std::sync::Arc;

async fn seed(path: &Path, yaml: &str, transitions: &[(&str, StageStatus, StageStatus)]) -> Run {
    let store = SqliteRunStore::open(path).await.unwrap();
    let run = Run::new(&pipeline(yaml), push_event());
    store.create(&run).await.unwrap();
    for (stage_id, from, to) in transitions {
        assert!(store
            .compare_and_set_stage(run.id, stage_id, &[*from], &StageTransition::to(*to))
            .await
            .unwrap());
    }
    store.refresh_status(run.id).await.unwrap()
}

async fn restart(path: &Path, yaml: &str, executor: Arc<MockExecutor>) -> Orchestrator {
    let store: Arc<dyn RunStore> = Arc::new(SqliteRunStore::open(path).await.unwrap());
    let orchestrator = Orchestrator::new(store, executor, test_settings());
    orchestrator.register(pipeline(yaml)).unwrap();
    orchestrator
}

#[tokio::test]
async fn test_interrupted_stage_fails_on_resume() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("runs.db");
    let run = seed(
        &path,
        LINEAR,
        &[
            ("lint", StageStatus::Pending, StageStatus::Running),
            ("build", StageStatus::Pending, StageStatus::Blocked),
        ],
    )
    .await;
    assert_eq!(run.status, RunStatus::Running);

    let executor = Arc::new(MockExecutor::new());
    let orchestrator = restart(&path, LINEAR, executor.clone()).await;
    assert_eq!(orchestrator.resume_active().await.unwrap(), vec![run.id]);

    let run = finish(&orchestrator, run.id).await;
    assert_eq!(run.status, RunStatus::Failed);
    assert_stage(&run, "lint", StageStatus::Failed);
    assert_stage(&run, "build", StageStatus::Skipped);
    assert_stage(&run, "push", StageStatus::Skipped);
    assert_eq!(
        run.stage("lint").unwrap().message.as_deref(),
        Some("Interrupted by orchestrator restart")
    );
    assert_eq!(executor.calls("lint"), 0);
}

#[tokio::test]
async fn test_resume_continues_from_last_stage() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("runs.db");
    let run = seed(
        &path,
        LINEAR,
        &[
            ("lint", StageStatus::Pending, StageStatus::Running),
            ("lint", StageStatus::Running, StageStatus::Succeeded),
        ],
    )
    .await;

    let executor = Arc::new(MockExecutor::new());
    let orchestrator = restart(&path, LINEAR, executor.clone()).await;
    orchestrator.resume_active().await.unwrap();

    let run = finish(&orchestrator, run.id).await;
    assert_eq!(run.status, RunStatus::Succeeded);
    assert_eq!(executor.started(), vec!["build", "push"]);
}

#[tokio::test]
async fn test_gate_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("runs.db");
    let run = seed(
        &path,
        GATED,
        &[
            ("lint", StageStatus::Pending, StageStatus::Succeeded),
            ("build", StageStatus::Pending, StageStatus::Succeeded),
            ("push", StageStatus::Pending, StageStatus::AwaitingApproval),
            ("notify", StageStatus::Pending, StageStatus::Blocked),
        ],
    )
    .await;
    assert_eq!(run.status, RunStatus::AwaitingApproval);

    let executor = Arc::new(MockExecutor::new());
    let orchestrator = restart(&path, GATED, executor.clone()).await;
    orchestrator.resume_active().await.unwrap();

    let run = orchestrator.status(run.id).await.unwrap();
    assert_stage(&run, "push", StageStatus::AwaitingApproval);

    orchestrator.approve(run.id, "push", "carol").await.unwrap();
    let run = finish(&orchestrator, run.id).await;
    assert_eq!(run.status, RunStatus::Succeeded);
    assert_eq!(run.approvals.len(), 1);
}

#[tokio::test]
async fn test_unregistered_pipeline_is_not_resumed() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("runs.db");
    seed(&path, LINEAR, &[]).await;

    let docs = r#"
name: "docs"
trigger:
  branch: "gh-pages"
stages:
  - id: render
    commands: ["mdbook build"]
"#;
    let orchestrator = restart(&path, docs, Arc::new(MockExecutor::new())).await;
    assert!(orchestrator.resume_active().await.unwrap().is_empty());
}
