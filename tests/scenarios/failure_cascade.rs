//! Test: Failure Cascade - failed stages skip dependents and fail the run

use crate::helpers::*;
use conduit::core::{RunStatus, StageStatus};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_failed_stage_skips_dependents() {
    let executor = Arc::new(MockExecutor::new().with("build", Behavior::Fail("Command 1 of 1 failed: docker build".to_string())));
    let orchestrator = orchestrator(executor.clone());

    let run = start(&orchestrator, LINEAR).await;
    let run = finish(&orchestrator, run.id).await;

    assert_eq!(run.status, RunStatus::Failed);
    assert_stage(&run, "lint", StageStatus::Succeeded);
    assert_stage(&run, "build", StageStatus::Failed);
    assert_stage(&run, "push", StageStatus::Skipped);
    assert_eq!(
        run.stage("build").unwrap().message.as_deref(),
        Some("Command 1 of 1 failed: docker build")
    );
    assert_eq!(
        run.stage("push").unwrap().message.as_deref(),
        Some("dependency 'build' is FAILED")
    );
    // Command failures are not retried
    assert_eq!(executor.calls("build"), 1);
    assert_eq!(executor.calls("push"), 0);
}

#[tokio::test]
async fn test_skip_cascades_through_chain() {
    let executor = Arc::new(MockExecutor::new().with("lint", Behavior::Fail("lint errors".to_string())));
    let orchestrator = orchestrator(executor.clone());

    let run = start(&orchestrator, LINEAR).await;
    let run = finish(&orchestrator, run.id).await;

    assert_stage(&run, "build", StageStatus::Skipped);
    assert_stage(&run, "push", StageStatus::Skipped);
    assert_eq!(
        run.stage("push").unwrap().message.as_deref(),
        Some("dependency 'build' is SKIPPED")
    );
    assert_eq!(executor.started(), vec!["lint"]);
}

#[tokio::test]
async fn test_failure_stops_independent_branches() {
    let yaml = r#"
name: "fanout"
stages:
  - id: unit
    commands: ["cargo test"]
  - id: integration
    commands: ["cargo test --test api"]
  - id: report
    depends_on: [integration]
    commands: ["upload-report"]
"#;
    let executor = Arc::new(
        MockExecutor::new()
            .with("unit", Behavior::Fail("1 test failed".to_string()))
            .with("integration", Behavior::Delay(Duration::from_millis(100))),
    );
    let orchestrator = orchestrator(executor.clone());

    let run = start(&orchestrator, yaml).await;
    let run = finish(&orchestrator, run.id).await;

    assert_eq!(run.status, RunStatus::Failed);
    assert_stage(&run, "unit", StageStatus::Failed);
    // In-flight stages are allowed to finish
    assert_stage(&run, "integration", StageStatus::Succeeded);
    assert_stage(&run, "report", StageStatus::Skipped);
    assert_eq!(run.stage("report").unwrap().message.as_deref(), Some("run failed"));
    assert_eq!(executor.calls("report"), 0);
}

#[tokio::test]
async fn test_stage_timeout_fails_without_retry() {
    let yaml = r#"
name: "slow"
stages:
  - id: deploy
    timeout_secs: 1
    commands: ["./deploy.sh"]
  - id: smoke
    depends_on: [deploy]
    commands: ["./smoke.sh"]
"#;
    let executor = Arc::new(MockExecutor::new().with("deploy", Behavior::Hang));
    let orchestrator = orchestrator(executor.clone());

    let run = start(&orchestrator, yaml).await;
    let run = finish(&orchestrator, run.id).await;

    assert_eq!(run.status, RunStatus::Failed);
    assert_stage(&run, "deploy", StageStatus::Failed);
    assert_stage(&run, "smoke", StageStatus::Skipped);
    assert_eq!(
        run.stage("deploy").unwrap().message.as_deref(),
        Some("Timed out after 1 seconds")
    );
    assert_eq!(executor.calls("deploy"), 1);
    assert!(executor.was_dropped("deploy"));
}

#[tokio::test]
async fn test_pipeline_default_timeout_applies() {
    let yaml = r#"
name: "slow"
default_timeout_secs: 1
stages:
  - id: deploy
    commands: ["./deploy.sh"]
"#;
    let executor = Arc::new(MockExecutor::new().with("deploy", Behavior::Hang));
    let orchestrator = orchestrator(executor);

    let run = start(&orchestrator, yaml).await;
    let run = finish(&orchestrator, run.id).await;

    assert_stage(&run, "deploy", StageStatus::Failed);
    assert_eq!(
        run.stage("deploy").unwrap().message.as_deref(),
        Some("Timed out after 1 seconds")
    );
}
