//! Test utility functions for conduit

#![allow(dead_code)]

use async_trait::async_trait;
use conduit::core::{Pipeline, PipelineConfig, Run, StageStatus, TriggerEvent};
use conduit::execution::{CommandExecutor, ExecutionOutcome, InfraError, Orchestrator, StageJob};
use conduit::persistence::{InMemoryRunStore, RunStore};
use conduit::settings::OrchestratorSettings;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

/// Scripted behaviour of one stage
#[derive(Debug, Clone)]
pub enum Behavior {
    Succeed,
    /// Non-zero exit with this reason
    Fail(String),
    /// Sleep, then succeed
    Delay(Duration),
    /// Never finish until dropped
    Hang,
    /// Infrastructure errors for the first N attempts, then succeed
    InfraFailThenSucceed(u32),
    /// Infrastructure error on every attempt
    InfraFailAlways,
    /// Secret lookup failure, which is never retried
    MissingSecret(String),
}

/// Sets the flag when the execution future is dropped
struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Mock executor that plays back a behaviour per stage id
#[derive(Default)]
pub struct MockExecutor {
    behaviors: HashMap<String, Behavior>,
    calls: Mutex<HashMap<String, u32>>,
    started: Mutex<Vec<String>>,
    running: AtomicUsize,
    max_running: AtomicUsize,
    dropped: Mutex<HashMap<String, Arc<AtomicBool>>>,
}

impl MockExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, stage_id: &str, behavior: Behavior) -> Self {
        self.behaviors.insert(stage_id.to_string(), behavior);
        self
    }

    /// Attempts made for a stage
    pub fn calls(&self, stage_id: &str) -> u32 {
        self.calls.lock().unwrap().get(stage_id).copied().unwrap_or(0)
    }

    /// Stage ids in the order their first attempt started
    pub fn started(&self) -> Vec<String> {
        self.started.lock().unwrap().clone()
    }

    pub fn max_running(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }

    /// True once an in-flight execution of the stage was dropped
    pub fn was_dropped(&self, stage_id: &str) -> bool {
        self.dropped
            .lock()
            .unwrap()
            .get(stage_id)
            .map(|flag| flag.load(Ordering::SeqCst))
            .unwrap_or(false)
    }
}

struct RunningGuard<'a>(&'a AtomicUsize);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl CommandExecutor for MockExecutor {
    async fn execute(&self, job: &StageJob) -> Result<ExecutionOutcome, InfraError> {
        let attempt = {
            let mut calls = self.calls.lock().unwrap();
            let count = calls.entry(job.stage_id.clone()).or_insert(0);
            *count += 1;
            *count
        };
        if attempt == 1 {
            self.started.lock().unwrap().push(job.stage_id.clone());
        }

        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now, Ordering::SeqCst);
        let _running = RunningGuard(&self.running);

        let log = format!("$ {}\nok\n", job.commands.join(" && "));
        match self.behaviors.get(&job.stage_id).cloned().unwrap_or(Behavior::Succeed) {
            Behavior::Succeed => Ok(ExecutionOutcome::Succeeded { log }),
            Behavior::Fail(reason) => Ok(ExecutionOutcome::Failed { log, reason }),
            Behavior::Delay(delay) => {
                tokio::time::sleep(delay).await;
                Ok(ExecutionOutcome::Succeeded { log })
            }
            Behavior::Hang => {
                let flag = Arc::new(AtomicBool::new(false));
                self.dropped
                    .lock()
                    .unwrap()
                    .insert(job.stage_id.clone(), flag.clone());
                let _guard = DropFlag(flag);
                std::future::pending().await
            }
            Behavior::InfraFailThenSucceed(failures) if attempt <= failures => {
                Err(InfraError::Unavailable(format!("worker offline (attempt {})", attempt)))
            }
            Behavior::InfraFailThenSucceed(_) => Ok(ExecutionOutcome::Succeeded { log }),
            Behavior::InfraFailAlways => Err(InfraError::Unavailable("worker offline".to_string())),
            Behavior::MissingSecret(name) => Err(InfraError::MissingSecret(name)),
        }
    }
}

pub const LINEAR: &str = r#"
name: "site"
version: "1"
trigger:
  repository: "acme/site"
  branch: "main"
stages:
  - id: lint
    commands: ["npm run lint"]
  - id: build
    depends_on: [lint]
    commands: ["docker build -t acme/site ."]
  - id: push
    depends_on: [build]
    commands: ["docker push acme/site"]
"#;

pub const GATED: &str = r#"
name: "site"
trigger:
  repository: "acme/site"
  branch: "main"
stages:
  - id: lint
    commands: ["npm run lint"]
  - id: build
    depends_on: [lint]
    commands: ["docker build -t acme/site ."]
  - id: push
    depends_on: [build]
    gate:
      kind: manual
      environment: production
      approvers: [alice, carol]
    commands: ["docker push acme/site"]
  - id: notify
    depends_on: [push]
    commands: ["curl -X POST https://chat.example/hook"]
"#;

pub fn pipeline(yaml: &str) -> Pipeline {
    PipelineConfig::from_yaml(yaml).unwrap().to_pipeline().unwrap()
}

pub fn push_event() -> TriggerEvent {
    TriggerEvent::push("acme/site", "main", "abc123def", "bob")
}

pub fn test_settings() -> OrchestratorSettings {
    OrchestratorSettings {
        max_concurrent_stages: 4,
        default_stage_timeout_secs: 30,
        infra_retries: 2,
        retry_backoff_ms: 1,
        workdir: std::env::temp_dir(),
        ..Default::default()
    }
}

pub fn orchestrator(executor: Arc<MockExecutor>) -> Orchestrator {
    orchestrator_with(executor, test_settings())
}

pub fn orchestrator_with(executor: Arc<MockExecutor>, settings: OrchestratorSettings) -> Orchestrator {
    let store: Arc<dyn RunStore> = Arc::new(InMemoryRunStore::new());
    Orchestrator::new(store, executor, settings)
}

/// Register `yaml` and start a run for the default push event
pub async fn start(orchestrator: &Orchestrator, yaml: &str) -> Run {
    let pipeline = orchestrator.register(pipeline(yaml)).unwrap();
    orchestrator.start_run(pipeline, push_event()).await.unwrap()
}

/// Wait (bounded) for a run to satisfy `predicate`
pub async fn wait_until<F>(orchestrator: &Orchestrator, run_id: Uuid, predicate: F) -> Run
where
    F: Fn(&Run) -> bool,
{
    for _ in 0..500 {
        let run = orchestrator.status(run_id).await.unwrap();
        if predicate(&run) {
            return run;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("run {} did not reach the expected state", run_id);
}

/// Wait for a stage to reach `status`
pub async fn wait_for_stage(
    orchestrator: &Orchestrator,
    run_id: Uuid,
    stage_id: &str,
    status: StageStatus,
) -> Run {
    wait_until(orchestrator, run_id, |run| run.stage_status(stage_id) == Some(status)).await
}

/// Wait for the run to finish, failing the test after a few seconds
pub async fn finish(orchestrator: &Orchestrator, run_id: Uuid) -> Run {
    tokio::time::timeout(Duration::from_secs(5), orchestrator.wait_for_completion(run_id))
        .await
        .expect("run did not finish in time")
        .unwrap()
}

pub fn assert_stage(run: &Run, stage_id: &str, expected: StageStatus) {
    assert_eq!(
        run.stage_status(stage_id),
        Some(expected),
        "stage {} of run {}",
        stage_id,
        run.id
    );
}
