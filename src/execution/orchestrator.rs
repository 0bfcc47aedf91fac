//! Orchestrator - creates runs and walks their stage graphs

use crate::core::{
    ApprovalDecision, ApprovalRecord, Pipeline, Run, RunStatus, StageContext, StageStatus,
    StageTransition, TriggerEvent,
};
use crate::execution::error::OrchestratorError;
use crate::execution::executor::{CommandExecutor, ExecutionOutcome, StageJob};
use crate::execution::scheduler::plan;
use crate::persistence::RunStore;
use crate::settings::OrchestratorSettings;
use chrono::Utc;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use tokio::sync::{watch, Semaphore};
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Events emitted while runs progress
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionEvent {
    RunStarted {
        run_id: Uuid,
        pipeline_name: String,
        commit: String,
    },
    StageStarted {
        run_id: Uuid,
        stage_id: String,
    },
    StageRetrying {
        run_id: Uuid,
        stage_id: String,
        attempt: u32,
        error: String,
    },
    StageSucceeded {
        run_id: Uuid,
        stage_id: String,
    },
    StageFailed {
        run_id: Uuid,
        stage_id: String,
        reason: String,
    },
    StageSkipped {
        run_id: Uuid,
        stage_id: String,
        reason: String,
    },
    StageAwaitingApproval {
        run_id: Uuid,
        stage_id: String,
        environment: String,
    },
    StageApproved {
        run_id: Uuid,
        stage_id: String,
        actor: String,
    },
    StageRejected {
        run_id: Uuid,
        stage_id: String,
        actor: String,
    },
    RunCancelled {
        run_id: Uuid,
    },
    RunFinished {
        run_id: Uuid,
        status: RunStatus,
    },
}

/// Type for event handlers
pub type EventHandler = Arc<dyn Fn(ExecutionEvent) + Send + Sync>;

type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Live state for a run this orchestrator drives
struct RunHandle {
    pipeline: Arc<Pipeline>,
    cancel: watch::Sender<bool>,
    finished: watch::Sender<bool>,
}

/// How one stage execution ended, after retries
enum StageResult {
    Succeeded { log: String, attempts: u32 },
    Failed { log: String, reason: String, attempts: u32 },
    Cancelled,
}

struct Inner {
    store: Arc<dyn RunStore>,
    executor: Arc<dyn CommandExecutor>,
    settings: OrchestratorSettings,
    pipelines: RwLock<HashMap<String, Arc<Pipeline>>>,
    runs: Mutex<HashMap<Uuid, RunHandle>>,
    permits: Arc<Semaphore>,
    event_handlers: RwLock<Vec<EventHandler>>,
}

/// Drives runs from trigger to a terminal status
///
/// Cloning is cheap; clones share the registry, the run handles and the
/// stage concurrency limit.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn RunStore>,
        executor: Arc<dyn CommandExecutor>,
        settings: OrchestratorSettings,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(settings.max_concurrent_stages.max(1)));
        Self {
            inner: Arc::new(Inner {
                store,
                executor,
                settings,
                pipelines: RwLock::new(HashMap::new()),
                runs: Mutex::new(HashMap::new()),
                permits,
                event_handlers: RwLock::new(Vec::new()),
            }),
        }
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.inner.settings
    }

    /// Add an event handler
    pub fn add_event_handler<F>(&self, handler: F)
    where
        F: Fn(ExecutionEvent) + Send + Sync + 'static,
    {
        self.inner
            .event_handlers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(Arc::new(handler));
    }

    /// Emit an event to all handlers
    fn emit(&self, event: ExecutionEvent) {
        let handlers = self
            .inner
            .event_handlers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for handler in handlers.iter() {
            handler(event.clone());
        }
    }

    /// Register a pipeline definition for trigger matching
    ///
    /// Re-registering a name replaces its definition. A different pipeline
    /// with the same trigger configuration is rejected.
    pub fn register(&self, pipeline: Pipeline) -> Result<Arc<Pipeline>, OrchestratorError> {
        let mut pipelines = self
            .inner
            .pipelines
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let key = pipeline.trigger.key();
        if let Some(existing) = pipelines
            .values()
            .find(|p| p.name != pipeline.name && p.trigger.key() == key)
        {
            return Err(OrchestratorError::DuplicateTrigger {
                existing: existing.name.clone(),
            });
        }

        info!("Registered pipeline: {}", pipeline.name);
        let pipeline = Arc::new(pipeline);
        pipelines.insert(pipeline.name.clone(), pipeline.clone());
        Ok(pipeline)
    }

    pub fn pipeline(&self, name: &str) -> Option<Arc<Pipeline>> {
        self.inner
            .pipelines
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(name)
            .cloned()
    }

    /// Registered pipelines, sorted by name
    pub fn pipelines(&self) -> Vec<Arc<Pipeline>> {
        let mut pipelines: Vec<_> = self
            .inner
            .pipelines
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .values()
            .cloned()
            .collect();
        pipelines.sort_by(|a, b| a.name.cmp(&b.name));
        pipelines
    }

    /// Start a run for every registered pipeline whose trigger matches `event`
    pub async fn trigger(&self, event: TriggerEvent) -> Result<Vec<Run>, OrchestratorError> {
        let matching: Vec<_> = self
            .pipelines()
            .into_iter()
            .filter(|p| p.matches(&event))
            .collect();

        if matching.is_empty() {
            debug!(
                "No pipeline matches {} on {}/{}",
                event.kind, event.repository, event.branch
            );
        }

        let mut runs = Vec::with_capacity(matching.len());
        for pipeline in matching {
            runs.push(self.start_run(pipeline, event.clone()).await?);
        }
        Ok(runs)
    }

    /// Create a run for `pipeline` and start advancing it in the background
    pub async fn start_run(
        &self,
        pipeline: Arc<Pipeline>,
        event: TriggerEvent,
    ) -> Result<Run, OrchestratorError> {
        if !pipeline.matches(&event) {
            return Err(OrchestratorError::TriggerMismatch(pipeline.name.clone()));
        }

        let run = Run::new(&pipeline, event);
        self.inner.store.create(&run).await?;
        self.track(run.id, pipeline.clone());

        info!(
            "Started run {} of pipeline {} for commit {}",
            run.id, pipeline.name, run.trigger.commit
        );
        self.emit(ExecutionEvent::RunStarted {
            run_id: run.id,
            pipeline_name: pipeline.name.clone(),
            commit: run.trigger.commit.clone(),
        });

        self.spawn_advance(run.id);
        Ok(run)
    }

    fn track(&self, run_id: Uuid, pipeline: Arc<Pipeline>) {
        let (cancel, _) = watch::channel(false);
        let (finished, _) = watch::channel(false);
        lock(&self.inner.runs).insert(
            run_id,
            RunHandle {
                pipeline,
                cancel,
                finished,
            },
        );
    }

    fn pipeline_for(&self, run: &Run) -> Result<Arc<Pipeline>, OrchestratorError> {
        if let Some(handle) = lock(&self.inner.runs).get(&run.id) {
            return Ok(handle.pipeline.clone());
        }
        self.pipeline(&run.pipeline_name)
            .ok_or_else(|| OrchestratorError::PipelineNotFound(run.pipeline_name.clone()))
    }

    async fn load(&self, run_id: Uuid) -> Result<Run, OrchestratorError> {
        self.inner
            .store
            .get(run_id)
            .await?
            .ok_or(OrchestratorError::RunNotFound(run_id))
    }

    fn spawn_advance(&self, run_id: Uuid) {
        let this = self.clone();
        let task: BoxFuture = Box::pin(async move {
            if let Err(e) = this.advance(run_id).await {
                error!("Failed to advance run {}: {}", run_id, e);
            }
        });
        tokio::spawn(task);
    }

    /// Apply every transition the run is ready for and dispatch ready stages
    ///
    /// Safe to call concurrently: each transition is a compare-and-set, so
    /// a stage is dispatched by at most one caller.
    pub async fn advance(&self, run_id: Uuid) -> Result<Run, OrchestratorError> {
        let run = self.load(run_id).await?;
        if run.is_settled() {
            let run = self.inner.store.refresh_status(run_id).await?;
            self.finish(&run);
            return Ok(run);
        }
        let pipeline = self.pipeline_for(&run)?;

        let mut run = run;
        loop {
            let decisions = plan(&pipeline, &run);
            if decisions.is_empty() {
                break;
            }

            let mut changed = false;
            for decision in decisions {
                let mut transition = StageTransition::to(decision.to);
                if let Some(reason) = &decision.reason {
                    transition = transition.with_message(reason.clone());
                }

                let applied = self
                    .inner
                    .store
                    .compare_and_set_stage(run_id, &decision.stage_id, &[decision.from], &transition)
                    .await?;
                if !applied {
                    debug!(
                        "Run {}: stage {} no longer {}, skipping decision",
                        run_id, decision.stage_id, decision.from
                    );
                    continue;
                }
                changed = true;

                match decision.to {
                    StageStatus::Running => {
                        info!("Run {}: dispatching stage {}", run_id, decision.stage_id);
                        self.emit(ExecutionEvent::StageStarted {
                            run_id,
                            stage_id: decision.stage_id.clone(),
                        });
                        self.spawn_stage(run_id, pipeline.clone(), decision.stage_id);
                    }
                    StageStatus::AwaitingApproval => {
                        let environment = pipeline
                            .stage(&decision.stage_id)
                            .and_then(|s| s.gate.environment())
                            .unwrap_or_default()
                            .to_string();
                        info!(
                            "Run {}: stage {} awaiting approval for {}",
                            run_id, decision.stage_id, environment
                        );
                        self.emit(ExecutionEvent::StageAwaitingApproval {
                            run_id,
                            stage_id: decision.stage_id,
                            environment,
                        });
                    }
                    StageStatus::Skipped => {
                        let reason = decision.reason.unwrap_or_default();
                        info!("Run {}: skipped stage {} ({})", run_id, decision.stage_id, reason);
                        self.emit(ExecutionEvent::StageSkipped {
                            run_id,
                            stage_id: decision.stage_id,
                            reason,
                        });
                    }
                    _ => {}
                }
            }

            if !changed {
                break;
            }
            run = self.load(run_id).await?;
        }

        let run = self.inner.store.refresh_status(run_id).await?;
        if run.is_settled() {
            self.finish(&run);
        }
        Ok(run)
    }

    /// Notify waiters and handlers once per run
    fn finish(&self, run: &Run) {
        let Some(handle) = lock(&self.inner.runs).remove(&run.id) else {
            return;
        };
        handle.finished.send_replace(true);

        match run.status {
            RunStatus::Succeeded => info!("Run {} succeeded", run.id),
            status => warn!("Run {} finished: {}", run.id, status),
        }
        self.emit(ExecutionEvent::RunFinished {
            run_id: run.id,
            status: run.status,
        });
    }

    fn spawn_stage(&self, run_id: Uuid, pipeline: Arc<Pipeline>, stage_id: String) {
        // Subscribe before spawning so a cancel issued from here on is observed
        let cancel = lock(&self.inner.runs).get(&run_id).map(|h| h.cancel.subscribe());
        let this = self.clone();
        let task: BoxFuture = Box::pin(async move {
            this.run_stage(run_id, pipeline, stage_id, cancel).await;
        });
        tokio::spawn(task);
    }

    async fn run_stage(
        &self,
        run_id: Uuid,
        pipeline: Arc<Pipeline>,
        stage_id: String,
        cancel: Option<watch::Receiver<bool>>,
    ) {
        let result = match self.execute_stage(run_id, &pipeline, &stage_id, cancel).await {
            Ok(result) => result,
            Err(e) => StageResult::Failed {
                log: String::new(),
                reason: e.to_string(),
                attempts: 0,
            },
        };

        let (transition, event) = match result {
            StageResult::Cancelled => {
                debug!("Run {}: stage {} cancelled", run_id, stage_id);
                return;
            }
            StageResult::Succeeded { log, attempts } => {
                info!("Run {}: stage {} succeeded", run_id, stage_id);
                (
                    StageTransition::to(StageStatus::Succeeded)
                        .with_log(log)
                        .with_attempts(attempts),
                    ExecutionEvent::StageSucceeded {
                        run_id,
                        stage_id: stage_id.clone(),
                    },
                )
            }
            StageResult::Failed {
                log,
                reason,
                attempts,
            } => {
                error!("Run {}: stage {} failed: {}", run_id, stage_id, reason);
                (
                    StageTransition::to(StageStatus::Failed)
                        .with_message(reason.clone())
                        .with_log(log)
                        .with_attempts(attempts),
                    ExecutionEvent::StageFailed {
                        run_id,
                        stage_id: stage_id.clone(),
                        reason,
                    },
                )
            }
        };

        match self
            .inner
            .store
            .compare_and_set_stage(run_id, &stage_id, &[StageStatus::Running], &transition)
            .await
        {
            Ok(true) => self.emit(event),
            Ok(false) => debug!("Run {}: stage {} left RUNNING before completion", run_id, stage_id),
            Err(e) => {
                error!("Run {}: failed to record stage {}: {}", run_id, stage_id, e);
                return;
            }
        }

        if let Err(e) = self.advance(run_id).await {
            error!("Failed to advance run {}: {}", run_id, e);
        }
    }

    async fn execute_stage(
        &self,
        run_id: Uuid,
        pipeline: &Pipeline,
        stage_id: &str,
        mut cancel: Option<watch::Receiver<bool>>,
    ) -> Result<StageResult, OrchestratorError> {
        let stage = pipeline
            .stage(stage_id)
            .ok_or_else(|| OrchestratorError::StageNotFound {
                run_id,
                stage_id: stage_id.to_string(),
            })?;
        let run = self.load(run_id).await?;

        let raised = cancel.as_ref().is_some_and(|rx| *rx.borrow());
        let status = run.stage_status(stage_id);
        if raised || status != Some(StageStatus::Running) {
            debug!(
                "Run {}: stage {} is {:?} before execution, not running it",
                run_id, stage_id, status
            );
            return Ok(StageResult::Cancelled);
        }

        let context = StageContext::for_stage(pipeline, stage, run_id, &run.trigger);
        let job = StageJob {
            run_id,
            stage_id: stage.id.clone(),
            commands: stage.commands.clone(),
            working_dir: self.inner.settings.workdir.clone(),
            env: context.env,
            secrets: stage.secrets.clone(),
        };
        let timeout_secs = stage
            .timeout_secs
            .unwrap_or(self.inner.settings.default_stage_timeout_secs);

        let permit = tokio::select! {
            permit = self.inner.permits.clone().acquire_owned() => permit,
            _ = cancelled(&mut cancel) => return Ok(StageResult::Cancelled),
        };
        let Ok(_permit) = permit else {
            return Ok(StageResult::Failed {
                log: String::new(),
                reason: "Executor pool closed".to_string(),
                attempts: 0,
            });
        };

        Ok(self.execute_with_retry(&job, timeout_secs, &mut cancel).await)
    }

    async fn execute_with_retry(
        &self,
        job: &StageJob,
        timeout_secs: u64,
        cancel: &mut Option<watch::Receiver<bool>>,
    ) -> StageResult {
        let settings = &self.inner.settings;
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            debug!("Stage {} attempt {}", job.stage_id, attempts);

            let result = tokio::select! {
                result = timeout(Duration::from_secs(timeout_secs), self.inner.executor.execute(job)) => result,
                _ = cancelled(cancel) => return StageResult::Cancelled,
            };

            match result {
                Err(_) => {
                    return StageResult::Failed {
                        log: String::new(),
                        reason: format!("Timed out after {} seconds", timeout_secs),
                        attempts,
                    }
                }
                Ok(Ok(ExecutionOutcome::Succeeded { log })) => {
                    return StageResult::Succeeded { log, attempts }
                }
                Ok(Ok(ExecutionOutcome::Failed { log, reason })) => {
                    return StageResult::Failed {
                        log,
                        reason,
                        attempts,
                    }
                }
                Ok(Err(e)) if e.is_retryable() && attempts <= settings.infra_retries => {
                    let delay = settings
                        .retry_backoff_ms
                        .saturating_mul(1u64 << (attempts - 1).min(16));
                    warn!(
                        "Stage {} infrastructure failure (attempt {}/{}), retrying in {}ms: {}",
                        job.stage_id,
                        attempts,
                        settings.infra_retries + 1,
                        delay,
                        e
                    );
                    self.emit(ExecutionEvent::StageRetrying {
                        run_id: job.run_id,
                        stage_id: job.stage_id.clone(),
                        attempt: attempts,
                        error: e.to_string(),
                    });
                    tokio::select! {
                        _ = sleep(Duration::from_millis(delay)) => {}
                        _ = cancelled(cancel) => return StageResult::Cancelled,
                    }
                }
                Ok(Err(e)) => {
                    return StageResult::Failed {
                        log: String::new(),
                        reason: format!("Infrastructure failure: {}", e),
                        attempts,
                    }
                }
            }
        }
    }

    /// Record an approval for a manual gate and resume the run
    pub async fn approve(
        &self,
        run_id: Uuid,
        stage_id: &str,
        actor: &str,
    ) -> Result<Run, OrchestratorError> {
        let run = self.check_decision(run_id, stage_id, actor).await?;

        self.inner
            .store
            .record_approval(
                run.id,
                &ApprovalRecord {
                    stage_id: stage_id.to_string(),
                    actor: actor.to_string(),
                    decision: ApprovalDecision::Approved,
                    decided_at: Utc::now(),
                },
            )
            .await?;

        info!("Run {}: stage {} approved by {}", run_id, stage_id, actor);
        self.emit(ExecutionEvent::StageApproved {
            run_id,
            stage_id: stage_id.to_string(),
            actor: actor.to_string(),
        });

        self.advance(run_id).await
    }

    /// Reject a manual gate: the stage and its dependents are skipped and the run fails
    pub async fn reject(
        &self,
        run_id: Uuid,
        stage_id: &str,
        actor: &str,
    ) -> Result<Run, OrchestratorError> {
        self.check_decision(run_id, stage_id, actor).await?;

        // The rejection is stored only if the gate is still waiting
        let transition = StageTransition::to(StageStatus::Skipped)
            .with_message(format!("Rejected by {}", actor))
            .with_approval(ApprovalRecord {
                stage_id: stage_id.to_string(),
                actor: actor.to_string(),
                decision: ApprovalDecision::Rejected,
                decided_at: Utc::now(),
            });
        let applied = self
            .inner
            .store
            .compare_and_set_stage(run_id, stage_id, &[StageStatus::AwaitingApproval], &transition)
            .await?;
        if !applied {
            let run = self.load(run_id).await?;
            return Err(OrchestratorError::InvalidState {
                stage_id: stage_id.to_string(),
                expected: StageStatus::AwaitingApproval.to_string(),
                actual: run.stage_status(stage_id).unwrap_or(StageStatus::Skipped),
            });
        }

        warn!("Run {}: stage {} rejected by {}", run_id, stage_id, actor);
        self.emit(ExecutionEvent::StageRejected {
            run_id,
            stage_id: stage_id.to_string(),
            actor: actor.to_string(),
        });

        self.advance(run_id).await
    }

    /// Authorization and state checks shared by approve and reject; never mutates
    async fn check_decision(
        &self,
        run_id: Uuid,
        stage_id: &str,
        actor: &str,
    ) -> Result<Run, OrchestratorError> {
        let run = self.load(run_id).await?;
        let pipeline = self.pipeline_for(&run)?;

        let stage = pipeline
            .stage(stage_id)
            .ok_or_else(|| OrchestratorError::StageNotFound {
                run_id,
                stage_id: stage_id.to_string(),
            })?;
        let status = run
            .stage_status(stage_id)
            .ok_or_else(|| OrchestratorError::StageNotFound {
                run_id,
                stage_id: stage_id.to_string(),
            })?;

        if !stage.gate.is_manual() {
            return Err(OrchestratorError::InvalidState {
                stage_id: stage_id.to_string(),
                expected: "a manual gate".to_string(),
                actual: status,
            });
        }
        if !stage.gate.is_authorized(actor) {
            warn!("Run {}: {} is not an approver for stage {}", run_id, actor, stage_id);
            return Err(OrchestratorError::Unauthorized {
                stage_id: stage_id.to_string(),
                actor: actor.to_string(),
            });
        }
        if status != StageStatus::AwaitingApproval {
            return Err(OrchestratorError::InvalidState {
                stage_id: stage_id.to_string(),
                expected: StageStatus::AwaitingApproval.to_string(),
                actual: status,
            });
        }

        Ok(run)
    }

    /// Cancel every non-terminal stage and terminate in-flight executions
    pub async fn cancel(&self, run_id: Uuid) -> Result<Run, OrchestratorError> {
        let run = self.load(run_id).await?;
        if run.is_settled() {
            return Err(OrchestratorError::RunFinished(run_id));
        }

        if let Some(handle) = lock(&self.inner.runs).get(&run_id) {
            handle.cancel.send_replace(true);
        }

        let transition = StageTransition::to(StageStatus::Cancelled).with_message("Run cancelled");
        for record in &run.stages {
            self.inner
                .store
                .compare_and_set_stage(run_id, &record.stage_id, &StageStatus::ACTIVE, &transition)
                .await?;
        }

        info!("Run {} cancelled", run_id);
        self.emit(ExecutionEvent::RunCancelled { run_id });

        let run = self.inner.store.refresh_status(run_id).await?;
        if run.is_settled() {
            self.finish(&run);
        }
        Ok(run)
    }

    /// Current snapshot of a run
    pub async fn status(&self, run_id: Uuid) -> Result<Run, OrchestratorError> {
        self.load(run_id).await
    }

    /// Runs with at least one non-terminal stage
    pub async fn list_active(&self) -> Result<Vec<Run>, OrchestratorError> {
        Ok(self.inner.store.list_active().await?)
    }

    /// Most recent runs first
    pub async fn list_runs(
        &self,
        pipeline_name: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Run>, OrchestratorError> {
        Ok(self.inner.store.list_runs(pipeline_name, limit).await?)
    }

    /// Wait until every stage of the run is terminal
    ///
    /// Runs this orchestrator is not driving are returned as they are.
    pub async fn wait_for_completion(&self, run_id: Uuid) -> Result<Run, OrchestratorError> {
        let finished = lock(&self.inner.runs)
            .get(&run_id)
            .map(|h| h.finished.subscribe());

        if let Some(mut finished) = finished {
            // A closed channel means the handle was dropped after the run finished
            let _ = finished.wait_for(|done| *done).await;
        }
        self.load(run_id).await
    }

    /// Pick up runs left active by a previous process
    ///
    /// Stages that were RUNNING lost their execution and are marked FAILED;
    /// everything else resumes where it stopped. Returns the resumed runs.
    pub async fn resume_active(&self) -> Result<Vec<Uuid>, OrchestratorError> {
        let mut resumed = Vec::new();

        for run in self.inner.store.list_active().await? {
            if lock(&self.inner.runs).contains_key(&run.id) {
                continue;
            }
            let Some(pipeline) = self.pipeline(&run.pipeline_name) else {
                warn!(
                    "Cannot resume run {}: pipeline {} is not registered",
                    run.id, run.pipeline_name
                );
                continue;
            };

            self.track(run.id, pipeline);
            let interrupted = StageTransition::to(StageStatus::Failed)
                .with_message("Interrupted by orchestrator restart");
            for record in run.stages.iter().filter(|s| s.status == StageStatus::Running) {
                if self
                    .inner
                    .store
                    .compare_and_set_stage(run.id, &record.stage_id, &[StageStatus::Running], &interrupted)
                    .await?
                {
                    self.emit(ExecutionEvent::StageFailed {
                        run_id: run.id,
                        stage_id: record.stage_id.clone(),
                        reason: "Interrupted by orchestrator restart".to_string(),
                    });
                }
            }

            info!("Resuming run {} of pipeline {}", run.id, run.pipeline_name);
            self.advance(run.id).await?;
            resumed.push(run.id);
        }

        Ok(resumed)
    }
}

/// Resolves once the run's cancel signal is raised; never resolves without one
async fn cancelled(cancel: &mut Option<watch::Receiver<bool>>) {
    match cancel {
        Some(rx) => {
            let closed = rx.wait_for(|cancelled| *cancelled).await.is_err();
            if closed {
                std::future::pending::<()>().await;
            }
        }
        None => std::future::pending::<()>().await,
    }
}
