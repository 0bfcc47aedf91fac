//! Command executor - runs a stage's commands on a worker

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Everything an executor needs to run one stage attempt
#[derive(Debug, Clone)]
pub struct StageJob {
    pub run_id: Uuid,
    pub stage_id: String,
    pub commands: Vec<String>,
    pub working_dir: PathBuf,
    pub env: BTreeMap<String, String>,
    /// Secret names, resolved by the executor at execution time
    pub secrets: Vec<String>,
}

/// Result of running a stage's commands to completion
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// Every command exited zero
    Succeeded { log: String },
    /// A command exited non-zero; later commands were not run
    Failed { log: String, reason: String },
}

/// The executor could not run the stage at all
#[derive(Debug, Error)]
pub enum InfraError {
    #[error("Failed to spawn '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Secret '{0}' could not be resolved")]
    MissingSecret(String),

    #[error("Working directory {0} does not exist")]
    WorkingDir(PathBuf),

    #[error("Executor unavailable: {0}")]
    Unavailable(String),
}

impl InfraError {
    /// Whether another attempt could succeed
    pub fn is_retryable(&self) -> bool {
        !matches!(self, InfraError::MissingSecret(_))
    }
}

/// Trait for stage executors
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Run the job's commands in order, stopping at the first failure
    async fn execute(&self, job: &StageJob) -> Result<ExecutionOutcome, InfraError>;
}

/// Looks up secret values by name
pub trait SecretResolver: Send + Sync {
    fn resolve(&self, name: &str) -> Option<String>;
}

/// Reads secrets from `CONDUIT_SECRET_<NAME>` environment variables
#[derive(Debug, Clone)]
pub struct EnvSecretResolver {
    prefix: String,
}

impl EnvSecretResolver {
    pub fn new() -> Self {
        Self::with_prefix("CONDUIT_SECRET_")
    }

    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    fn variable(&self, name: &str) -> String {
        let suffix: String = name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
            .collect();
        format!("{}{}", self.prefix, suffix)
    }
}

impl Default for EnvSecretResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl SecretResolver for EnvSecretResolver {
    fn resolve(&self, name: &str) -> Option<String> {
        std::env::var(self.variable(name)).ok()
    }
}

impl SecretResolver for HashMap<String, String> {
    fn resolve(&self, name: &str) -> Option<String> {
        self.get(name).cloned()
    }
}

/// Runs each command with `sh -c` on the local host
pub struct ShellExecutor {
    secrets: Arc<dyn SecretResolver>,
}

impl ShellExecutor {
    pub fn new() -> Self {
        Self::with_secrets(Arc::new(EnvSecretResolver::new()))
    }

    pub fn with_secrets(secrets: Arc<dyn SecretResolver>) -> Self {
        Self { secrets }
    }

    fn resolve_secrets(&self, job: &StageJob) -> Result<Vec<(String, String)>, InfraError> {
        job.secrets
            .iter()
            .map(|name| {
                self.secrets
                    .resolve(name)
                    .map(|value| (name.clone(), value))
                    .ok_or_else(|| InfraError::MissingSecret(name.clone()))
            })
            .collect()
    }
}

impl Default for ShellExecutor {
    fn default() -> Self {
        Self::new()
    }
}

/// Kills the process group led by a spawned command when dropped
struct ProcessGroup {
    leader: Option<u32>,
}

impl ProcessGroup {
    fn new(leader: Option<u32>) -> Self {
        Self { leader }
    }

    /// The command exited on its own; nothing left to kill
    fn release(mut self) {
        self.leader = None;
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        let Some(leader) = self.leader.take() else {
            return;
        };

        #[cfg(unix)]
        {
            use nix::errno::Errno;
            use nix::sys::signal::{killpg, Signal};
            use nix::unistd::Pid;

            debug!("Killing process group {}", leader);
            if let Err(e) = killpg(Pid::from_raw(leader as i32), Signal::SIGKILL) {
                if e != Errno::ESRCH {
                    warn!("Failed to kill process group {}: {}", leader, e);
                }
            }
        }
        #[cfg(not(unix))]
        let _ = leader;
    }
}

/// Replace every secret value in `log` with `***`
fn mask(mut log: String, secrets: &[(String, String)]) -> String {
    for (_, value) in secrets {
        if !value.is_empty() {
            log = log.replace(value.as_str(), "***");
        }
    }
    log
}

#[async_trait]
impl CommandExecutor for ShellExecutor {
    async fn execute(&self, job: &StageJob) -> Result<ExecutionOutcome, InfraError> {
        let secrets = self.resolve_secrets(job)?;

        if !job.working_dir.is_dir() {
            return Err(InfraError::WorkingDir(job.working_dir.clone()));
        }

        info!("Executing stage {} of run {}", job.stage_id, job.run_id);

        let mut log = String::new();
        let total = job.commands.len();

        for (index, command) in job.commands.iter().enumerate() {
            debug!("Stage {} command {}/{}: {}", job.stage_id, index + 1, total, command);
            log.push_str(&format!("$ {}\n", command));

            let mut cmd = Command::new("sh");
            cmd.arg("-c")
                .arg(command)
                .current_dir(&job.working_dir)
                .envs(&job.env)
                .envs(secrets.iter().map(|(k, v)| (k.as_str(), v.as_str())))
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true);
            // The command and everything it starts share one process group
            #[cfg(unix)]
            cmd.process_group(0);

            let child = cmd.spawn().map_err(|source| InfraError::Spawn {
                command: command.clone(),
                source,
            })?;

            // Dropping this future (timeout, cancellation) kills the whole group
            let group = ProcessGroup::new(child.id());
            let output = child.wait_with_output().await.map_err(|source| InfraError::Spawn {
                command: command.clone(),
                source,
            })?;
            group.release();

            log.push_str(&String::from_utf8_lossy(&output.stdout));
            log.push_str(&String::from_utf8_lossy(&output.stderr));

            if !output.status.success() {
                log.push_str(&format!("[{}]\n", output.status));
                warn!(
                    "Stage {} command {}/{} failed: {}",
                    job.stage_id,
                    index + 1,
                    total,
                    output.status
                );
                return Ok(ExecutionOutcome::Failed {
                    log: mask(log, &secrets),
                    reason: format!("Command {} of {} failed: {}", index + 1, total, command),
                });
            }
        }

        Ok(ExecutionOutcome::Succeeded {
            log: mask(log, &secrets),
        })
    }
}
