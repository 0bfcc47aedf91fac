//! Run orchestration: scheduling, stage execution and the orchestrator

pub mod error;
pub mod executor;
pub mod orchestrator;
pub mod scheduler;

pub use error::OrchestratorError;
pub use executor::{
    CommandExecutor, EnvSecretResolver, ExecutionOutcome, InfraError, SecretResolver, ShellExecutor,
    StageJob,
};
pub use orchestrator::{EventHandler, ExecutionEvent, Orchestrator};
pub use scheduler::{plan, Decision};
