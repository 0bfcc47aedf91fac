//! conduit - a continuous delivery pipeline orchestrator with automatic and manual gates

pub mod api;
pub mod cli;
pub mod client;
pub mod core;
pub mod execution;
pub mod persistence;
pub mod settings;

// Re-export commonly used types
pub use crate::core::{Pipeline, Run, RunStatus, Stage, StageStatus, TriggerEvent};
pub use crate::execution::{CommandExecutor, ExecutionEvent, Orchestrator, OrchestratorError};
pub use crate::persistence::{InMemoryRunStore, RunStore};
pub use crate::settings::OrchestratorSettings;
