//! Core domain models for pipelines and runs
//!
//! This module defines the pipeline definition (stages, gates, trigger
//! predicate), the loader that validates it, and the per-run state.

pub mod config;
pub mod context;
pub mod pipeline;
pub mod run;
pub mod stage;
pub mod state;
pub mod trigger;

pub use config::{load_pipeline, ConfigError, PipelineConfig};
pub use context::StageContext;
pub use pipeline::Pipeline;
pub use run::{ApprovalDecision, ApprovalRecord, Run, StageRecord, StageTransition};
pub use stage::{Gate, Stage};
pub use state::{RunStatus, StageStatus};
pub use trigger::{NamePattern, TriggerEvent, TriggerPredicate};
