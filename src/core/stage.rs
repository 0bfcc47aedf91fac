//! Stage and gate domain model

use crate::core::config::{GateConfig, StageConfig};
use crate::core::state::StageStatus;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Precondition a stage must satisfy before it starts
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Gate {
    /// No gate beyond the dependency order
    None,
    /// Opens as soon as every dependency has succeeded
    Automatic,
    /// Held until an authorized identity approves it
    Manual {
        environment: String,
        approvers: BTreeSet<String>,
    },
}

impl Gate {
    pub fn is_manual(&self) -> bool {
        matches!(self, Gate::Manual { .. })
    }

    /// Environment name for manual gates
    pub fn environment(&self) -> Option<&str> {
        match self {
            Gate::Manual { environment, .. } => Some(environment),
            _ => None,
        }
    }

    /// Check whether `identity` may approve or reject this gate
    ///
    /// Automatic gates have no approvers, so nobody is authorized.
    pub fn is_authorized(&self, identity: &str) -> bool {
        match self {
            Gate::Manual { approvers, .. } => approvers.contains(identity),
            _ => false,
        }
    }
}

impl From<&GateConfig> for Gate {
    fn from(config: &GateConfig) -> Self {
        match config {
            GateConfig::None => Gate::None,
            GateConfig::Automatic => Gate::Automatic,
            GateConfig::Manual {
                environment,
                approvers,
            } => Gate::Manual {
                environment: environment.trim().to_string(),
                approvers: approvers
                    .iter()
                    .map(|a| a.trim().to_string())
                    .filter(|a| !a.is_empty())
                    .collect(),
            },
        }
    }
}

/// A single stage in a pipeline
#[derive(Debug, Clone, Serialize)]
pub struct Stage {
    /// Unique stage identifier
    pub id: String,

    /// Display name (defaults to the id)
    pub name: String,

    /// Shell commands, run in order
    pub commands: Vec<String>,

    /// List of stage IDs this stage depends on
    pub dependencies: Vec<String>,

    pub gate: Gate,

    /// Timeout in seconds; `None` falls back to the orchestrator default
    pub timeout_secs: Option<u64>,

    /// Secret names handed to the executor, never their values
    pub secrets: Vec<String>,

    /// Extra environment variables
    pub env: BTreeMap<String, String>,
}

impl Stage {
    /// Create a stage from a stage config
    pub fn from_config(config: &StageConfig, default_timeout_secs: Option<u64>) -> Self {
        Stage {
            id: config.id.clone(),
            name: config.name.clone().unwrap_or_else(|| config.id.clone()),
            commands: config.commands.clone(),
            dependencies: config.depends_on.clone(),
            gate: Gate::from(&config.gate),
            timeout_secs: config.timeout_secs.or(default_timeout_secs),
            secrets: config.secrets.clone(),
            env: config.env.clone(),
        }
    }

    /// Check if every dependency has succeeded
    pub fn dependencies_succeeded(&self, statuses: &HashMap<&str, StageStatus>) -> bool {
        self.dependencies
            .iter()
            .all(|dep| statuses.get(dep.as_str()) == Some(&StageStatus::Succeeded))
    }

    /// First dependency that ended in a way that prevents this stage from running
    pub fn broken_dependency<'a>(&'a self, statuses: &HashMap<&str, StageStatus>) -> Option<&'a str> {
        self.dependencies
            .iter()
            .find(|dep| {
                matches!(
                    statuses.get(dep.as_str()),
                    Some(StageStatus::Failed | StageStatus::Skipped | StageStatus::Cancelled)
                )
            })
            .map(String::as_str)
    }
}
