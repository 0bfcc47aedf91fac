//! Pipeline configuration from YAML

use crate::core::{trigger::NamePattern, Pipeline};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// A pipeline definition that failed to load
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid pipeline YAML: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Pipeline name must not be empty")]
    EmptyName,

    #[error("Pipeline has no stages")]
    NoStages,

    #[error("Stage identifier must not be empty")]
    EmptyStageId,

    #[error("Duplicate stage ID: {0}")]
    DuplicateStage(String),

    #[error("Stage '{0}' has no commands")]
    NoCommands(String),

    #[error("Stage '{stage}' depends on non-existent stage '{dependency}'")]
    UnknownDependency { stage: String, dependency: String },

    #[error("Stage '{0}' depends on itself")]
    SelfDependency(String),

    #[error("Cycle detected in dependency graph: {}", .0.join(" -> "))]
    Cycle(Vec<String>),

    #[error("Stage '{0}' has a manual gate without an environment name")]
    EmptyEnvironment(String),

    #[error("Stage '{0}' has a manual gate without approvers")]
    NoApprovers(String),

    #[error("Stage '{0}' has a zero timeout")]
    ZeroTimeout(String),

    #[error("Pipeline default timeout must be greater than zero")]
    ZeroDefaultTimeout,

    #[error("Invalid trigger pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// Top-level pipeline configuration loaded from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Pipeline name
    pub name: String,

    /// Pipeline version (optional)
    #[serde(default)]
    pub version: Option<String>,

    /// Which events start a run
    #[serde(default)]
    pub trigger: TriggerConfig,

    /// Variables exported to every stage's environment
    #[serde(default)]
    pub variables: BTreeMap<String, String>,

    /// Default timeout for stages (in seconds)
    #[serde(default)]
    pub default_timeout_secs: Option<u64>,

    /// Pipeline stages, in declaration order
    pub stages: Vec<StageConfig>,
}

/// Trigger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerConfig {
    /// Repository pattern (any repository when omitted)
    #[serde(default)]
    pub repository: Option<String>,

    /// Branch pattern (any branch when omitted)
    #[serde(default)]
    pub branch: Option<String>,

    /// Accepted event kinds
    #[serde(default = "default_events")]
    pub events: Vec<String>,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            repository: None,
            branch: None,
            events: default_events(),
        }
    }
}

fn default_events() -> Vec<String> {
    vec!["push".to_string()]
}

/// Stage configuration as defined in YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageConfig {
    /// Unique stage identifier
    pub id: String,

    /// Human-readable stage name
    #[serde(default)]
    pub name: Option<String>,

    /// Shell commands, run in order
    #[serde(default)]
    pub commands: Vec<String>,

    /// List of stage IDs this stage depends on
    #[serde(default)]
    pub depends_on: Vec<String>,

    /// Gate guarding the stage
    #[serde(default)]
    pub gate: GateConfig,

    /// Timeout for this stage (overrides the pipeline default)
    #[serde(default)]
    pub timeout_secs: Option<u64>,

    /// Names of secrets resolved at execution time
    #[serde(default)]
    pub secrets: Vec<String>,

    /// Extra environment variables
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

/// Gate configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum GateConfig {
    #[default]
    None,
    Automatic,
    Manual {
        #[serde(default)]
        environment: String,
        #[serde(default)]
        approvers: Vec<String>,
    },
}

impl PipelineConfig {
    /// Load pipeline configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&content)
    }

    /// Parse pipeline configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: PipelineConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the pipeline configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::EmptyName);
        }
        if self.stages.is_empty() {
            return Err(ConfigError::NoStages);
        }
        if self.default_timeout_secs == Some(0) {
            return Err(ConfigError::ZeroDefaultTimeout);
        }

        // Check that all stage IDs are unique
        let mut seen_ids = HashSet::new();
        for stage in &self.stages {
            if stage.id.trim().is_empty() {
                return Err(ConfigError::EmptyStageId);
            }
            if !seen_ids.insert(stage.id.as_str()) {
                return Err(ConfigError::DuplicateStage(stage.id.clone()));
            }
        }

        for stage in &self.stages {
            if stage.commands.is_empty() {
                return Err(ConfigError::NoCommands(stage.id.clone()));
            }
            if stage.timeout_secs == Some(0) {
                return Err(ConfigError::ZeroTimeout(stage.id.clone()));
            }

            for dep in &stage.depends_on {
                if dep == &stage.id {
                    return Err(ConfigError::SelfDependency(stage.id.clone()));
                }
                if !seen_ids.contains(dep.as_str()) {
                    return Err(ConfigError::UnknownDependency {
                        stage: stage.id.clone(),
                        dependency: dep.clone(),
                    });
                }
            }

            if let GateConfig::Manual {
                environment,
                approvers,
            } = &stage.gate
            {
                if environment.trim().is_empty() {
                    return Err(ConfigError::EmptyEnvironment(stage.id.clone()));
                }
                if approvers.iter().all(|a| a.trim().is_empty()) {
                    return Err(ConfigError::NoApprovers(stage.id.clone()));
                }
            }
        }

        for pattern in [&self.trigger.repository, &self.trigger.branch]
            .into_iter()
            .flatten()
        {
            compile_pattern(pattern)?;
        }

        self.check_cycles()
    }

    /// Check for cycles in the stage dependency graph
    fn check_cycles(&self) -> Result<(), ConfigError> {
        let deps: HashMap<&str, &[String]> = self
            .stages
            .iter()
            .map(|s| (s.id.as_str(), s.depends_on.as_slice()))
            .collect();

        let mut visited = HashSet::new();
        let mut path = Vec::new();

        for stage in &self.stages {
            if !visited.contains(stage.id.as_str()) {
                Self::dfs_check(&stage.id, &deps, &mut visited, &mut path)?;
            }
        }

        Ok(())
    }

    fn dfs_check<'a>(
        stage_id: &'a str,
        deps: &HashMap<&'a str, &'a [String]>,
        visited: &mut HashSet<&'a str>,
        path: &mut Vec<&'a str>,
    ) -> Result<(), ConfigError> {
        visited.insert(stage_id);
        path.push(stage_id);

        for dep in deps.get(stage_id).copied().unwrap_or_default() {
            if let Some(start) = path.iter().position(|id| *id == dep.as_str()) {
                let mut cycle: Vec<String> = path[start..].iter().map(|s| s.to_string()).collect();
                cycle.push(dep.clone());
                return Err(ConfigError::Cycle(cycle));
            }
            if !visited.contains(dep.as_str()) {
                Self::dfs_check(dep, deps, visited, path)?;
            }
        }

        path.pop();
        Ok(())
    }

    /// Convert config to a Pipeline domain model
    pub fn to_pipeline(&self) -> Result<Pipeline, ConfigError> {
        Pipeline::from_config(self)
    }
}

pub(crate) fn compile_pattern(pattern: &str) -> Result<NamePattern, ConfigError> {
    NamePattern::parse(pattern).map_err(|source| ConfigError::InvalidPattern {
        pattern: pattern.to_string(),
        source,
    })
}

/// Load and validate a pipeline definition file
pub fn load_pipeline<P: AsRef<Path>>(path: P) -> Result<Pipeline, ConfigError> {
    PipelineConfig::from_file(path)?.to_pipeline()
}
