//! Orchestrator settings
//!
//! Loaded from an optional YAML file, then overridden by `CONDUIT_*`
//! environment variables. CLI flags are applied last by the binary.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Failed to read settings file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse settings: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid value '{value}' for {variable}")]
    InvalidValue { variable: String, value: String },

    #[error("max_concurrent_stages must be at least 1")]
    NoConcurrency,

    #[error("default_stage_timeout_secs must be greater than zero")]
    ZeroTimeout,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorSettings {
    /// Stages executing at once, shared across all runs
    pub max_concurrent_stages: usize,

    /// Timeout for stages that set none
    pub default_stage_timeout_secs: u64,

    /// Extra attempts after an infrastructure failure
    pub infra_retries: u32,

    /// First retry delay; doubled on every further attempt
    pub retry_backoff_ms: u64,

    pub database_path: PathBuf,

    pub bind_addr: String,

    /// Directory stage commands run in
    pub workdir: PathBuf,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            max_concurrent_stages: 4,
            default_stage_timeout_secs: 3600,
            infra_retries: 3,
            retry_backoff_ms: 500,
            database_path: default_database_path(),
            bind_addr: "127.0.0.1:8080".to_string(),
            workdir: PathBuf::from("."),
        }
    }
}

/// `<data dir>/conduit/runs.db`
pub fn default_database_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("conduit")
        .join("runs.db")
}

impl OrchestratorSettings {
    /// Defaults, then `path` if given, then the process environment
    pub fn load(path: Option<&Path>) -> Result<Self, SettingsError> {
        let mut settings = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        settings.apply_env_overrides(|name| std::env::var(name).ok())?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_file(path: &Path) -> Result<Self, SettingsError> {
        let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self, SettingsError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Override fields from `CONDUIT_<FIELD>` variables looked up through `lookup`
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), SettingsError>
    where
        F: Fn(&str) -> Option<String>,
    {
        macro_rules! apply_override {
            ($field:ident, $env:literal) => {
                if let Some(value) = parse_var(&lookup, $env)? {
                    self.$field = value;
                }
            };
        }

        apply_override!(max_concurrent_stages, "CONDUIT_MAX_CONCURRENT_STAGES");
        apply_override!(default_stage_timeout_secs, "CONDUIT_DEFAULT_STAGE_TIMEOUT_SECS");
        apply_override!(infra_retries, "CONDUIT_INFRA_RETRIES");
        apply_override!(retry_backoff_ms, "CONDUIT_RETRY_BACKOFF_MS");
        apply_override!(database_path, "CONDUIT_DATABASE_PATH");
        apply_override!(bind_addr, "CONDUIT_BIND_ADDR");
        apply_override!(workdir, "CONDUIT_WORKDIR");

        Ok(())
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.max_concurrent_stages == 0 {
            return Err(SettingsError::NoConcurrency);
        }
        if self.default_stage_timeout_secs == 0 {
            return Err(SettingsError::ZeroTimeout);
        }
        Ok(())
    }
}

fn parse_var<T, F>(lookup: &F, variable: &str) -> Result<Option<T>, SettingsError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(variable) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| SettingsError::InvalidValue {
                variable: variable.to_string(),
                value,
            }),
    }
}
