//! CLI command definitions

use clap::Args;
use std::path::PathBuf;
use uuid::Uuid;

/// Trigger metadata for a run
#[derive(Debug, Args, Clone)]
pub struct TriggerArgs {
    /// Repository the event came from
    #[arg(long, default_value = "local")]
    pub repository: String,

    /// Branch that was pushed
    #[arg(long, default_value = "main")]
    pub branch: String,

    /// Commit identifier
    #[arg(long, default_value = "HEAD")]
    pub commit: String,

    /// Identity that caused the event
    #[arg(long, env = "USER", default_value = "local")]
    pub actor: String,

    /// Event kind
    #[arg(long, default_value = "push")]
    pub kind: String,
}

/// Run a pipeline
#[derive(Debug, Args, Clone)]
pub struct RunCommand {
    /// Path to pipeline YAML file
    #[arg(short, long)]
    pub file: PathBuf,

    #[command(flatten)]
    pub trigger: TriggerArgs,

    /// Variable overrides (key=value)
    #[arg(long, value_parser = parse_key_value)]
    pub variable: Vec<(String, String)>,

    /// Don't save the run to history
    #[arg(long)]
    pub no_history: bool,

    /// Approve every manual gate as this identity instead of prompting
    #[arg(long)]
    pub approve_as: Option<String>,

    /// Directory stage commands run in
    #[arg(long)]
    pub workdir: Option<PathBuf>,

    /// Maximum stages executing at once
    #[arg(long)]
    pub max_concurrent: Option<usize>,
}

/// Validate a pipeline definition
#[derive(Debug, Args, Clone)]
pub struct ValidateCommand {
    /// Path to pipeline YAML file
    #[arg(short, long)]
    pub file: PathBuf,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Serve the HTTP API
#[derive(Debug, Args, Clone)]
pub struct ServeCommand {
    /// Pipeline YAML files to register
    #[arg(required = true)]
    pub pipelines: Vec<PathBuf>,

    /// Address to listen on
    #[arg(long)]
    pub bind: Option<String>,

    /// Keep runs in memory only
    #[arg(long)]
    pub no_history: bool,
}

/// Address of a running server
#[derive(Debug, Args, Clone)]
pub struct ServerArgs {
    /// Base URL of the conduit server
    #[arg(long, env = "CONDUIT_SERVER", default_value = "http://127.0.0.1:8080")]
    pub server: String,
}

/// Send a trigger event
#[derive(Debug, Args, Clone)]
pub struct TriggerCommand {
    #[command(flatten)]
    pub trigger: TriggerArgs,

    #[command(flatten)]
    pub server: ServerArgs,
}

/// Show run history
#[derive(Debug, Args, Clone)]
pub struct HistoryCommand {
    /// Pipeline name to filter by
    #[arg(short, long)]
    pub pipeline: Option<String>,

    /// Number of recent runs to show
    #[arg(short, long, default_value_t = 10)]
    pub limit: usize,

    /// Show stages and logs
    #[arg(long)]
    pub details: bool,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,

    /// Show a single run
    #[arg(long)]
    pub run_id: Option<Uuid>,
}

/// Show a run's status
#[derive(Debug, Args, Clone)]
pub struct StatusCommand {
    /// Run to show; every active run when omitted
    pub run_id: Option<Uuid>,

    /// Include stage logs
    #[arg(long)]
    pub logs: bool,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,

    #[command(flatten)]
    pub server: ServerArgs,
}

/// Approve or reject a stage
#[derive(Debug, Args, Clone)]
pub struct DecisionCommand {
    pub run_id: Uuid,

    pub stage_id: String,

    /// Identity making the decision
    #[arg(long = "as", env = "CONDUIT_ACTOR")]
    pub actor: String,

    #[command(flatten)]
    pub server: ServerArgs,
}

/// Cancel a run
#[derive(Debug, Args, Clone)]
pub struct CancelCommand {
    pub run_id: Uuid,

    /// Identity requesting the cancellation
    #[arg(long = "as", env = "CONDUIT_ACTOR")]
    pub actor: String,

    #[command(flatten)]
    pub server: ServerArgs,
}

/// Parse key=value pairs
pub fn parse_key_value(s: &str) -> Result<(String, String), String> {
    let parts: Vec<&str> = s.splitn(2, '=').collect();
    if parts.len() != 2 {
        return Err(format!("Invalid key=value pair: {}", s));
    }
    Ok((parts[0].to_string(), parts[1].to_string()))
}
