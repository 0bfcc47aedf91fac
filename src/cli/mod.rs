//! Command-line interface

pub mod commands;
pub mod output;

use clap::{Parser, Subcommand};
use commands::{
    CancelCommand, DecisionCommand, HistoryCommand, RunCommand, ServeCommand, StatusCommand,
    TriggerCommand, ValidateCommand,
};
use std::ffi::OsString;
use std::path::PathBuf;

/// Continuous delivery pipeline orchestrator
#[derive(Debug, Parser, Clone)]
#[command(name = "conduit")]
#[command(version)]
#[command(about = "A continuous delivery pipeline orchestrator with automatic and manual gates", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to orchestrator settings file
    #[arg(short, long, global = true, env = "CONDUIT_SETTINGS")]
    pub settings: Option<PathBuf>,
}

/// Available commands
#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run a pipeline once in this process
    Run(RunCommand),

    /// Validate a pipeline definition
    Validate(ValidateCommand),

    /// Serve the status and approval API
    Serve(ServeCommand),

    /// Send a trigger event to a server
    Trigger(TriggerCommand),

    /// Show run history from the local database
    History(HistoryCommand),

    /// Show a run's status from a server
    Status(StatusCommand),

    /// Approve a stage awaiting approval
    Approve(DecisionCommand),

    /// Reject a stage awaiting approval
    Reject(DecisionCommand),

    /// Cancel a run
    Cancel(CancelCommand),
}

impl Cli {
    /// Parse CLI arguments from environment
    pub fn from_args() -> Self {
        Self::parse()
    }

    /// Parse CLI arguments from a slice
    pub fn try_parse_from<I, T>(itr: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        <Self as Parser>::try_parse_from(itr)
    }
}
