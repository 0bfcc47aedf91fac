//! CLI output formatting

use crate::{
    core::{Run, RunStatus, StageStatus},
    execution::ExecutionEvent,
};
use console::Emoji;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

// Re-export style
pub use console::style;

// Emojis for output
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
pub static SPINNER: Emoji<'_, '_> = Emoji("⏳ ", "~ ");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "!");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "> ");
pub static LOCK: Emoji<'_, '_> = Emoji("🔒 ", "# ");

/// Create a progress bar
pub fn create_progress_bar(total: usize) -> ProgressBar {
    let progress = ProgressBar::new(total as u64);
    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        .map(|s| s.progress_chars("#>-"))
        .unwrap_or_else(|_| ProgressStyle::default_bar());
    progress.set_style(style);
    progress.enable_steady_tick(Duration::from_millis(100));
    progress
}

fn short_id(id: &uuid::Uuid) -> String {
    id.to_string()[..8].to_string()
}

fn short_commit(commit: &str) -> String {
    commit.chars().take(8).collect()
}

/// Format a stage status for display
pub fn format_stage_status(status: StageStatus) -> String {
    let text = status.as_str();
    match status {
        StageStatus::Pending | StageStatus::Skipped => style(text).dim().to_string(),
        StageStatus::Blocked | StageStatus::Running => style(text).yellow().to_string(),
        StageStatus::AwaitingApproval => style(text).blue().to_string(),
        StageStatus::Succeeded => style(text).green().to_string(),
        StageStatus::Failed => style(text).red().to_string(),
        StageStatus::Cancelled => style(text).magenta().to_string(),
    }
}

/// Format a run status for display
pub fn format_run_status(status: RunStatus) -> String {
    let text = status.as_str();
    match status {
        RunStatus::Pending => style(text).dim().to_string(),
        RunStatus::Running => style(text).yellow().to_string(),
        RunStatus::AwaitingApproval => style(text).blue().to_string(),
        RunStatus::Succeeded => style(text).green().to_string(),
        RunStatus::Failed => style(text).red().to_string(),
        RunStatus::Cancelled => style(text).magenta().to_string(),
    }
}

/// One-line summary of a run
pub fn format_run_summary(run: &Run) -> String {
    let status_icon = match run.status {
        RunStatus::Succeeded => CHECK,
        RunStatus::Failed | RunStatus::Cancelled => CROSS,
        RunStatus::AwaitingApproval => LOCK,
        RunStatus::Running | RunStatus::Pending => SPINNER,
    };
    let done = run.stages.iter().filter(|s| s.status.is_terminal()).count();

    format!(
        "{} {} - {} - {} ({}/{}) - {}@{} - {}",
        status_icon,
        style(short_id(&run.id)).dim(),
        style(&run.pipeline_name).bold(),
        format_run_status(run.status),
        done,
        run.stages.len(),
        run.trigger.branch,
        short_commit(&run.trigger.commit),
        style(run.created_at.format("%Y-%m-%d %H:%M:%S")).dim()
    )
}

/// Multi-line view of a run and its stages
pub fn format_run_details(run: &Run, with_logs: bool) -> String {
    let mut out = format!(
        "{} {}\n  Pipeline: {}\n  Trigger:  {} {}/{} @ {} by {}\n  Status:   {}\n",
        INFO,
        style(run.id).bold(),
        run.pipeline_name,
        run.trigger.kind,
        run.trigger.repository,
        run.trigger.branch,
        run.trigger.commit,
        run.trigger.actor,
        format_run_status(run.status)
    );

    for stage in &run.stages {
        out.push_str(&format!("  - {:<24} {}", stage.stage_id, format_stage_status(stage.status)));
        if let (Some(started), Some(finished)) = (stage.started_at, stage.finished_at) {
            let secs = (finished - started).num_milliseconds() as f64 / 1000.0;
            out.push_str(&format!(" {}", style(format!("({:.1}s)", secs)).dim()));
        }
        if let Some(message) = &stage.message {
            out.push_str(&format!(" {}", style(message).dim()));
        }
        out.push('\n');
        if with_logs && !stage.log.is_empty() {
            for line in format_output(&stage.log, 20).lines() {
                out.push_str(&format!("      {}\n", line));
            }
        }
    }

    for approval in &run.approvals {
        out.push_str(&format!(
            "  {} {} {} by {} at {}\n",
            LOCK,
            approval.stage_id,
            approval.decision.as_str(),
            approval.actor,
            approval.decided_at.format("%Y-%m-%d %H:%M:%S")
        ));
    }

    out
}

/// Format an execution event for display
pub fn format_execution_event(event: &ExecutionEvent) -> String {
    match event {
        ExecutionEvent::RunStarted {
            run_id,
            pipeline_name,
            commit,
        } => format!(
            "{} Starting pipeline {} at {} ({})",
            ROCKET,
            style(pipeline_name).bold(),
            style(short_commit(commit)).cyan(),
            style(short_id(run_id)).dim()
        ),
        ExecutionEvent::StageStarted { stage_id, .. } => {
            format!("{} {}", SPINNER, style(stage_id).cyan())
        }
        ExecutionEvent::StageRetrying {
            stage_id,
            attempt,
            error,
            ..
        } => format!(
            "{} {} (attempt {} failed: {})",
            WARN,
            style(stage_id).yellow(),
            attempt,
            style(error).dim()
        ),
        ExecutionEvent::StageSucceeded { stage_id, .. } => {
            format!("{} {}", CHECK, style(stage_id).green())
        }
        ExecutionEvent::StageFailed {
            stage_id, reason, ..
        } => format!("{} {}: {}", CROSS, style(stage_id).red(), style(reason).dim()),
        ExecutionEvent::StageSkipped {
            stage_id, reason, ..
        } => format!("{} {} skipped ({})", INFO, style(stage_id).dim(), reason),
        ExecutionEvent::StageAwaitingApproval {
            stage_id,
            environment,
            ..
        } => format!(
            "{} {} awaiting approval for {}",
            LOCK,
            style(stage_id).blue(),
            style(environment).bold()
        ),
        ExecutionEvent::StageApproved {
            stage_id, actor, ..
        } => format!("{} {} approved by {}", CHECK, style(stage_id).cyan(), actor),
        ExecutionEvent::StageRejected {
            stage_id, actor, ..
        } => format!("{} {} rejected by {}", CROSS, style(stage_id).red(), actor),
        ExecutionEvent::RunCancelled { run_id } => {
            format!("{} Run {} cancelled", WARN, style(short_id(run_id)).dim())
        }
        ExecutionEvent::RunFinished { run_id, status } => format!(
            "{} Run ({}) finished: {}",
            INFO,
            style(short_id(run_id)).dim(),
            format_run_status(*status)
        ),
    }
}

/// Format stage output with truncation
pub fn format_output(output: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = output.lines().collect();

    if lines.len() <= max_lines {
        output.to_string()
    } else {
        let truncated = lines[..max_lines].join("\n");
        format!(
            "{}\n{}... ({} more lines)",
            truncated,
            style("[truncated]").dim(),
            lines.len() - max_lines
        )
    }
}
