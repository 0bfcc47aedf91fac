use anyhow::{Context, Result};
use conduit::api::create_router;
use conduit::cli::commands::{
    CancelCommand, DecisionCommand, HistoryCommand, RunCommand, ServeCommand, StatusCommand,
    TriggerArgs, TriggerCommand, ValidateCommand,
};
use conduit::cli::output::*;
use conduit::cli::{Cli, Command};
use conduit::client::ConduitClient;
use conduit::core::{load_pipeline, PipelineConfig, RunStatus, TriggerEvent};
use conduit::execution::{ExecutionEvent, Orchestrator, OrchestratorError, ShellExecutor};
use conduit::persistence::{InMemoryRunStore, RunStore};
use conduit::settings::OrchestratorSettings;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use uuid::Uuid;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    // Initialize logging
    let default_filter = if cli.verbose { "conduit=debug" } else { "conduit=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set logging subscriber")?;

    let settings = OrchestratorSettings::load(cli.settings.as_deref())
        .context("Failed to load orchestrator settings")?;

    // Execute command
    match &cli.command {
        Command::Run(cmd) => run_pipeline(cmd, settings).await?,
        Command::Validate(cmd) => validate_pipeline(cmd)?,
        Command::Serve(cmd) => serve(cmd, settings).await?,
        Command::Trigger(cmd) => send_trigger(cmd).await?,
        Command::History(cmd) => show_history(cmd, &settings).await?,
        Command::Status(cmd) => show_status(cmd).await?,
        Command::Approve(cmd) => decide(cmd, true).await?,
        Command::Reject(cmd) => decide(cmd, false).await?,
        Command::Cancel(cmd) => cancel_run(cmd).await?,
    }

    Ok(())
}

fn trigger_event(args: &TriggerArgs) -> TriggerEvent {
    TriggerEvent::push(&args.repository, &args.branch, &args.commit, &args.actor).with_kind(&args.kind)
}

async fn open_store(settings: &OrchestratorSettings, no_history: bool) -> Result<Arc<dyn RunStore>> {
    if no_history {
        return Ok(Arc::new(InMemoryRunStore::new()));
    }

    #[cfg(feature = "sqlite")]
    {
        let store = conduit::persistence::SqliteRunStore::open(&settings.database_path)
            .await
            .with_context(|| format!("Failed to open run database {}", settings.database_path.display()))?;
        Ok(Arc::new(store))
    }

    #[cfg(not(feature = "sqlite"))]
    {
        warn!(
            "Built without sqlite support; runs will not be saved to {}",
            settings.database_path.display()
        );
        Ok(Arc::new(InMemoryRunStore::new()))
    }
}

async fn run_pipeline(cmd: &RunCommand, mut settings: OrchestratorSettings) -> Result<()> {
    let mut pipeline = load_pipeline(&cmd.file).context("Failed to load pipeline definition")?;

    println!("{} Loaded pipeline: {}", INFO, style(&pipeline.name).bold());

    // Apply variable overrides
    for (key, value) in &cmd.variable {
        pipeline.variables.insert(key.clone(), value.clone());
        println!(
            "{} Variable override: {} = {}",
            INFO,
            style(key).cyan(),
            style(value).dim()
        );
    }

    if let Some(workdir) = &cmd.workdir {
        settings.workdir = workdir.clone();
    }
    if let Some(max) = cmd.max_concurrent {
        settings.max_concurrent_stages = max.max(1);
    }

    let store = open_store(&settings, cmd.no_history).await?;
    let orchestrator = Orchestrator::new(store, Arc::new(ShellExecutor::new()), settings);

    // Console output and approval requests
    let progress = create_progress_bar(pipeline.stages().len());
    let (approvals_tx, mut approvals_rx) = mpsc::unbounded_channel();
    let bar = progress.clone();
    orchestrator.add_event_handler(move |event| {
        bar.println(format_execution_event(&event));
        match &event {
            ExecutionEvent::StageSucceeded { .. }
            | ExecutionEvent::StageFailed { .. }
            | ExecutionEvent::StageSkipped { .. } => bar.inc(1),
            ExecutionEvent::StageAwaitingApproval {
                run_id,
                stage_id,
                environment,
            } => {
                let _ = approvals_tx.send((*run_id, stage_id.clone(), environment.clone()));
            }
            _ => {}
        }
    });

    let pipeline = orchestrator.register(pipeline)?;
    let run = orchestrator
        .start_run(pipeline.clone(), trigger_event(&cmd.trigger))
        .await?;

    let completion = orchestrator.wait_for_completion(run.id);
    tokio::pin!(completion);

    let run = loop {
        tokio::select! {
            run = &mut completion => break run?,
            Some((run_id, stage_id, environment)) = approvals_rx.recv() => {
                let result = match &cmd.approve_as {
                    Some(actor) => orchestrator.approve(run_id, &stage_id, actor).await,
                    None => {
                        let actor = cmd.trigger.actor.clone();
                        let approved = progress.suspend(|| prompt_approval(&stage_id, &environment, &actor));
                        if approved? {
                            orchestrator.approve(run_id, &stage_id, &actor).await
                        } else {
                            orchestrator.reject(run_id, &stage_id, &actor).await
                        }
                    }
                };
                if let Err(e) = result {
                    progress.println(format!("{} {}", CROSS, style(&e).red()));
                    if matches!(e, OrchestratorError::Unauthorized { .. }) {
                        orchestrator.cancel(run_id).await?;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                progress.println(format!("{} Interrupted, cancelling run", WARN));
                if let Err(e) = orchestrator.cancel(run.id).await {
                    warn!("Cancel failed: {}", e);
                }
            }
        }
    };
    progress.finish_and_clear();

    println!("\n{}", format_run_details(&run, false));

    if run.status == RunStatus::Succeeded {
        println!(
            "{} {} completed {}",
            CHECK,
            style(&pipeline.name).bold(),
            style("successfully").green()
        );
        Ok(())
    } else {
        println!(
            "{} {} {}",
            CROSS,
            style(&pipeline.name).bold(),
            format_run_status(run.status)
        );
        std::process::exit(1);
    }
}

/// Ask on the terminal whether to approve a manual gate
fn prompt_approval(stage_id: &str, environment: &str, actor: &str) -> Result<bool> {
    use std::io::Write;

    print!(
        "{} Approve {} for {} as {}? [y/N] ",
        LOCK,
        style(stage_id).bold(),
        style(environment).cyan(),
        actor
    );
    std::io::stdout().flush()?;

    let mut answer = String::new();
    std::io::stdin()
        .read_line(&mut answer)
        .context("Failed to read answer")?;
    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}

fn validate_pipeline(cmd: &ValidateCommand) -> Result<()> {
    println!("{} Validating pipeline...", INFO);

    let result = PipelineConfig::from_file(&cmd.file).and_then(|config| {
        let pipeline = config.to_pipeline()?;
        Ok((config, pipeline))
    });

    match result {
        Ok((config, pipeline)) => {
            println!("{} Pipeline definition is valid!", CHECK);
            println!("  Name: {}", style(&pipeline.name).bold());
            println!("  Stages: {}", style(pipeline.stages().len()).cyan());
            println!("  Order: {}", style(pipeline.execution_order().join(" -> ")).dim());
            for stage in pipeline.stages().iter().filter(|s| s.gate.is_manual()) {
                println!(
                    "  {} {} requires approval for {}",
                    LOCK,
                    style(&stage.id).bold(),
                    stage.gate.environment().unwrap_or_default()
                );
            }

            if cmd.json {
                let json = serde_json::to_string_pretty(&config)?;
                println!("\n{}", json);
            }
            Ok(())
        }
        Err(e) => {
            println!("{} Validation failed:", CROSS);
            println!("  {}", style(e).red());
            std::process::exit(1);
        }
    }
}

async fn serve(cmd: &ServeCommand, mut settings: OrchestratorSettings) -> Result<()> {
    if let Some(bind) = &cmd.bind {
        settings.bind_addr = bind.clone();
    }
    let bind_addr = settings.bind_addr.clone();

    let store = open_store(&settings, cmd.no_history).await?;
    let orchestrator = Orchestrator::new(store, Arc::new(ShellExecutor::new()), settings);

    for path in &cmd.pipelines {
        let pipeline = load_pipeline(path)
            .with_context(|| format!("Failed to load pipeline definition {}", path.display()))?;
        orchestrator.register(pipeline)?;
    }

    let resumed = orchestrator
        .resume_active()
        .await
        .context("Failed to resume active runs")?;
    if !resumed.is_empty() {
        info!("Resumed {} active runs", resumed.len());
    }

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", bind_addr))?;
    info!("Listening on {}", bind_addr);

    axum::serve(listener, create_router(orchestrator))
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutting down");
        })
        .await
        .context("Server error")?;

    Ok(())
}

async fn send_trigger(cmd: &TriggerCommand) -> Result<()> {
    let client = ConduitClient::new(&cmd.server.server);
    let runs = client
        .trigger(&trigger_event(&cmd.trigger))
        .await
        .context("Failed to send trigger")?;

    if runs.is_empty() {
        println!("{} No pipeline matched the event", INFO);
    }
    for run in &runs {
        println!("{} {}", ROCKET, format_run_summary(run));
    }
    Ok(())
}

async fn show_history(cmd: &HistoryCommand, settings: &OrchestratorSettings) -> Result<()> {
    let store = open_store(settings, false).await?;

    // If a specific run is requested
    if let Some(run_id) = cmd.run_id {
        match store.get(run_id).await? {
            Some(run) if cmd.json => println!("{}", serde_json::to_string_pretty(&run)?),
            Some(run) => println!("{}", format_run_details(&run, cmd.details)),
            None => println!("{} Run not found", WARN),
        }
        return Ok(());
    }

    let runs = store.list_runs(cmd.pipeline.as_deref(), cmd.limit).await?;

    if runs.is_empty() {
        println!("{} No runs found", INFO);
        return Ok(());
    }

    if cmd.json {
        let data = serde_json::json!({ "runs": runs });
        println!("{}", serde_json::to_string_pretty(&data)?);
    } else {
        println!("{} Run history (showing latest {}):", INFO, cmd.limit);
        for run in &runs {
            if cmd.details {
                println!("{}", format_run_details(run, true));
            } else {
                println!("  {}", format_run_summary(run));
            }
        }
    }

    Ok(())
}

async fn show_status(cmd: &StatusCommand) -> Result<()> {
    let client = ConduitClient::new(&cmd.server.server);

    let runs = match cmd.run_id {
        Some(run_id) => vec![client.get_run(run_id).await.context("Failed to fetch run")?],
        None => client.list_active().await.context("Failed to list active runs")?,
    };

    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&runs)?);
    } else if runs.is_empty() {
        println!("{} No active runs", INFO);
    } else {
        for run in &runs {
            println!("{}", format_run_details(run, cmd.logs));
        }
    }
    Ok(())
}

async fn decide(cmd: &DecisionCommand, approve: bool) -> Result<()> {
    let client = ConduitClient::new(&cmd.server.server).with_actor(&cmd.actor);

    let run = if approve {
        client.approve(cmd.run_id, &cmd.stage_id).await
    } else {
        client.reject(cmd.run_id, &cmd.stage_id).await
    }
    .with_context(|| format!("Failed to record decision for stage {}", cmd.stage_id))?;

    let verb = if approve { "approved" } else { "rejected" };
    println!("{} {} {}", CHECK, style(&cmd.stage_id).bold(), verb);
    println!("{}", format_run_details(&run, false));
    Ok(())
}

async fn cancel_run(cmd: &CancelCommand) -> Result<()> {
    let client = ConduitClient::new(&cmd.server.server).with_actor(&cmd.actor);
    let run: conduit::core::Run = client
        .cancel(cmd.run_id)
        .await
        .with_context(|| format!("Failed to cancel run {}", short(cmd.run_id)))?;

    println!("{} Run {} cancelled", WARN, style(short(run.id)).dim());
    println!("{}", format_run_details(&run, false));
    Ok(())
}

fn short(id: Uuid) -> String {
    id.to_string()[..8].to_string()
}
