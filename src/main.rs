use anyhow::{Context, Result};
use jobline::cli::commands::{HistoryCommand, ListCommand, RunCommand, ValidateCommand};
use jobline::cli::output::*;
use jobline::cli::terminal_output::TerminalOutput;
use jobline::cli::{Cli, Command};
use jobline::core::config::WorkflowConfig;
use jobline::execution::{ExecutionEngine, RunOutcome};
use jobline::persistence::{create_summary, HistoryBackend};
use jobline::process::ShellRunner;
use jobline::ExecutionStatus;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    // RUST_LOG wins over --verbose
    let default_level = if cli.verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set logging subscriber")?;

    match &cli.command {
        Command::Run(cmd) => run_workflow(cmd, &cli).await?,
        Command::Validate(cmd) => validate_workflow(cmd)?,
        Command::List(cmd) => list_workflows(cmd, &cli).await?,
        Command::History(cmd) => show_history(cmd, &cli).await?,
    }

    Ok(())
}

#[cfg(feature = "sqlite")]
async fn open_history(cli: &Cli) -> Result<Arc<dyn HistoryBackend>> {
    use jobline::persistence::SqliteHistoryStore;

    let store = match &cli.history_db {
        Some(path) => SqliteHistoryStore::open(std::path::Path::new(path)).await?,
        None => SqliteHistoryStore::with_default_path().await?,
    };
    Ok(Arc::new(store))
}

#[cfg(not(feature = "sqlite"))]
async fn open_history(_cli: &Cli) -> Result<Arc<dyn HistoryBackend>> {
    warn!("Built without SQLite support; history is not kept between runs");
    Ok(Arc::new(jobline::persistence::InMemoryHistory::new()))
}

async fn run_workflow(cmd: &RunCommand, cli: &Cli) -> Result<()> {
    let config = WorkflowConfig::from_file(&cmd.file).context("Failed to load workflow")?;

    println!(
        "{} Loaded workflow: {}",
        INFO,
        style(&config.name).bold()
    );

    let mut workflow = config.to_workflow();

    for (key, value) in &cmd.env {
        workflow.env.insert(key.clone(), value.clone());
        println!(
            "{} Env override: {} = {}",
            INFO,
            style(key).cyan(),
            style(value).dim()
        );
    }

    if !cmd.jobs.is_empty() {
        workflow.retain_jobs(&cmd.jobs)?;
    }

    let history = if cmd.no_history {
        None
    } else {
        Some(open_history(cli).await?)
    };

    let engine = ExecutionEngine::new(ShellRunner::new(), cmd.scheduling(), cmd.engine_options());

    let terminal = Arc::new(TerminalOutput::new(cli.stream));
    engine.add_event_handler(move |event| terminal.handle(&event));

    let cancelled = engine.cancellation_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("{} Interrupted; stopping after the current step", WARN);
            cancelled.store(true, Ordering::SeqCst);
        }
    });

    let event = cmd.trigger_event();
    println!();
    let status = if cmd.force {
        engine.run(&mut workflow, &event).await
    } else {
        match engine.execute(&mut workflow, &event).await {
            RunOutcome::Completed(status) => status,
            RunOutcome::NotTriggered => {
                println!(
                    "\n{} Nothing to run for {} on {} (use --force to run anyway)",
                    INFO,
                    event.kind,
                    style(&event.branch).cyan()
                );
                return Ok(());
            }
        }
    };

    if let Some(history) = history {
        let summary = create_summary(&workflow, &event);
        match history.save_run(&summary).await {
            Ok(()) => println!(
                "\n{} Run saved to history (ID: {})",
                INFO,
                style(&summary.run_id.to_string()[..8]).dim()
            ),
            Err(e) => warn!("Failed to save run history: {:#}", e),
        }
    }

    if status == ExecutionStatus::Succeeded {
        println!(
            "\n{} {} completed {}",
            CHECK,
            style(&workflow.name).bold(),
            style("successfully").green()
        );
        Ok(())
    } else {
        println!(
            "\n{} {} {}",
            CROSS,
            style(&workflow.name).bold(),
            format_status(status)
        );
        error!("Workflow '{}' finished with status {}", workflow.name, status);
        std::process::exit(1);
    }
}

fn validate_workflow(cmd: &ValidateCommand) -> Result<()> {
    match WorkflowConfig::from_file(&cmd.file) {
        Ok(config) => {
            if cmd.json {
                println!("{}", serde_json::to_string_pretty(&config)?);
                return Ok(());
            }

            println!("{} Workflow file is valid!", CHECK);
            println!("  Name: {}", style(&config.name).bold());
            let triggers: Vec<String> = config.triggers().iter().map(|t| t.event.clone()).collect();
            println!("  Triggers: {}", style(triggers.join(", ")).cyan());
            for (job_id, job) in &config.jobs {
                println!(
                    "  Job {}: {} step(s){}",
                    style(job_id).bold(),
                    style(job.steps.len()).cyan(),
                    job.runs_on_label()
                        .map(|label| format!(" on {}", label))
                        .unwrap_or_default()
                );
            }
            Ok(())
        }
        Err(e) => {
            if cmd.json {
                let data = serde_json::json!({ "valid": false, "error": format!("{:#}", e) });
                println!("{}", serde_json::to_string_pretty(&data)?);
            } else {
                println!("{} Validation failed:", CROSS);
                println!("  {}", style(format!("{:#}", e)).red());
            }
            std::process::exit(1);
        }
    }
}

async fn list_workflows(cmd: &ListCommand, cli: &Cli) -> Result<()> {
    let history = open_history(cli).await?;
    let workflows = history.list_workflows().await?;

    if cmd.json {
        let data = serde_json::json!({ "workflows": workflows });
        println!("{}", serde_json::to_string_pretty(&data)?);
        return Ok(());
    }

    if workflows.is_empty() {
        println!("{} No workflows found in history", INFO);
        return Ok(());
    }

    println!("{} Workflows in history:", INFO);
    for stats in &workflows {
        println!("  {}", format_workflow_stats(stats, cmd.with_counts));
    }

    Ok(())
}

async fn show_history(cmd: &HistoryCommand, cli: &Cli) -> Result<()> {
    let history = open_history(cli).await?;

    if let Some(run_id) = &cmd.run_id {
        let run_id = uuid::Uuid::parse_str(run_id).context("Invalid run ID format")?;
        match history.load_run(run_id).await? {
            Some(summary) if cmd.json => println!("{}", serde_json::to_string_pretty(&summary)?),
            Some(summary) => println!("{}", format_run_details(&summary)),
            None => println!("{} Run not found", WARN),
        }
        return Ok(());
    }

    let runs = history.list_runs(cmd.workflow.as_deref(), cmd.limit).await?;

    if cmd.json {
        let data = serde_json::json!({ "runs": runs });
        println!("{}", serde_json::to_string_pretty(&data)?);
        return Ok(());
    }

    if runs.is_empty() {
        println!("{} No runs found", INFO);
        return Ok(());
    }

    println!("{} Run history (showing latest {}):", INFO, cmd.limit);
    for summary in &runs {
        println!("  {}", format_run_summary(summary));
    }

    Ok(())
}
