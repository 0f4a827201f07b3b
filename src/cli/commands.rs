//! CLI command definitions

use crate::core::{EventKind, TriggerEvent};
use crate::execution::{EngineOptions, SchedulingStrategy};
use clap::Args;
use std::path::PathBuf;

/// Run a workflow
#[derive(Debug, Args, Clone)]
pub struct RunCommand {
    /// Path to workflow YAML file
    #[arg(short, long)]
    pub file: String,

    /// Event to simulate
    #[arg(long, value_enum, default_value_t = EventArg::Push)]
    pub event: EventArg,

    /// Branch the event targets (the base branch for pull_request)
    #[arg(long, default_value = "master")]
    pub branch: String,

    /// Revision to check out instead of the branch head
    #[arg(long)]
    pub sha: Option<String>,

    /// Only run these jobs
    #[arg(long = "job")]
    pub jobs: Vec<String>,

    /// Workflow env overrides (key=value)
    #[arg(long, value_parser = parse_key_value)]
    pub env: Vec<(String, String)>,

    /// Scheduling strategy
    #[arg(long, value_enum, default_value_t = SchedulingStrategyArg::Sequential)]
    pub strategy: SchedulingStrategyArg,

    /// Job limit for `parallel-limited`
    #[arg(long, default_value_t = 4)]
    pub max_parallel: usize,

    /// Repository that checkout steps fetch from
    #[arg(long, default_value = ".")]
    pub source: PathBuf,

    /// Directory that holds run sandboxes
    #[arg(long, env = "JOBLINE_WORK_DIR")]
    pub work_dir: Option<PathBuf>,

    /// Leave sandboxes on disk after the run
    #[arg(long)]
    pub keep_workspace: bool,

    /// Run even if no trigger matches the event
    #[arg(long)]
    pub force: bool,

    /// Don't save the run to history
    #[arg(long)]
    pub no_history: bool,
}

impl RunCommand {
    pub fn trigger_event(&self) -> TriggerEvent {
        let event = TriggerEvent::new(self.event.into(), self.branch.clone());
        match &self.sha {
            Some(sha) => event.with_sha(sha.clone()),
            None => event,
        }
    }

    pub fn scheduling(&self) -> SchedulingStrategy {
        match self.strategy {
            SchedulingStrategyArg::Sequential => SchedulingStrategy::Sequential,
            SchedulingStrategyArg::Parallel => SchedulingStrategy::Parallel,
            SchedulingStrategyArg::ParallelLimited => {
                SchedulingStrategy::LimitedParallel(self.max_parallel)
            }
        }
    }

    pub fn engine_options(&self) -> EngineOptions {
        let defaults = EngineOptions::default();
        EngineOptions {
            work_root: self.work_dir.clone().unwrap_or(defaults.work_root),
            source: self.source.clone(),
            keep_workspace: self.keep_workspace,
        }
    }
}

/// Validate a workflow file
#[derive(Debug, Args, Clone)]
pub struct ValidateCommand {
    /// Path to workflow YAML file
    #[arg(short, long)]
    pub file: String,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// List workflows with history
#[derive(Debug, Args, Clone)]
pub struct ListCommand {
    /// Show run counts
    #[arg(long)]
    pub with_counts: bool,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Show run history
#[derive(Debug, Args, Clone)]
pub struct HistoryCommand {
    /// Workflow name to filter by
    #[arg(short, long)]
    pub workflow: Option<String>,

    /// Number of recent runs to show
    #[arg(short, long, default_value_t = 10)]
    pub limit: usize,

    /// Show a single run
    #[arg(long)]
    pub run_id: Option<String>,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Event argument
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum EventArg {
    Push,
    #[clap(name = "pull_request")]
    PullRequest,
    #[clap(name = "workflow_dispatch")]
    WorkflowDispatch,
}

impl From<EventArg> for EventKind {
    fn from(arg: EventArg) -> Self {
        match arg {
            EventArg::Push => EventKind::Push,
            EventArg::PullRequest => EventKind::PullRequest,
            EventArg::WorkflowDispatch => EventKind::WorkflowDispatch,
        }
    }
}

/// Scheduling strategy argument
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum SchedulingStrategyArg {
    Sequential,
    Parallel,
    #[clap(name = "parallel-limited")]
    ParallelLimited,
}

/// Parse key=value pairs
pub fn parse_key_value(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("Invalid key=value pair: {}", s)),
    }
}
