//! Persistence layer for workflow run history

#[cfg(feature = "sqlite")]
pub mod store;

#[cfg(feature = "sqlite")]
pub use store::SqliteHistoryStore;

pub use crate::core::ExecutionStatus;
use crate::core::{FailureKind, StepState, TriggerEvent, Workflow};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Outcome of one job in a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSummary {
    pub job_id: String,
    pub status: ExecutionStatus,
    /// Id of the step that halted the job
    pub failed_step: Option<String>,
    pub failure_kind: Option<FailureKind>,
    pub error: Option<String>,
}

/// Summary of a workflow run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    /// Unique run ID
    pub run_id: Uuid,

    /// Workflow name
    pub workflow_name: String,

    /// Event name, e.g. `push`
    pub event: String,

    /// Branch the event targeted
    pub branch: String,

    /// Aggregate status
    pub status: ExecutionStatus,

    /// When the run started
    pub started_at: DateTime<Utc>,

    /// When the run finished
    pub completed_at: Option<DateTime<Utc>>,

    /// Per-job outcomes, in job id order
    pub jobs: Vec<JobSummary>,
}

impl RunSummary {
    pub fn succeeded_jobs(&self) -> usize {
        self.jobs
            .iter()
            .filter(|j| j.status == ExecutionStatus::Succeeded)
            .count()
    }
}

/// Per-workflow aggregate for `list`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowStats {
    pub name: String,
    pub runs: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Trait for history backends
#[async_trait::async_trait]
pub trait HistoryBackend: Send + Sync {
    /// Save (or replace) a run
    async fn save_run(&self, run: &RunSummary) -> Result<()>;

    /// Load a run by ID
    async fn load_run(&self, run_id: Uuid) -> Result<Option<RunSummary>>;

    /// Most recent runs first, optionally for one workflow
    async fn list_runs(&self, workflow_name: Option<&str>, limit: usize) -> Result<Vec<RunSummary>>;

    /// All workflows that have history, by name
    async fn list_workflows(&self) -> Result<Vec<WorkflowStats>>;
}

/// In-memory history (for tests and `--no-history`)
pub struct InMemoryHistory {
    runs: RwLock<HashMap<Uuid, RunSummary>>,
}

impl InMemoryHistory {
    pub fn new() -> Self {
        Self {
            runs: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryHistory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl HistoryBackend for InMemoryHistory {
    async fn save_run(&self, run: &RunSummary) -> Result<()> {
        self.runs.write().await.insert(run.run_id, run.clone());
        Ok(())
    }

    async fn load_run(&self, run_id: Uuid) -> Result<Option<RunSummary>> {
        Ok(self.runs.read().await.get(&run_id).cloned())
    }

    async fn list_runs(&self, workflow_name: Option<&str>, limit: usize) -> Result<Vec<RunSummary>> {
        let runs = self.runs.read().await;
        let mut result: Vec<RunSummary> = runs
            .values()
            .filter(|r| workflow_name.map_or(true, |name| r.workflow_name == name))
            .cloned()
            .collect();
        result.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        result.truncate(limit);
        Ok(result)
    }

    async fn list_workflows(&self) -> Result<Vec<WorkflowStats>> {
        let runs = self.runs.read().await;
        let mut stats: HashMap<&str, WorkflowStats> = HashMap::new();
        for run in runs.values() {
            let entry = stats
                .entry(run.workflow_name.as_str())
                .or_insert_with(|| WorkflowStats {
                    name: run.workflow_name.clone(),
                    runs: 0,
                    succeeded: 0,
                    failed: 0,
                });
            entry.runs += 1;
            match run.status {
                ExecutionStatus::Succeeded => entry.succeeded += 1,
                ExecutionStatus::Failed => entry.failed += 1,
                _ => {}
            }
        }
        let mut stats: Vec<WorkflowStats> = stats.into_values().collect();
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(stats)
    }
}

/// Create a summary from a finished workflow
pub fn create_summary(workflow: &Workflow, event: &TriggerEvent) -> RunSummary {
    let jobs = workflow
        .jobs
        .values()
        .map(|job| {
            let failed = job.failed_step();
            let (failure_kind, error) = match failed.map(|s| &s.state) {
                Some(StepState::Failed { kind, error, .. }) => (Some(*kind), Some(error.clone())),
                _ => (None, None),
            };
            JobSummary {
                job_id: job.id.clone(),
                status: job.state.status,
                failed_step: failed.map(|s| s.id.clone()),
                failure_kind,
                error,
            }
        })
        .collect();

    RunSummary {
        run_id: workflow.state.run_id,
        workflow_name: workflow.name.clone(),
        event: event.kind.as_str().to_string(),
        branch: event.branch.clone(),
        status: workflow.state.status,
        started_at: workflow.state.started_at.unwrap_or_else(Utc::now),
        completed_at: workflow.state.completed_at,
        jobs,
    }
}
