//! Execution state models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Status of a job or of a whole workflow run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    /// Not started yet
    Pending,
    /// Currently running
    Running,
    /// Every step finished with exit status zero
    Succeeded,
    /// At least one step failed
    Failed,
    /// Interrupted before all steps ran
    Cancelled,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "Pending",
            ExecutionStatus::Running => "Running",
            ExecutionStatus::Succeeded => "Succeeded",
            ExecutionStatus::Failed => "Failed",
            ExecutionStatus::Cancelled => "Cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Succeeded | ExecutionStatus::Failed | ExecutionStatus::Cancelled
        )
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(ExecutionStatus::Pending),
            "Running" => Ok(ExecutionStatus::Running),
            "Succeeded" => Ok(ExecutionStatus::Succeeded),
            "Failed" => Ok(ExecutionStatus::Failed),
            "Cancelled" => Ok(ExecutionStatus::Cancelled),
            other => Err(format!("unknown execution status: {}", other)),
        }
    }
}

/// Why a step failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Checkout or runtime setup failed
    Provisioning,
    /// Archive download, extraction or install command failed
    Dependency,
    /// A command exited with a nonzero status
    Execution,
    /// Coverage upload failed
    Reporting,
    /// A declared timeout elapsed
    Timeout,
    /// The runner itself could not execute the step
    Internal,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureKind::Provisioning => "provisioning",
            FailureKind::Dependency => "dependency",
            FailureKind::Execution => "execution",
            FailureKind::Reporting => "reporting",
            FailureKind::Timeout => "timeout",
            FailureKind::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// State of a single step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StepState {
    /// Step has not been reached yet
    Pending,
    /// Step is currently running
    Running {
        started_at: DateTime<Utc>,
    },
    /// Step exited with status zero
    Succeeded {
        output: String,
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
    },
    /// Step failed; the job stops here
    Failed {
        kind: FailureKind,
        error: String,
        exit_code: Option<i32>,
        output: String,
        started_at: DateTime<Utc>,
        failed_at: DateTime<Utc>,
    },
    /// Step never ran because an earlier step failed or the run was cancelled
    Skipped {
        reason: String,
    },
}

impl StepState {
    /// Check if step is in a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StepState::Succeeded { .. } | StepState::Failed { .. } | StepState::Skipped { .. }
        )
    }

    pub fn is_succeeded(&self) -> bool {
        matches!(self, StepState::Succeeded { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, StepState::Failed { .. })
    }

    /// Captured output of a finished step
    pub fn output(&self) -> Option<&str> {
        match self {
            StepState::Succeeded { output, .. } | StepState::Failed { output, .. } => {
                Some(output.as_str())
            }
            _ => None,
        }
    }
}

/// Lifecycle of one job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobState {
    pub status: ExecutionStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl JobState {
    pub fn new() -> Self {
        Self {
            status: ExecutionStatus::Pending,
            started_at: None,
            completed_at: None,
        }
    }

    pub fn start(&mut self) {
        self.status = ExecutionStatus::Running;
        self.started_at = Some(Utc::now());
    }

    pub fn succeed(&mut self) {
        self.finish(ExecutionStatus::Succeeded);
    }

    pub fn fail(&mut self) {
        self.finish(ExecutionStatus::Failed);
    }

    pub fn cancel(&mut self) {
        self.finish(ExecutionStatus::Cancelled);
    }

    fn finish(&mut self, status: ExecutionStatus) {
        self.status = status;
        self.completed_at = Some(Utc::now());
    }
}

impl Default for JobState {
    fn default() -> Self {
        Self::new()
    }
}

/// Overall state of a workflow run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunState {
    /// Unique run ID
    pub run_id: Uuid,

    /// Current run status
    pub status: ExecutionStatus,

    /// When the run started
    pub started_at: Option<DateTime<Utc>>,

    /// When the run finished
    pub completed_at: Option<DateTime<Utc>>,

    /// Total number of jobs
    pub total_jobs: usize,

    /// Number of jobs that succeeded
    pub succeeded_jobs: usize,

    /// Number of jobs that failed
    pub failed_jobs: usize,

    /// Number of jobs that were cancelled
    pub cancelled_jobs: usize,
}

impl RunState {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            status: ExecutionStatus::Pending,
            started_at: None,
            completed_at: None,
            total_jobs: 0,
            succeeded_jobs: 0,
            failed_jobs: 0,
            cancelled_jobs: 0,
        }
    }

    /// Mark the run as started
    pub fn start(&mut self, total_jobs: usize) {
        self.status = ExecutionStatus::Running;
        self.started_at = Some(Utc::now());
        self.total_jobs = total_jobs;
    }

    /// Close the run from the final job statuses.
    ///
    /// Any failed job fails the run; otherwise any cancelled job cancels it.
    pub fn finish<'a>(&mut self, job_statuses: impl IntoIterator<Item = &'a ExecutionStatus>) {
        let (mut succeeded, mut failed, mut cancelled) = (0, 0, 0);
        for status in job_statuses {
            match status {
                ExecutionStatus::Succeeded => succeeded += 1,
                ExecutionStatus::Failed => failed += 1,
                ExecutionStatus::Cancelled => cancelled += 1,
                _ => {}
            }
        }
        self.succeeded_jobs = succeeded;
        self.failed_jobs = failed;
        self.cancelled_jobs = cancelled;

        self.status = if failed > 0 {
            ExecutionStatus::Failed
        } else if cancelled > 0 || succeeded < self.total_jobs {
            ExecutionStatus::Cancelled
        } else {
            ExecutionStatus::Succeeded
        };
        self.completed_at = Some(Utc::now());
    }

    /// Fraction of jobs that reached a terminal state (0.0 to 1.0)
    pub fn progress(&self) -> f64 {
        if self.total_jobs == 0 {
            return 0.0;
        }
        (self.succeeded_jobs + self.failed_jobs + self.cancelled_jobs) as f64
            / self.total_jobs as f64
    }
}

impl Default for RunState {
    fn default() -> Self {
        Self::new()
    }
}
