//! Main execution engine - orchestrates a workflow run

use crate::{
    actions::ActionRegistry,
    core::{ExecutionStatus, FailureKind, Job, StepState, TriggerEvent, Workflow},
    execution::{
        workspace::Sandbox, JobScheduler, SchedulingStrategy, StepExecutor, StepOutcome,
    },
    process::{OutputStream, ProcessRunner},
};
use chrono::Utc;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Events that can occur during a workflow run
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    WorkflowStarted {
        run_id: Uuid,
        workflow_name: String,
        event: TriggerEvent,
        job_count: usize,
    },
    WorkflowSkipped {
        workflow_name: String,
        event: TriggerEvent,
    },
    JobStarted {
        job_id: String,
        step_count: usize,
    },
    StepStarted {
        job_id: String,
        step_id: String,
        step_name: String,
        index: usize,
    },
    StepOutputLine {
        job_id: String,
        step_id: String,
        stream: OutputStream,
        line: String,
    },
    StepSucceeded {
        job_id: String,
        step_id: String,
        output: String,
    },
    StepFailed {
        job_id: String,
        step_id: String,
        kind: FailureKind,
        error: String,
        exit_code: Option<i32>,
        output: String,
    },
    StepSkipped {
        job_id: String,
        step_id: String,
        reason: String,
    },
    JobCompleted {
        job_id: String,
        status: ExecutionStatus,
    },
    WorkflowCompleted {
        run_id: Uuid,
        status: ExecutionStatus,
    },
}

/// Type for event handlers
pub type EventHandler = Arc<dyn Fn(ExecutionEvent) + Send + Sync>;

/// Handler list shared by the engine and its job tasks
#[derive(Clone, Default)]
struct EventBus {
    handlers: Arc<Mutex<Vec<EventHandler>>>,
}

impl EventBus {
    fn add(&self, handler: EventHandler) {
        match self.handlers.lock() {
            Ok(mut handlers) => handlers.push(handler),
            Err(poisoned) => poisoned.into_inner().push(handler),
        }
    }

    fn emit(&self, event: ExecutionEvent) {
        let handlers = match self.handlers.lock() {
            Ok(handlers) => handlers.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        for handler in handlers.iter() {
            handler(event.clone());
        }
    }
}

/// Settings that do not come from the workflow file
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Parent directory of all run sandboxes
    pub work_root: PathBuf,
    /// Repository that `actions/checkout` fetches from
    pub source: PathBuf,
    /// Leave sandboxes on disk after the run
    pub keep_workspace: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            work_root: std::env::temp_dir().join("jobline"),
            source: PathBuf::from("."),
            keep_workspace: false,
        }
    }
}

/// What happened to a workflow presented with an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// No trigger matched; nothing ran
    NotTriggered,
    Completed(ExecutionStatus),
}

/// Everything a job task needs, cheap to clone into `tokio::spawn`
struct JobRunner<R> {
    executor: Arc<StepExecutor<R>>,
    events: EventBus,
    cancelled: Arc<AtomicBool>,
    options: Arc<EngineOptions>,
}

impl<R> Clone for JobRunner<R> {
    fn clone(&self) -> Self {
        Self {
            executor: self.executor.clone(),
            events: self.events.clone(),
            cancelled: self.cancelled.clone(),
            options: self.options.clone(),
        }
    }
}

/// Main workflow execution engine
pub struct ExecutionEngine<R> {
    strategy: SchedulingStrategy,
    jobs: JobRunner<R>,
}

impl<R: ProcessRunner + 'static> ExecutionEngine<R> {
    pub fn new(runner: R, strategy: SchedulingStrategy, options: EngineOptions) -> Self {
        Self::with_actions(runner, strategy, options, ActionRegistry::new())
    }

    pub fn with_actions(
        runner: R,
        strategy: SchedulingStrategy,
        options: EngineOptions,
        actions: ActionRegistry,
    ) -> Self {
        Self {
            strategy,
            jobs: JobRunner {
                executor: Arc::new(StepExecutor::new(Arc::new(runner), actions)),
                events: EventBus::default(),
                cancelled: Arc::new(AtomicBool::new(false)),
                options: Arc::new(options),
            },
        }
    }

    /// Add an event handler
    pub fn add_event_handler<F>(&self, handler: F)
    where
        F: Fn(ExecutionEvent) + Send + Sync + 'static,
    {
        self.jobs.events.add(Arc::new(handler));
    }

    /// Flag that stops the run before the next step of every job
    pub fn cancellation_flag(&self) -> Arc<AtomicBool> {
        self.jobs.cancelled.clone()
    }

    pub fn cancel(&self) {
        self.jobs.cancelled.store(true, Ordering::SeqCst);
    }

    /// Run the workflow if `event` activates it
    pub async fn execute(&self, workflow: &mut Workflow, event: &TriggerEvent) -> RunOutcome {
        if !workflow.is_triggered_by(event) {
            info!(
                "Workflow '{}' is not triggered by {} on '{}'",
                workflow.name, event.kind, event.branch
            );
            self.jobs.events.emit(ExecutionEvent::WorkflowSkipped {
                workflow_name: workflow.name.clone(),
                event: event.clone(),
            });
            return RunOutcome::NotTriggered;
        }
        RunOutcome::Completed(self.run(workflow, event).await)
    }

    /// Run every job of the workflow regardless of its triggers
    pub async fn run(&self, workflow: &mut Workflow, event: &TriggerEvent) -> ExecutionStatus {
        let run_id = workflow.state.run_id;
        info!("Starting workflow run: {} ({})", workflow.name, run_id);

        workflow.state.start(workflow.jobs.len());
        self.jobs.events.emit(ExecutionEvent::WorkflowStarted {
            run_id,
            workflow_name: workflow.name.clone(),
            event: event.clone(),
            job_count: workflow.jobs.len(),
        });

        let workflow_env = Arc::new(workflow.env.clone());
        let mut scheduler = JobScheduler::new(self.strategy, workflow.job_ids());
        let mut tasks: JoinSet<Job> = JoinSet::new();

        loop {
            if self.jobs.cancelled.load(Ordering::SeqCst) {
                for job_id in scheduler.drain() {
                    if let Some(job) = workflow.job_mut(&job_id) {
                        self.jobs.cancel_unstarted(job);
                    }
                }
            }

            for job_id in scheduler.next_batch(tasks.len()) {
                let Some(job) = workflow.job(&job_id).cloned() else {
                    continue;
                };
                let runner = self.jobs.clone();
                let env = workflow_env.clone();
                let event = event.clone();
                tasks.spawn(async move { runner.run_job(job, &env, event, run_id).await });
            }

            match tasks.join_next().await {
                Some(Ok(job)) => {
                    let id = job.id.clone();
                    workflow.jobs.insert(id, job);
                }
                Some(Err(e)) => error!("Job task failed: {}", e),
                None if !scheduler.has_more() => break,
                None => {}
            }
        }

        // A job whose task died never reported back.
        for job in workflow.jobs.values_mut() {
            if !job.state.status.is_terminal() {
                warn!("Job '{}' did not finish; marking it failed", job.id);
                job.skip_remaining(0, "job task aborted");
                job.state.fail();
            }
        }

        let statuses: Vec<ExecutionStatus> =
            workflow.jobs.values().map(|j| j.state.status).collect();
        workflow.state.finish(&statuses);
        let status = workflow.state.status;

        info!("Workflow run finished: {} - {}", workflow.name, status);
        self.jobs
            .events
            .emit(ExecutionEvent::WorkflowCompleted { run_id, status });
        status
    }
}

impl<R: ProcessRunner + 'static> JobRunner<R> {
    fn skip_from(&self, job: &mut Job, from: usize, reason: &str) {
        for index in job.skip_remaining(from, reason) {
            self.events.emit(ExecutionEvent::StepSkipped {
                job_id: job.id.clone(),
                step_id: job.steps[index].id.clone(),
                reason: reason.to_string(),
            });
        }
    }

    fn cancel_unstarted(&self, job: &mut Job) {
        self.skip_from(job, 0, "run cancelled");
        job.state.cancel();
        self.events.emit(ExecutionEvent::JobCompleted {
            job_id: job.id.clone(),
            status: ExecutionStatus::Cancelled,
        });
    }

    fn fail_step(
        &self,
        job: &mut Job,
        index: usize,
        kind: FailureKind,
        error: String,
        exit_code: Option<i32>,
        output: String,
    ) {
        let started_at = match &job.steps[index].state {
            StepState::Running { started_at } => *started_at,
            _ => Utc::now(),
        };
        warn!("Step {}/{} failed ({}): {}", job.id, job.steps[index].id, kind, error);
        job.steps[index].state = StepState::Failed {
            kind,
            error: error.clone(),
            exit_code,
            output: output.clone(),
            started_at,
            failed_at: Utc::now(),
        };
        self.events.emit(ExecutionEvent::StepFailed {
            job_id: job.id.clone(),
            step_id: job.steps[index].id.clone(),
            kind,
            error,
            exit_code,
            output,
        });
        self.skip_from(job, index + 1, "an earlier step failed");
    }

    /// Run one job's steps in order, stopping at the first failure
    async fn run_job(
        &self,
        mut job: Job,
        workflow_env: &BTreeMap<String, String>,
        event: TriggerEvent,
        run_id: Uuid,
    ) -> Job {
        info!("Starting job: {}", job.id);
        job.state.start();
        self.events.emit(ExecutionEvent::JobStarted {
            job_id: job.id.clone(),
            step_count: job.steps.len(),
        });

        let sandbox = match Sandbox::create(
            &self.options.work_root,
            run_id,
            &job.id,
            self.options.keep_workspace,
        ) {
            Ok(sandbox) => sandbox,
            Err(e) => {
                error!("Cannot create sandbox for job {}: {}", job.id, e);
                if !job.steps.is_empty() {
                    self.fail_step(
                        &mut job,
                        0,
                        FailureKind::Provisioning,
                        format!("Cannot create sandbox: {}", e),
                        None,
                        String::new(),
                    );
                }
                job.state.fail();
                self.finish_job(&job);
                return job;
            }
        };

        let mut ctx = crate::core::JobContext::new(
            &job.id,
            workflow_env,
            &job.env,
            event,
            sandbox.workspace.clone(),
            sandbox.temp.clone(),
            self.options.source.clone(),
        );
        // A deadline past what the clock can represent is no deadline.
        let deadline = job.timeout.and_then(|limit| Instant::now().checked_add(limit));
        let mut failed = false;
        let mut cancelled = false;

        for index in 0..job.steps.len() {
            if self.cancelled.load(Ordering::SeqCst) {
                info!("Job {} cancelled before step {}", job.id, job.steps[index].id);
                self.skip_from(&mut job, index, "run cancelled");
                cancelled = true;
                break;
            }

            let remaining = deadline.map(|d| d.saturating_duration_since(Instant::now()));
            if remaining == Some(Duration::ZERO) {
                job.steps[index].state = StepState::Running {
                    started_at: Utc::now(),
                };
                self.fail_step(
                    &mut job,
                    index,
                    FailureKind::Timeout,
                    "Job timeout exceeded".to_string(),
                    None,
                    String::new(),
                );
                failed = true;
                break;
            }
            let step = job.steps[index].clone();
            let timeout = match (step.timeout, remaining) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            };

            job.steps[index].state = StepState::Running {
                started_at: Utc::now(),
            };
            self.events.emit(ExecutionEvent::StepStarted {
                job_id: job.id.clone(),
                step_id: step.id.clone(),
                step_name: step.name.clone(),
                index,
            });

            let events = self.events.clone();
            let (job_id, step_id) = (job.id.clone(), step.id.clone());
            let sink = move |stream: OutputStream, line: &str| {
                events.emit(ExecutionEvent::StepOutputLine {
                    job_id: job_id.clone(),
                    step_id: step_id.clone(),
                    stream,
                    line: line.to_string(),
                });
            };

            let outcome = self
                .executor
                .execute(&step, index, &mut ctx, timeout, Some(&sink))
                .await;

            match outcome {
                StepOutcome::Succeeded { output } => {
                    let started_at = match &job.steps[index].state {
                        StepState::Running { started_at } => *started_at,
                        _ => Utc::now(),
                    };
                    job.steps[index].state = StepState::Succeeded {
                        output: output.clone(),
                        started_at,
                        completed_at: Utc::now(),
                    };
                    self.events.emit(ExecutionEvent::StepSucceeded {
                        job_id: job.id.clone(),
                        step_id: step.id.clone(),
                        output,
                    });
                }
                StepOutcome::Failed {
                    kind,
                    error,
                    exit_code,
                    output,
                } => {
                    self.fail_step(&mut job, index, kind, error, exit_code, output);
                    failed = true;
                    break;
                }
            }
        }

        if failed && !self.cancelled.load(Ordering::SeqCst) {
            job.state.fail();
        } else if failed || cancelled {
            job.state.cancel();
        } else {
            job.state.succeed();
        }

        if let Err(e) = sandbox.cleanup() {
            warn!("Failed to remove sandbox {}: {}", sandbox.root.display(), e);
        }

        self.finish_job(&job);
        job
    }

    fn finish_job(&self, job: &Job) {
        info!("Job {} finished: {}", job.id, job.state.status);
        self.events.emit(ExecutionEvent::JobCompleted {
            job_id: job.id.clone(),
            status: job.state.status,
        });
    }
}
