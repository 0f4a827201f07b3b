//! jobline - run CI workflow definitions locally
//!
//! A workflow is a set of independent jobs; each job is an ordered list of
//! steps that runs in its own sandbox and stops at the first failing step.

pub mod actions;
pub mod cli;
pub mod core;
pub mod execution;
pub mod persistence;
pub mod process;

// Re-export commonly used types
pub use actions::{Action, ActionError, ActionRegistry};
pub use core::config::WorkflowConfig;
pub use core::{EventKind, ExecutionStatus, FailureKind, Job, JobContext, Step, StepState, TriggerEvent, Workflow};
pub use execution::{EngineOptions, ExecutionEngine, ExecutionEvent, RunOutcome, SchedulingStrategy};
pub use process::{ProcessRunner, ShellRunner};
