//! Workflow execution engine

pub mod engine;
pub mod executor;
pub mod scheduler;
pub mod workspace;

pub use engine::{EngineOptions, EventHandler, ExecutionEngine, ExecutionEvent, RunOutcome};
pub use executor::{StepExecutor, StepOutcome};
pub use scheduler::{JobScheduler, SchedulingStrategy};
pub use workspace::Sandbox;
