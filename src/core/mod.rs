//! Core domain models
//!
//! Workflows, jobs, steps and triggers, plus the runtime state and the
//! environment context a job runs in.

pub mod config;
pub mod context;
pub mod job;
pub mod state;
pub mod step;
pub mod trigger;
pub mod workflow;

pub use context::*;
pub use job::*;
pub use state::*;
pub use step::*;
pub use trigger::*;
pub use workflow::*;
