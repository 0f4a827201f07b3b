//! Job domain model

use crate::core::{
    config::{env_as_strings, minutes, JobConfig},
    state::{JobState, StepState},
    step::Step,
};
use std::collections::BTreeMap;
use std::time::Duration;

/// An ordered list of steps run in one sandbox
#[derive(Debug, Clone)]
pub struct Job {
    /// Job identifier (key under `jobs:`)
    pub id: String,

    /// Display name, defaults to the id
    pub name: String,

    /// `runs-on` label; recorded but not used to pick a host
    pub runs_on: Option<String>,

    /// Job-scoped environment bindings (unrendered)
    pub env: BTreeMap<String, String>,

    /// Upper bound for the whole job
    pub timeout: Option<Duration>,

    /// Steps in declaration order
    pub steps: Vec<Step>,

    /// Execution state
    pub state: JobState,
}

impl Job {
    pub fn from_config(id: &str, config: &JobConfig) -> Self {
        Job {
            id: id.to_string(),
            name: config.name.clone().unwrap_or_else(|| id.to_string()),
            runs_on: config.runs_on_label(),
            env: env_as_strings(&config.env),
            timeout: config.timeout_minutes.map(minutes),
            steps: config
                .steps
                .iter()
                .enumerate()
                .map(|(index, step)| Step::from_config(step, index))
                .collect(),
            state: JobState::new(),
        }
    }

    /// Job with the given steps and nothing else set
    pub fn with_steps(id: &str, steps: Vec<Step>) -> Self {
        Job {
            id: id.to_string(),
            name: id.to_string(),
            runs_on: None,
            env: BTreeMap::new(),
            timeout: None,
            steps,
            state: JobState::new(),
        }
    }

    pub fn step(&self, id: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.id == id)
    }

    pub fn step_mut(&mut self, id: &str) -> Option<&mut Step> {
        self.steps.iter_mut().find(|s| s.id == id)
    }

    /// Mark every step from `from` onwards as skipped; returns their indices
    pub fn skip_remaining(&mut self, from: usize, reason: &str) -> Vec<usize> {
        let mut skipped = Vec::new();
        for (index, step) in self.steps.iter_mut().enumerate().skip(from) {
            if matches!(step.state, StepState::Pending) {
                step.state = StepState::Skipped {
                    reason: reason.to_string(),
                };
                skipped.push(index);
            }
        }
        skipped
    }

    /// First failed step, if any
    pub fn failed_step(&self) -> Option<&Step> {
        self.steps.iter().find(|s| s.state.is_failed())
    }

    pub fn is_complete(&self) -> bool {
        self.steps.iter().all(|s| s.state.is_terminal())
    }
}
