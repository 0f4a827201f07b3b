//! Workflow domain model

use crate::core::{
    config::WorkflowConfig,
    job::Job,
    state::RunState,
    trigger::{Trigger, TriggerEvent},
};
use std::collections::BTreeMap;

/// A loaded workflow, ready to run
#[derive(Debug, Clone)]
pub struct Workflow {
    /// Workflow name
    pub name: String,

    /// Events that activate the workflow
    pub triggers: Vec<Trigger>,

    /// Workflow-level environment bindings (unrendered)
    pub env: BTreeMap<String, String>,

    /// Jobs keyed by id; iteration order is the launch order
    pub jobs: BTreeMap<String, Job>,

    /// Run state
    pub state: RunState,
}

impl Workflow {
    pub fn from_config(config: &WorkflowConfig) -> Self {
        Workflow {
            name: config.name.clone(),
            triggers: config.triggers(),
            env: config.env_map(),
            jobs: config
                .jobs
                .iter()
                .map(|(id, job)| (id.clone(), Job::from_config(id, job)))
                .collect(),
            state: RunState::new(),
        }
    }

    /// Whether any trigger activates on `event`
    pub fn is_triggered_by(&self, event: &TriggerEvent) -> bool {
        self.triggers.iter().any(|t| t.matches(event))
    }

    /// Keep only the named jobs
    pub fn retain_jobs(&mut self, ids: &[String]) -> anyhow::Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        for id in ids {
            if !self.jobs.contains_key(id) {
                anyhow::bail!(
                    "Unknown job '{}'. Available jobs: {}",
                    id,
                    self.jobs.keys().cloned().collect::<Vec<_>>().join(", ")
                );
            }
        }
        self.jobs.retain(|id, _| ids.contains(id));
        Ok(())
    }

    pub fn job(&self, id: &str) -> Option<&Job> {
        self.jobs.get(id)
    }

    pub fn job_mut(&mut self, id: &str) -> Option<&mut Job> {
        self.jobs.get_mut(id)
    }

    pub fn job_ids(&self) -> Vec<String> {
        self.jobs.keys().cloned().collect()
    }

    pub fn is_complete(&self) -> bool {
        self.jobs.values().all(|j| j.state.status.is_terminal())
    }
}
