//! Step domain model

use crate::core::{
    config::{default_step_id, env_as_strings, minutes, value_as_string, StepConfig},
    state::StepState,
};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// A single step in a job
#[derive(Debug, Clone)]
pub struct Step {
    /// Step identifier, unique within the job
    pub id: String,

    /// Display name
    pub name: String,

    /// What the step does
    pub action: StepAction,

    /// Step-scoped environment bindings (unrendered)
    pub env: BTreeMap<String, String>,

    /// Upper bound for this step
    pub timeout: Option<Duration>,

    /// Runtime state (not serialized)
    pub state: StepState,
}

/// Either a shell command or a reusable action
#[derive(Debug, Clone)]
pub enum StepAction {
    Run {
        script: String,
        shell: Option<String>,
        working_directory: Option<String>,
    },
    Uses {
        action: ActionRef,
        inputs: BTreeMap<String, String>,
    },
}

/// Reference to a reusable action, e.g. `actions/checkout@v2`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionRef {
    pub name: String,
    pub version: Option<String>,
}

impl ActionRef {
    pub fn parse(reference: &str) -> Self {
        let reference = reference.trim();
        match reference.split_once('@') {
            Some((name, version)) => Self {
                name: name.to_string(),
                version: Some(version.to_string()),
            },
            None => Self {
                name: reference.to_string(),
                version: None,
            },
        }
    }
}

impl fmt::Display for ActionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.version {
            Some(version) => write!(f, "{}@{}", self.name, version),
            None => f.write_str(&self.name),
        }
    }
}

impl Step {
    /// Create a step from its config; `index` is the position within the job
    pub fn from_config(config: &StepConfig, index: usize) -> Self {
        let action = match (&config.run, &config.uses) {
            (Some(script), _) => StepAction::Run {
                script: script.clone(),
                shell: config.shell.clone(),
                working_directory: config.working_directory.clone(),
            },
            (None, Some(uses)) => StepAction::Uses {
                action: ActionRef::parse(uses),
                inputs: config
                    .with_inputs
                    .iter()
                    .map(|(k, v)| (k.clone(), value_as_string(v)))
                    .collect(),
            },
            // Rejected by validation; kept total for hand-built configs.
            (None, None) => StepAction::Run {
                script: String::new(),
                shell: config.shell.clone(),
                working_directory: config.working_directory.clone(),
            },
        };

        let name = config
            .name
            .clone()
            .unwrap_or_else(|| default_display_name(&action));

        Step {
            id: config
                .id
                .clone()
                .unwrap_or_else(|| default_step_id(index)),
            name,
            action,
            env: env_as_strings(&config.env),
            timeout: config.timeout_minutes.map(minutes),
            state: StepState::Pending,
        }
    }

    /// Shorthand for a `run` step with no extra settings
    pub fn run(id: &str, script: &str) -> Self {
        Step {
            id: id.to_string(),
            name: id.to_string(),
            action: StepAction::Run {
                script: script.to_string(),
                shell: None,
                working_directory: None,
            },
            env: BTreeMap::new(),
            timeout: None,
            state: StepState::Pending,
        }
    }

    pub fn is_run(&self) -> bool {
        matches!(self.action, StepAction::Run { .. })
    }
}

fn default_display_name(action: &StepAction) -> String {
    match action {
        StepAction::Run { script, .. } => {
            let first_line = script.lines().next().unwrap_or("").trim();
            format!("Run {}", first_line)
        }
        StepAction::Uses { action, .. } => format!("Run {}", action),
    }
}
