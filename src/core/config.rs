//! Workflow configuration from YAML

use crate::core::{trigger::Trigger, Workflow};
use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;

/// Top-level workflow definition loaded from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// Workflow name
    #[serde(default = "default_workflow_name")]
    pub name: String,

    /// Events that activate the workflow
    #[serde(rename = "on", default)]
    pub on: OnConfig,

    /// Environment bindings visible to every job
    #[serde(default)]
    pub env: BTreeMap<String, Value>,

    /// Jobs keyed by job id
    pub jobs: BTreeMap<String, JobConfig>,
}

fn default_workflow_name() -> String {
    "workflow".to_string()
}

/// The `on:` section, in any of its three YAML shapes
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OnConfig {
    /// `on: push`
    Single(String),
    /// `on: [push, pull_request]`
    List(Vec<String>),
    /// `on: { push: { branches: [master] } }`
    Map(BTreeMap<String, Option<EventFilterConfig>>),
}

impl Default for OnConfig {
    fn default() -> Self {
        OnConfig::List(Vec::new())
    }
}

/// Branch filter for one event type
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventFilterConfig {
    #[serde(default)]
    pub branches: Vec<String>,

    #[serde(default, rename = "branches-ignore")]
    pub branches_ignore: Vec<String>,
}

/// Job configuration as defined in YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    /// Human-readable job name
    #[serde(default)]
    pub name: Option<String>,

    /// Execution environment label, informational only
    #[serde(default, rename = "runs-on")]
    pub runs_on: Option<Value>,

    /// Job-scoped environment bindings
    #[serde(default)]
    pub env: BTreeMap<String, Value>,

    /// Upper bound for the whole job
    #[serde(default, rename = "timeout-minutes")]
    pub timeout_minutes: Option<u64>,

    /// Ordered steps
    #[serde(default)]
    pub steps: Vec<StepConfig>,
}

/// Step configuration as defined in YAML
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StepConfig {
    /// Step identifier, unique within the job
    #[serde(default)]
    pub id: Option<String>,

    /// Human-readable step name
    #[serde(default)]
    pub name: Option<String>,

    /// Shell command to run
    #[serde(default)]
    pub run: Option<String>,

    /// Reusable action reference, e.g. `actions/checkout@v2`
    #[serde(default)]
    pub uses: Option<String>,

    /// Inputs for the action
    #[serde(default, rename = "with")]
    pub with_inputs: BTreeMap<String, Value>,

    /// Step-scoped environment bindings
    #[serde(default)]
    pub env: BTreeMap<String, Value>,

    /// Shell used for `run`
    #[serde(default)]
    pub shell: Option<String>,

    /// Working directory for `run`, relative to the workspace
    #[serde(default, rename = "working-directory")]
    pub working_directory: Option<String>,

    /// Upper bound for this step
    #[serde(default, rename = "timeout-minutes")]
    pub timeout_minutes: Option<u64>,
}

impl WorkflowConfig {
    /// Load workflow configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read workflow file {}", path.display()))?;
        Self::from_yaml(&content)
    }

    /// Parse workflow configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: WorkflowConfig =
            serde_yaml::from_str(yaml).context("Invalid workflow YAML")?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the workflow configuration
    pub fn validate(&self) -> Result<()> {
        if self.jobs.is_empty() {
            anyhow::bail!("Workflow '{}' defines no jobs", self.name);
        }

        validate_env_keys(&self.env, "workflow")?;

        for trigger in self.triggers() {
            trigger
                .compile()
                .with_context(|| format!("Invalid branch filter for '{}'", trigger.event))?;
        }

        for (job_id, job) in &self.jobs {
            if !job_id_regex().is_match(job_id) {
                anyhow::bail!(
                    "Job id '{}' must start with a letter or '_' and contain only alphanumerics, '-' or '_'",
                    job_id
                );
            }
            if job.steps.is_empty() {
                anyhow::bail!("Job '{}' has no steps", job_id);
            }
            validate_env_keys(&job.env, &format!("job '{}'", job_id))?;

            let mut seen_ids = HashSet::new();
            for (index, step) in job.steps.iter().enumerate() {
                let label = step
                    .id
                    .clone()
                    .or_else(|| step.name.clone())
                    .unwrap_or_else(|| format!("#{}", index + 1));

                match (&step.run, &step.uses) {
                    (Some(_), Some(_)) => anyhow::bail!(
                        "Step '{}' in job '{}' has both 'run' and 'uses'",
                        label,
                        job_id
                    ),
                    (None, None) => anyhow::bail!(
                        "Step '{}' in job '{}' needs either 'run' or 'uses'",
                        label,
                        job_id
                    ),
                    (None, Some(uses)) if uses.trim().is_empty() => anyhow::bail!(
                        "Step '{}' in job '{}' has an empty 'uses' reference",
                        label,
                        job_id
                    ),
                    _ => {}
                }

                // Unnamed steps take `step-N`, which an explicit id may also claim.
                let effective_id = step
                    .id
                    .clone()
                    .unwrap_or_else(|| default_step_id(index));
                if !seen_ids.insert(effective_id.clone()) {
                    anyhow::bail!("Duplicate step id '{}' in job '{}'", effective_id, job_id);
                }

                validate_env_keys(&step.env, &format!("step '{}' of job '{}'", label, job_id))?;
            }
        }

        Ok(())
    }

    /// Trigger filters declared under `on:`
    pub fn triggers(&self) -> Vec<Trigger> {
        match &self.on {
            OnConfig::Single(event) => vec![Trigger::any_branch(event)],
            OnConfig::List(events) => events.iter().map(|e| Trigger::any_branch(e)).collect(),
            OnConfig::Map(map) => map
                .iter()
                .map(|(event, filter)| {
                    let filter = filter.clone().unwrap_or_default();
                    Trigger {
                        event: event.clone(),
                        branches: filter.branches,
                        branches_ignore: filter.branches_ignore,
                    }
                })
                .collect(),
        }
    }

    /// Workflow-level env bindings rendered as strings
    pub fn env_map(&self) -> BTreeMap<String, String> {
        env_as_strings(&self.env)
    }

    /// Convert config to a Workflow domain model
    pub fn to_workflow(&self) -> Workflow {
        Workflow::from_config(self)
    }
}

impl JobConfig {
    /// `runs-on` as a display label
    pub fn runs_on_label(&self) -> Option<String> {
        self.runs_on.as_ref().map(|value| match value {
            Value::Sequence(labels) => labels
                .iter()
                .map(value_as_string)
                .collect::<Vec<_>>()
                .join(", "),
            other => value_as_string(other),
        })
    }
}

/// Render a YAML scalar the way a shell would see it.
///
/// `null` (a key with no value) becomes the empty string.
pub fn value_as_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim_end().to_string())
            .unwrap_or_default(),
    }
}

/// Id of a step declared without one, from its position in the job
pub(crate) fn default_step_id(index: usize) -> String {
    format!("step-{}", index + 1)
}

/// `timeout-minutes` as a duration; absurd values saturate instead of overflowing
pub(crate) fn minutes(m: u64) -> Duration {
    Duration::from_secs(m.saturating_mul(60))
}

pub fn env_as_strings(env: &BTreeMap<String, Value>) -> BTreeMap<String, String> {
    env.iter()
        .map(|(k, v)| (k.clone(), value_as_string(v)))
        .collect()
}

pub(crate) fn env_key_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid env key regex"))
}

fn job_id_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_-]*$").expect("valid job id regex"))
}

fn validate_env_keys(env: &BTreeMap<String, Value>, scope: &str) -> Result<()> {
    for key in env.keys() {
        if !env_key_regex().is_match(key) {
            anyhow::bail!("Invalid environment variable name '{}' in {}", key, scope);
        }
    }
    Ok(())
}
