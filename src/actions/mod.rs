//! Built-in implementations of reusable `uses:` actions

pub mod checkout;
pub mod coverage;
pub mod fetch_archive;
pub mod setup_runtime;

use crate::core::{ActionRef, FailureKind, JobContext};
use crate::process::{OutputSink, ProcessError, ProcessRunner};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub use checkout::Checkout;
pub use coverage::CoverageUpload;
pub use fetch_archive::FetchArchive;
pub use setup_runtime::SetupRuntime;

#[derive(Debug, Error)]
pub enum ActionError {
    #[error("Unsupported action '{0}'")]
    Unsupported(String),

    #[error("Missing required input '{0}'")]
    MissingInput(String),

    #[error("Invalid value '{value}' for input '{input}'")]
    InvalidInput { input: String, value: String },

    #[error("{0}")]
    Failed(String),

    #[error("`{command}` exited with code {exit_code}")]
    CommandFailed { command: String, exit_code: i32 },

    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("SHA256 mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },
}

impl ActionError {
    /// Exit code of the failing command, when there was one
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            ActionError::CommandFailed { exit_code, .. } => Some(*exit_code),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ActionError::Process(ProcessError::Timeout(_)))
    }
}

/// One invocation of an action
pub struct ActionCall<'a> {
    /// Step id, for logs
    pub step_id: &'a str,
    /// Rendered `with:` inputs
    pub inputs: &'a BTreeMap<String, String>,
    /// Full step environment
    pub env: &'a BTreeMap<String, String>,
    pub runner: &'a dyn ProcessRunner,
    pub sink: Option<&'a dyn OutputSink>,
    pub timeout: Option<Duration>,
}

impl<'a> ActionCall<'a> {
    pub fn input(&self, name: &str) -> Option<&'a str> {
        self.inputs
            .get(name)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    pub fn required_input(&self, name: &str) -> Result<&'a str, ActionError> {
        self.input(name)
            .ok_or_else(|| ActionError::MissingInput(name.to_string()))
    }

    /// Interpret an input as a boolean; absent means `default`
    pub fn bool_input(&self, name: &str, default: bool) -> Result<bool, ActionError> {
        match self.input(name) {
            None => Ok(default),
            Some(v) => match v.to_ascii_lowercase().as_str() {
                "true" | "yes" | "1" => Ok(true),
                "false" | "no" | "0" => Ok(false),
                _ => Err(ActionError::InvalidInput {
                    input: name.to_string(),
                    value: v.to_string(),
                }),
            },
        }
    }

    /// Run a command, failing unless it exits zero
    pub async fn run_checked(
        &self,
        spec: crate::process::ProcessSpec,
    ) -> Result<String, ActionError> {
        let spec = spec.timeout(self.timeout);
        let output = self.runner.run(&spec, self.sink).await?;
        if !output.success() {
            return Err(ActionError::CommandFailed {
                command: spec.display(),
                exit_code: output.exit_code,
            });
        }
        Ok(output.output)
    }
}

/// What an action hands back to the job
#[derive(Debug, Clone, Default)]
pub struct ActionOutput {
    /// Text shown as the step's output
    pub output: String,
    /// Variables for later steps
    pub exported_env: BTreeMap<String, String>,
    /// Directories to put in front of `PATH` for later steps
    pub path_prepends: Vec<PathBuf>,
}

impl ActionOutput {
    pub fn message(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            ..Default::default()
        }
    }
}

/// A reusable step implementation
#[async_trait]
pub trait Action: Send + Sync {
    /// How a failure of this action is classified
    fn failure_kind(&self) -> FailureKind;

    async fn run(&self, ctx: &JobContext, call: ActionCall<'_>) -> Result<ActionOutput, ActionError>;
}

/// Maps `uses:` references to built-in actions
#[derive(Debug, Clone)]
pub struct ActionRegistry {
    client: reqwest::Client,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    pub fn resolve(&self, action: &ActionRef) -> Result<Box<dyn Action>, ActionError> {
        let name = action.name.as_str();
        match name {
            "actions/checkout" => Ok(Box::new(Checkout)),
            "jobline/fetch-archive" => Ok(Box::new(FetchArchive::new(self.client.clone()))),
            "codecov/codecov-action" => Ok(Box::new(CoverageUpload::new(self.client.clone()))),
            _ => match name.strip_prefix("actions/setup-") {
                Some(language) if !language.is_empty() => {
                    Ok(Box::new(SetupRuntime::new(language)))
                }
                _ => Err(ActionError::Unsupported(action.to_string())),
            },
        }
    }
}

impl Default for ActionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
