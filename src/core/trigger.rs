//! Trigger events and branch filters

use globset::{GlobBuilder, GlobMatcher};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of event that can activate a workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Push,
    PullRequest,
    WorkflowDispatch,
}

impl EventKind {
    /// Name used under `on:` in workflow files
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Push => "push",
            EventKind::PullRequest => "pull_request",
            EventKind::WorkflowDispatch => "workflow_dispatch",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A concrete event presented to the runner.
///
/// For `pull_request`, `branch` is the branch the pull request targets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerEvent {
    pub kind: EventKind,
    pub branch: String,
    /// Revision to check out, if known
    pub sha: Option<String>,
}

impl TriggerEvent {
    pub fn new(kind: EventKind, branch: impl Into<String>) -> Self {
        Self {
            kind,
            branch: branch.into(),
            sha: None,
        }
    }

    pub fn with_sha(mut self, sha: impl Into<String>) -> Self {
        self.sha = Some(sha.into());
        self
    }

    /// Fully qualified ref, e.g. `refs/heads/master`
    pub fn git_ref(&self) -> String {
        format!("refs/heads/{}", self.branch)
    }
}

/// One entry under `on:`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trigger {
    pub event: String,
    pub branches: Vec<String>,
    pub branches_ignore: Vec<String>,
}

/// Compiled branch filter
pub struct CompiledTrigger {
    event: String,
    branches: Vec<GlobMatcher>,
    branches_ignore: Vec<GlobMatcher>,
}

impl Trigger {
    /// Trigger for an event with no branch filter
    pub fn any_branch(event: &str) -> Self {
        Self {
            event: event.to_string(),
            branches: Vec::new(),
            branches_ignore: Vec::new(),
        }
    }

    /// Compile branch patterns.
    ///
    /// `*` does not cross `/`; `**` does.
    pub fn compile(&self) -> Result<CompiledTrigger, globset::Error> {
        let compile_all = |patterns: &[String]| -> Result<Vec<GlobMatcher>, globset::Error> {
            patterns
                .iter()
                .map(|p| {
                    GlobBuilder::new(p)
                        .literal_separator(true)
                        .build()
                        .map(|g| g.compile_matcher())
                })
                .collect()
        };

        Ok(CompiledTrigger {
            event: self.event.clone(),
            branches: compile_all(&self.branches)?,
            branches_ignore: compile_all(&self.branches_ignore)?,
        })
    }

    /// Check whether this trigger activates on the given event
    pub fn matches(&self, event: &TriggerEvent) -> bool {
        match self.compile() {
            Ok(compiled) => compiled.matches(event),
            Err(e) => {
                tracing::warn!("Ignoring trigger '{}' with invalid branch filter: {}", self.event, e);
                false
            }
        }
    }
}

impl CompiledTrigger {
    pub fn matches(&self, event: &TriggerEvent) -> bool {
        if self.event != event.kind.as_str() {
            return false;
        }
        if self.branches_ignore.iter().any(|m| m.is_match(&event.branch)) {
            return false;
        }
        self.branches.is_empty() || self.branches.iter().any(|m| m.is_match(&event.branch))
    }
}
