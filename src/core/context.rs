//! Job context - environment layering and expression rendering

use crate::core::trigger::TriggerEvent;
use regex::{Captures, Regex};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{debug, warn};

/// Runtime context for one job.
///
/// Holds the sandbox paths, the event and the environment layers. A step's
/// environment is built from, lowest precedence first: built-in variables,
/// workflow env, job env, values exported by earlier steps, step env.
#[derive(Debug, Clone)]
pub struct JobContext {
    /// Job identifier
    pub job_id: String,

    /// Default working directory of every step
    pub workspace: PathBuf,

    /// Scratch directory for scripts and env files
    pub temp_dir: PathBuf,

    /// Source repository that `actions/checkout` materializes
    pub source: PathBuf,

    /// The event that started the run
    pub event: TriggerEvent,

    /// Built-ins plus rendered workflow and job env
    base_env: BTreeMap<String, String>,

    /// Values exported by earlier steps through `GITHUB_ENV` or actions
    exported_env: BTreeMap<String, String>,

    /// Directories prepended to `PATH`, most recent last
    path_prepends: Vec<PathBuf>,
}

impl JobContext {
    pub fn new(
        job_id: &str,
        workflow_env: &BTreeMap<String, String>,
        job_env: &BTreeMap<String, String>,
        event: TriggerEvent,
        workspace: PathBuf,
        temp_dir: PathBuf,
        source: PathBuf,
    ) -> Self {
        let mut ctx = Self {
            job_id: job_id.to_string(),
            workspace,
            temp_dir,
            source,
            event,
            base_env: BTreeMap::new(),
            exported_env: BTreeMap::new(),
            path_prepends: Vec::new(),
        };

        let mut env = ctx.builtin_env();
        for layer in [workflow_env, job_env] {
            let rendered: Vec<(String, String)> = layer
                .iter()
                .map(|(k, v)| (k.clone(), ctx.render(v, &env)))
                .collect();
            env.extend(rendered);
        }
        ctx.base_env = env;
        ctx
    }

    /// Variables every step sees regardless of configuration
    pub fn builtin_env(&self) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();
        env.insert("CI".to_string(), "true".to_string());
        env.insert("GITHUB_ACTIONS".to_string(), "true".to_string());
        env.insert(
            "GITHUB_WORKSPACE".to_string(),
            self.workspace.display().to_string(),
        );
        env.insert(
            "GITHUB_EVENT_NAME".to_string(),
            self.event.kind.as_str().to_string(),
        );
        env.insert("GITHUB_REF".to_string(), self.event.git_ref());
        env.insert("GITHUB_REF_NAME".to_string(), self.event.branch.clone());
        if let Some(sha) = &self.event.sha {
            env.insert("GITHUB_SHA".to_string(), sha.clone());
        }
        env.insert(
            "RUNNER_TEMP".to_string(),
            self.temp_dir.display().to_string(),
        );
        env.insert("JOBLINE_JOB_ID".to_string(), self.job_id.clone());
        env
    }

    /// Job-level environment without step bindings
    pub fn job_env(&self) -> BTreeMap<String, String> {
        let mut env = self.base_env.clone();
        env.extend(self.exported_env.clone());
        env
    }

    /// Full environment for a step with the given bindings
    pub fn step_env(&self, step_env: &BTreeMap<String, String>) -> BTreeMap<String, String> {
        let mut env = self.job_env();
        let rendered: Vec<(String, String)> = step_env
            .iter()
            .map(|(k, v)| (k.clone(), self.render(v, &env)))
            .collect();
        env.extend(rendered);

        if !self.path_prepends.is_empty() {
            let current = env
                .get("PATH")
                .cloned()
                .or_else(|| std::env::var("PATH").ok())
                .unwrap_or_default();
            let dirs = self
                .path_prepends
                .iter()
                .rev()
                .cloned()
                .chain(std::env::split_paths(&current));
            match std::env::join_paths(dirs) {
                Ok(joined) => {
                    env.insert("PATH".to_string(), joined.to_string_lossy().into_owned());
                }
                Err(e) => warn!("Could not extend PATH for job '{}': {}", self.job_id, e),
            }
        }

        env
    }

    /// Substitute `${{ path }}` expressions
    pub fn render(&self, template: &str, env: &BTreeMap<String, String>) -> String {
        if !template.contains("${{") {
            return template.to_string();
        }
        expression_regex()
            .replace_all(template, |caps: &Captures| {
                let path = &caps[1];
                self.lookup(path, env).unwrap_or_else(|| {
                    warn!("Unknown expression '{}' in job '{}', using empty string", path, self.job_id);
                    String::new()
                })
            })
            .into_owned()
    }

    /// Resolve one expression path
    pub fn lookup(&self, path: &str, env: &BTreeMap<String, String>) -> Option<String> {
        if let Some(name) = path.strip_prefix("env.") {
            return env.get(name).cloned();
        }
        match path {
            "github.workspace" => Some(self.workspace.display().to_string()),
            "github.event_name" => Some(self.event.kind.as_str().to_string()),
            "github.ref" => Some(self.event.git_ref()),
            "github.ref_name" => Some(self.event.branch.clone()),
            "github.sha" => Some(self.event.sha.clone().unwrap_or_default()),
            "github.job" | "job.id" => Some(self.job_id.clone()),
            "runner.os" => Some(runner_os().to_string()),
            "runner.temp" => Some(self.temp_dir.display().to_string()),
            _ => None,
        }
    }

    /// Make a variable visible to later steps
    pub fn export_env(&mut self, name: &str, value: &str) {
        debug!("Job '{}' exports {}", self.job_id, name);
        self.exported_env.insert(name.to_string(), value.to_string());
    }

    /// Put a directory in front of `PATH` for later steps
    pub fn prepend_path(&mut self, dir: impl Into<PathBuf>) {
        let dir = dir.into();
        debug!("Job '{}' prepends {} to PATH", self.job_id, dir.display());
        self.path_prepends.push(dir);
    }

    pub fn exported_env(&self) -> &BTreeMap<String, String> {
        &self.exported_env
    }

    /// Merge the contents of a `GITHUB_ENV` file
    pub fn apply_env_file(&mut self, path: &Path) -> std::io::Result<()> {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e),
        };
        for (name, value) in parse_env_file(&content) {
            self.export_env(&name, &value);
        }
        Ok(())
    }

    /// Merge the contents of a `GITHUB_PATH` file
    pub fn apply_path_file(&mut self, path: &Path) -> std::io::Result<()> {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e),
        };
        for line in content.lines().map(str::trim).filter(|l| !l.is_empty()) {
            self.prepend_path(line);
        }
        Ok(())
    }

    /// Resolve a possibly relative directory against the workspace
    pub fn resolve_path(&self, path: &str) -> PathBuf {
        let candidate = Path::new(path);
        if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            self.workspace.join(candidate)
        }
    }
}

/// Parse `NAME=VALUE` lines and `NAME<<DELIM` heredocs
pub fn parse_env_file(content: &str) -> Vec<(String, String)> {
    let mut entries = Vec::new();
    let mut lines = content.lines();

    while let Some(line) = lines.next() {
        if line.trim().is_empty() {
            continue;
        }

        let eq = line.find('=');
        let heredoc = line.find("<<");
        let is_heredoc = match (heredoc, eq) {
            (Some(h), Some(e)) => h < e,
            (Some(_), None) => true,
            _ => false,
        };

        if is_heredoc {
            let pos = heredoc.unwrap_or_default();
            let name = line[..pos].trim().to_string();
            let delimiter = line[pos + 2..].trim().to_string();
            if name.is_empty() || delimiter.is_empty() {
                warn!("Invalid heredoc in env file: {}", line);
                continue;
            }
            let mut value_lines = Vec::new();
            for value_line in lines.by_ref() {
                if value_line.trim() == delimiter {
                    break;
                }
                value_lines.push(value_line);
            }
            entries.push((name, value_lines.join("\n")));
        } else if let Some(pos) = eq {
            let name = line[..pos].trim().to_string();
            if name.is_empty() {
                warn!("Invalid env file entry with empty name: {}", line);
                continue;
            }
            entries.push((name, line[pos + 1..].to_string()));
        } else {
            warn!("Unrecognized env file line: {}", line);
        }
    }

    entries
}

fn expression_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\$\{\{\s*([A-Za-z0-9_.\-]+)\s*\}\}").expect("valid expression regex")
    })
}

fn runner_os() -> &'static str {
    match std::env::consts::OS {
        "linux" => "Linux",
        "macos" => "macOS",
        "windows" => "Windows",
        other => other,
    }
}
