//! `actions/setup-<lang>`: put a specific runtime version first on `PATH`
//!
//! Nothing is downloaded. The action looks for an interpreter already on the
//! host, preferring a versioned binary such as `python3.8`, and falls back
//! to the plain tool if its version banner matches. The match gets a shim
//! directory so later steps reach it by every plain name of the tool.

use crate::actions::{Action, ActionCall, ActionError, ActionOutput};
use crate::core::{FailureKind, JobContext};
use crate::process::ProcessSpec;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct SetupRuntime {
    language: String,
}

/// Tool binaries to try for a language, plus the flag that prints a version
fn tool_for(language: &str) -> (Vec<&str>, &'static str) {
    match language {
        "python" => (vec!["python", "python3"], "--version"),
        "node" => (vec!["node"], "--version"),
        "go" => (vec!["go"], "version"),
        "java" => (vec!["java"], "-version"),
        "ruby" => (vec!["ruby"], "--version"),
        other => (vec![other], "--version"),
    }
}

impl SetupRuntime {
    pub fn new(language: &str) -> Self {
        Self {
            language: language.to_string(),
        }
    }

    /// Candidate commands for a requested version, most specific first
    fn candidates(&self, version: &str) -> Vec<(String, bool)> {
        let (tools, _) = tool_for(&self.language);
        let mut candidates = vec![(format!("{}{}", tools[0], version), true)];
        for tool in &tools {
            candidates.push((tool.to_string(), false));
        }
        candidates
    }

    async fn probe(
        &self,
        ctx: &JobContext,
        call: &ActionCall<'_>,
        program: &str,
    ) -> Option<String> {
        let (_, version_flag) = tool_for(&self.language);
        let spec = ProcessSpec::new(program, ctx.workspace.clone())
            .arg(version_flag)
            .envs(call.env.clone())
            .timeout(call.timeout);
        match call.runner.run(&spec, None).await {
            Ok(output) if output.success() => Some(output.output),
            Ok(output) => {
                debug!("{} {} exited with {}", program, version_flag, output.exit_code);
                None
            }
            Err(e) => {
                debug!("{} is not available: {}", program, e);
                None
            }
        }
    }

    fn write_shims(&self, bin_dir: &Path, target: &str) -> Result<(), ActionError> {
        std::fs::create_dir_all(bin_dir)?;
        let (tools, _) = tool_for(&self.language);
        let mut names: Vec<String> = tools.iter().map(|t| t.to_string()).collect();
        if self.language == "python" {
            names.push("pip".to_string());
        }

        // A shim named after its own target would exec itself.
        for name in names.into_iter().filter(|name| name != target) {
            let script = if name == "pip" {
                format!("#!/bin/sh\nexec {} -m pip \"$@\"\n", target)
            } else {
                format!("#!/bin/sh\nexec {} \"$@\"\n", target)
            };
            let path = bin_dir.join(&name);
            std::fs::write(&path, script)?;
            make_executable(&path)?;
        }
        Ok(())
    }
}

#[cfg(unix)]
fn make_executable(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

/// Whether a version banner names `version` as a whole component
fn banner_matches(banner: &str, version: &str) -> bool {
    banner
        .split(|c: char| !(c.is_ascii_alphanumeric() || c == '.'))
        .map(|word| word.trim_start_matches(|c: char| c.is_ascii_alphabetic()))
        .any(|word| word == version || word.starts_with(&format!("{}.", version)))
}

#[async_trait]
impl Action for SetupRuntime {
    fn failure_kind(&self) -> FailureKind {
        FailureKind::Provisioning
    }

    async fn run(&self, ctx: &JobContext, call: ActionCall<'_>) -> Result<ActionOutput, ActionError> {
        let input_name = format!("{}-version", self.language);
        let version = call.required_input(&input_name)?.trim().to_string();

        for (program, versioned) in self.candidates(&version) {
            let Some(banner) = self.probe(ctx, &call, &program).await else {
                continue;
            };
            if !versioned && !banner_matches(&banner, &version) {
                debug!("{} reports '{}', wanted {}", program, banner.trim(), version);
                continue;
            }

            info!("Using {} for {} {}", program, self.language, version);
            let mut output = ActionOutput::message(format!(
                "Using {} {} ({})\n{}",
                self.language,
                version,
                program,
                banner
            ));

            // Every plain tool name must reach the match, even when another
            // install of the same language comes first on PATH.
            let bin_dir: PathBuf = ctx
                .temp_dir
                .join("toolcache")
                .join(format!("{}-{}", self.language, version))
                .join("bin");
            self.write_shims(&bin_dir, &program)?;
            output.path_prepends.push(bin_dir);
            return Ok(output);
        }

        Err(ActionError::Failed(format!(
            "{} {} is not available on this host",
            self.language, version
        )))
    }
}
