//! Step executor - runs one step inside a job context

use crate::{
    actions::{ActionCall, ActionError, ActionRegistry},
    core::{FailureKind, JobContext, Step, StepAction},
    process::{OutputSink, ProcessError, ProcessRunner, ProcessSpec},
};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

/// Result of executing a step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// Exit status zero; later steps may run
    Succeeded { output: String },
    /// The job halts here
    Failed {
        kind: FailureKind,
        error: String,
        exit_code: Option<i32>,
        output: String,
    },
}

impl StepOutcome {
    fn internal(error: impl Into<String>) -> Self {
        StepOutcome::Failed {
            kind: FailureKind::Internal,
            error: error.into(),
            exit_code: None,
            output: String::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, StepOutcome::Succeeded { .. })
    }
}

/// Program, argument template and script extension for a `shell:` value.
///
/// `{0}` in the arguments is replaced with the script path.
pub fn shell_command(shell: Option<&str>) -> (String, Vec<String>, &'static str) {
    let strings = |args: &[&str]| args.iter().map(|a| a.to_string()).collect::<Vec<_>>();
    match shell.map(str::trim).unwrap_or("bash") {
        "bash" => (
            "bash".to_string(),
            strings(&["--noprofile", "--norc", "-e", "-o", "pipefail", "{0}"]),
            "sh",
        ),
        "sh" => ("sh".to_string(), strings(&["-e", "{0}"]), "sh"),
        "python" => ("python".to_string(), strings(&["{0}"]), "py"),
        custom => {
            let mut parts = custom.split_whitespace().map(str::to_string);
            let program = parts.next().unwrap_or_else(|| "bash".to_string());
            let mut args: Vec<String> = parts.collect();
            if !args.iter().any(|a| a.contains("{0}")) {
                args.push("{0}".to_string());
            }
            (program, args, "sh")
        }
    }
}

/// Executes a single step
pub struct StepExecutor<R> {
    runner: Arc<R>,
    actions: ActionRegistry,
}

impl<R: ProcessRunner> StepExecutor<R> {
    pub fn new(runner: Arc<R>, actions: ActionRegistry) -> Self {
        Self { runner, actions }
    }

    /// Execute a step and fold its effects into `ctx` on success.
    ///
    /// `index` is the step's position in the job and keeps per-step files apart.
    pub async fn execute(
        &self,
        step: &Step,
        index: usize,
        ctx: &mut JobContext,
        timeout: Option<Duration>,
        sink: Option<&dyn OutputSink>,
    ) -> StepOutcome {
        info!("Executing step: {} ({})", step.id, step.name);

        let env_file = ctx.temp_dir.join(format!("env_{}", index));
        let path_file = ctx.temp_dir.join(format!("path_{}", index));
        for file in [&env_file, &path_file] {
            if let Err(e) = std::fs::write(file, "") {
                error!("Cannot create {}: {}", file.display(), e);
                return StepOutcome::internal(format!("Cannot create {}: {}", file.display(), e));
            }
        }

        let mut env = ctx.step_env(&step.env);
        env.insert("GITHUB_ENV".to_string(), env_file.display().to_string());
        env.insert("GITHUB_PATH".to_string(), path_file.display().to_string());

        let outcome = match &step.action {
            StepAction::Run {
                script,
                shell,
                working_directory,
            } => {
                self.run_script(
                    ctx,
                    index,
                    script,
                    shell.as_deref(),
                    working_directory.as_deref(),
                    env,
                    timeout,
                    sink,
                )
                .await
            }
            StepAction::Uses { action, inputs } => {
                let inputs: BTreeMap<String, String> = inputs
                    .iter()
                    .map(|(k, v)| (k.clone(), ctx.render(v, &env)))
                    .collect();
                let resolved = match self.actions.resolve(action) {
                    Ok(resolved) => resolved,
                    Err(e) => return StepOutcome::internal(e.to_string()),
                };

                let call = ActionCall {
                    step_id: &step.id,
                    inputs: &inputs,
                    env: &env,
                    runner: self.runner.as_ref(),
                    sink,
                    timeout,
                };
                match resolved.run(ctx, call).await {
                    Ok(output) => {
                        for (name, value) in &output.exported_env {
                            ctx.export_env(name, value);
                        }
                        for dir in output.path_prepends {
                            ctx.prepend_path(dir);
                        }
                        StepOutcome::Succeeded {
                            output: output.output,
                        }
                    }
                    Err(e) => action_failure(resolved.failure_kind(), e),
                }
            }
        };

        if outcome.is_success() {
            if let Err(e) = apply_file_commands(ctx, &env_file, &path_file) {
                return StepOutcome::internal(format!("Cannot read step exports: {}", e));
            }
        }
        outcome
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_script(
        &self,
        ctx: &JobContext,
        index: usize,
        script: &str,
        shell: Option<&str>,
        working_directory: Option<&str>,
        env: BTreeMap<String, String>,
        timeout: Option<Duration>,
        sink: Option<&dyn OutputSink>,
    ) -> StepOutcome {
        let script = ctx.render(script, &env);
        let cwd = match working_directory {
            Some(dir) => ctx.resolve_path(&ctx.render(dir, &env)),
            None => ctx.workspace.clone(),
        };

        let (program, args, extension) = shell_command(shell);
        let script_path = ctx.temp_dir.join(format!("step_{}.{}", index, extension));
        if let Err(e) = std::fs::write(&script_path, &script) {
            return StepOutcome::internal(format!("Cannot write step script: {}", e));
        }
        let script_arg = script_path.display().to_string();
        let args: Vec<String> = args.iter().map(|a| a.replace("{0}", &script_arg)).collect();

        let spec = ProcessSpec::new(program, cwd)
            .args(args)
            .envs(env)
            .timeout(timeout);
        debug!("Step script:\n{}", script);

        match self.runner.run(&spec, sink).await {
            Ok(output) if output.success() => StepOutcome::Succeeded {
                output: output.output,
            },
            Ok(output) => StepOutcome::Failed {
                kind: FailureKind::Execution,
                error: format!("Process completed with exit code {}", output.exit_code),
                exit_code: Some(output.exit_code),
                output: output.output,
            },
            Err(ProcessError::Timeout(limit)) => StepOutcome::Failed {
                kind: FailureKind::Timeout,
                error: format!("Timed out after {:?}", limit),
                exit_code: None,
                output: String::new(),
            },
            Err(e) => StepOutcome::internal(e.to_string()),
        }
    }
}

fn action_failure(kind: FailureKind, error: ActionError) -> StepOutcome {
    let kind = if error.is_timeout() {
        FailureKind::Timeout
    } else {
        kind
    };
    StepOutcome::Failed {
        kind,
        exit_code: error.exit_code(),
        error: error.to_string(),
        output: String::new(),
    }
}

fn apply_file_commands(ctx: &mut JobContext, env_file: &Path, path_file: &Path) -> std::io::Result<()> {
    ctx.apply_env_file(env_file)?;
    ctx.apply_path_file(path_file)
}
