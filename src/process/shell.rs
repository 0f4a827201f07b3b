//! Process runner backed by `tokio::process`

use crate::process::{
    OutputSink, OutputStream, ProcessError, ProcessOutput, ProcessRunner, ProcessSpec,
};
use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Runs commands as real child processes
#[derive(Debug, Clone, Default)]
pub struct ShellRunner;

impl ShellRunner {
    pub fn new() -> Self {
        Self
    }

    async fn run_to_end(
        &self,
        spec: &ProcessSpec,
        sink: Option<&dyn OutputSink>,
    ) -> Result<ProcessOutput, ProcessError> {
        let mut child = Command::new(&spec.program)
            .args(&spec.args)
            .envs(&spec.env)
            .current_dir(&spec.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ProcessError::Spawn {
                program: spec.program.clone(),
                source,
            })?;

        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            return Err(ProcessError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "child output pipes were not captured",
            )));
        };

        let mut stdout = BufReader::new(stdout).split(b'\n');
        let mut stderr = BufReader::new(stderr).split(b'\n');
        let (mut stdout_open, mut stderr_open) = (true, true);
        let mut captured = String::new();

        let mut record = |stream: OutputStream, raw: Vec<u8>| {
            let text = String::from_utf8_lossy(&raw);
            let line = text.trim_end_matches('\r');
            if let Some(sink) = sink {
                sink.on_line(stream, line);
            }
            captured.push_str(line);
            captured.push('\n');
        };

        while stdout_open || stderr_open {
            tokio::select! {
                segment = stdout.next_segment(), if stdout_open => match segment? {
                    Some(raw) => record(OutputStream::Stdout, raw),
                    None => stdout_open = false,
                },
                segment = stderr.next_segment(), if stderr_open => match segment? {
                    Some(raw) => record(OutputStream::Stderr, raw),
                    None => stderr_open = false,
                },
            }
        }

        let status = child.wait().await?;
        let exit_code = status.code().unwrap_or(-1);
        if exit_code != 0 {
            warn!("'{}' exited with code {}", spec.program, exit_code);
        }

        Ok(ProcessOutput {
            exit_code,
            output: captured,
        })
    }
}

#[async_trait]
impl ProcessRunner for ShellRunner {
    async fn run(
        &self,
        spec: &ProcessSpec,
        sink: Option<&dyn OutputSink>,
    ) -> Result<ProcessOutput, ProcessError> {
        debug!("Running `{}` in {}", spec.display(), spec.cwd.display());

        match spec.timeout {
            // Dropping the future kills the child.
            Some(limit) => timeout(limit, self.run_to_end(spec, sink))
                .await
                .map_err(|_| ProcessError::Timeout(limit))?,
            None => self.run_to_end(spec, sink).await,
        }
    }
}
