//! Terminal rendering of execution events
//!
//! Without `--stream`, each running step gets an `indicatif` spinner that is
//! replaced by a result line when the step finishes; step output is only
//! shown for a failed step. With `--stream`, output lines are printed as they
//! arrive and no spinners are drawn.

use crate::cli::output::{format_execution_event, format_output, style};
use crate::execution::ExecutionEvent;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

/// Lines of a failed step's output shown when not streaming
const FAILED_OUTPUT_LINES: usize = 20;

pub struct TerminalOutput {
    stream: bool,
    progress: MultiProgress,
    /// Spinner of the running step, per job
    spinners: Mutex<HashMap<String, ProgressBar>>,
}

impl TerminalOutput {
    pub fn new(stream: bool) -> Self {
        Self {
            stream,
            progress: MultiProgress::new(),
            spinners: Mutex::new(HashMap::new()),
        }
    }

    fn spinner_style() -> ProgressStyle {
        ProgressStyle::with_template("{spinner:.green} {msg} {elapsed:.dim}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
    }

    fn println(&self, line: &str) {
        self.progress.suspend(|| println!("{}", line));
    }

    fn start_spinner(&self, job_id: &str, message: String) {
        let bar = self.progress.add(ProgressBar::new_spinner());
        bar.set_style(Self::spinner_style());
        bar.set_message(message);
        bar.enable_steady_tick(Duration::from_millis(100));
        if let Ok(mut spinners) = self.spinners.lock() {
            if let Some(previous) = spinners.insert(job_id.to_string(), bar) {
                previous.finish_and_clear();
            }
        }
    }

    fn finish_spinner(&self, job_id: &str) {
        let bar = self
            .spinners
            .lock()
            .ok()
            .and_then(|mut spinners| spinners.remove(job_id));
        if let Some(bar) = bar {
            bar.finish_and_clear();
            self.progress.remove(&bar);
        }
    }

    #[cfg(test)]
    fn running_spinners(&self) -> usize {
        self.spinners.lock().map(|s| s.len()).unwrap_or(0)
    }

    /// Render one event
    pub fn handle(&self, event: &ExecutionEvent) {
        match event {
            ExecutionEvent::StepStarted {
                job_id, step_name, ..
            } if !self.stream => {
                self.start_spinner(job_id, format!("[{}] {}", style(job_id).dim(), step_name));
            }
            ExecutionEvent::StepOutputLine { .. } => {
                if self.stream {
                    self.println(&format_execution_event(event));
                }
            }
            ExecutionEvent::StepSucceeded { job_id, .. } => {
                self.finish_spinner(job_id);
                self.println(&format_execution_event(event));
            }
            ExecutionEvent::StepFailed { job_id, output, .. } => {
                self.finish_spinner(job_id);
                self.println(&format_execution_event(event));
                if !self.stream && !output.trim().is_empty() {
                    self.println(&format_output(output.trim_end(), FAILED_OUTPUT_LINES));
                }
            }
            ExecutionEvent::JobCompleted { job_id, .. } => {
                self.finish_spinner(job_id);
                self.println(&format_execution_event(event));
            }
            _ => self.println(&format_execution_event(event)),
        }
    }
}
