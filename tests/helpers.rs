//! Test utilities for jobline scenarios
#![allow(dead_code)]

use async_trait::async_trait;
use jobline::core::config::WorkflowConfig;
use jobline::core::{ExecutionStatus, StepState, TriggerEvent, Workflow};
use jobline::execution::{
    EngineOptions, ExecutionEngine, ExecutionEvent, RunOutcome, SchedulingStrategy,
};
use jobline::process::{
    OutputSink, OutputStream, ProcessError, ProcessOutput, ProcessRunner, ProcessSpec,
};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Scripted reply for commands whose script (or command line) contains `pattern`
#[derive(Debug, Clone)]
pub struct Rule {
    pub pattern: String,
    pub exit_code: i32,
    pub output: String,
    /// Written to `$GITHUB_ENV` as `NAME=VALUE` lines
    pub exports: Vec<(String, String)>,
    /// Written to `$GITHUB_PATH`, one directory per line
    pub path_entries: Vec<String>,
    /// Files written relative to the working directory
    pub files: Vec<(String, String)>,
    pub delay: Option<Duration>,
}

impl Rule {
    pub fn new(pattern: &str) -> Self {
        Self {
            pattern: pattern.to_string(),
            exit_code: 0,
            output: String::new(),
            exports: Vec::new(),
            path_entries: Vec::new(),
            files: Vec::new(),
            delay: None,
        }
    }

    pub fn fails(mut self, exit_code: i32) -> Self {
        self.exit_code = exit_code;
        self
    }

    pub fn prints(mut self, output: &str) -> Self {
        self.output = output.to_string();
        self
    }

    pub fn exports(mut self, name: &str, value: &str) -> Self {
        self.exports.push((name.to_string(), value.to_string()));
        self
    }

    pub fn adds_path(mut self, dir: &str) -> Self {
        self.path_entries.push(dir.to_string());
        self
    }

    pub fn creates(mut self, path: &str, contents: &str) -> Self {
        self.files.push((path.to_string(), contents.to_string()));
        self
    }

    pub fn sleeps(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

/// One process the engine asked for
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub program: String,
    pub args: Vec<String>,
    /// Contents of the script file, for `run` steps
    pub script: Option<String>,
    pub env: BTreeMap<String, String>,
    pub cwd: PathBuf,
}

impl RecordedCall {
    pub fn text(&self) -> String {
        match &self.script {
            Some(script) => script.clone(),
            None => std::iter::once(self.program.as_str())
                .chain(self.args.iter().map(String::as_str))
                .collect::<Vec<_>>()
                .join(" "),
        }
    }
}

/// Process runner that never spawns anything.
///
/// Unmatched commands succeed with no output.
#[derive(Clone, Default)]
pub struct MockRunner {
    rules: Arc<Vec<Rule>>,
    calls: Arc<Mutex<Vec<RecordedCall>>>,
}

impl MockRunner {
    pub fn new(rules: Vec<Rule>) -> Self {
        Self {
            rules: Arc::new(rules),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Texts of every call, in the order they were made
    pub fn call_texts(&self) -> Vec<String> {
        self.calls().iter().map(|c| c.text().trim().to_string()).collect()
    }

    /// The call whose text contains `needle`
    pub fn call_containing(&self, needle: &str) -> Option<RecordedCall> {
        self.calls().into_iter().find(|c| c.text().contains(needle))
    }
}

#[async_trait]
impl ProcessRunner for MockRunner {
    async fn run(
        &self,
        spec: &ProcessSpec,
        sink: Option<&dyn OutputSink>,
    ) -> Result<ProcessOutput, ProcessError> {
        let script = spec
            .args
            .last()
            .filter(|arg| arg.contains("step_"))
            .and_then(|path| std::fs::read_to_string(path).ok());
        let call = RecordedCall {
            program: spec.program.clone(),
            args: spec.args.clone(),
            script,
            env: spec.env.clone(),
            cwd: spec.cwd.clone(),
        };
        let text = call.text();
        self.calls.lock().unwrap().push(call);

        let Some(rule) = self.rules.iter().find(|r| text.contains(&r.pattern)) else {
            return Ok(ProcessOutput {
                exit_code: 0,
                output: String::new(),
            });
        };

        if let Some(delay) = rule.delay {
            match spec.timeout {
                Some(limit) if limit < delay => {
                    tokio::time::sleep(limit).await;
                    return Err(ProcessError::Timeout(limit));
                }
                _ => tokio::time::sleep(delay).await,
            }
        }

        if !rule.exports.is_empty() {
            if let Some(path) = spec.env.get("GITHUB_ENV") {
                let mut file = std::fs::OpenOptions::new().append(true).open(path)?;
                for (name, value) in &rule.exports {
                    writeln!(file, "{}={}", name, value)?;
                }
            }
        }

        if !rule.path_entries.is_empty() {
            if let Some(path) = spec.env.get("GITHUB_PATH") {
                let mut file = std::fs::OpenOptions::new().append(true).open(path)?;
                for dir in &rule.path_entries {
                    writeln!(file, "{}", dir)?;
                }
            }
        }

        for (path, contents) in &rule.files {
            std::fs::write(spec.cwd.join(path), contents)?;
        }

        if let Some(sink) = sink {
            for line in rule.output.lines() {
                sink.on_line(OutputStream::Stdout, line);
            }
        }

        Ok(ProcessOutput {
            exit_code: rule.exit_code,
            output: rule.output.clone(),
        })
    }
}

/// A finished run plus everything observed along the way
pub struct TestRun {
    pub workflow: Workflow,
    pub outcome: RunOutcome,
    pub events: Vec<ExecutionEvent>,
    pub runner: MockRunner,
    pub work_root: tempfile::TempDir,
}

impl TestRun {
    pub fn status(&self) -> ExecutionStatus {
        self.workflow.state.status
    }

    pub fn job_status(&self, job_id: &str) -> ExecutionStatus {
        self.workflow
            .job(job_id)
            .unwrap_or_else(|| panic!("Job '{}' not found", job_id))
            .state
            .status
    }

    pub fn step_state(&self, job_id: &str, step_id: &str) -> &StepState {
        &self
            .workflow
            .job(job_id)
            .and_then(|job| job.step(step_id))
            .unwrap_or_else(|| panic!("Step '{}/{}' not found", job_id, step_id))
            .state
    }

    /// Ids of the steps a job started, in order
    pub fn started_steps(&self, job_id: &str) -> Vec<String> {
        self.events
            .iter()
            .filter_map(|e| match e {
                ExecutionEvent::StepStarted {
                    job_id: j, step_id, ..
                } if j == job_id => Some(step_id.clone()),
                _ => None,
            })
            .collect()
    }
}

pub fn workflow_from_yaml(yaml: &str) -> Workflow {
    WorkflowConfig::from_yaml(yaml)
        .unwrap_or_else(|e| panic!("Failed to parse workflow YAML: {:#}", e))
        .to_workflow()
}

pub fn push_to(branch: &str) -> TriggerEvent {
    TriggerEvent::new(jobline::core::EventKind::Push, branch)
}

/// Run `yaml` against a mock runner, honouring triggers
pub async fn run_workflow(
    yaml: &str,
    event: TriggerEvent,
    rules: Vec<Rule>,
    strategy: SchedulingStrategy,
) -> TestRun {
    run_prepared(workflow_from_yaml(yaml), event, rules, strategy).await
}

/// Run an already built workflow against a mock runner
pub async fn run_prepared(
    mut workflow: Workflow,
    event: TriggerEvent,
    rules: Vec<Rule>,
    strategy: SchedulingStrategy,
) -> TestRun {
    let runner = MockRunner::new(rules);
    let work_root = tempfile::tempdir().unwrap();
    let options = EngineOptions {
        work_root: work_root.path().to_path_buf(),
        source: work_root.path().to_path_buf(),
        keep_workspace: false,
    };

    let engine = ExecutionEngine::new(runner.clone(), strategy, options);
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    engine.add_event_handler(move |event| sink.lock().unwrap().push(event));

    let outcome = engine.execute(&mut workflow, &event).await;
    let events = events.lock().unwrap().clone();

    TestRun {
        workflow,
        outcome,
        events,
        runner,
        work_root,
    }
}

/// Sequential run of a push to `master`
pub async fn run_on_master(yaml: &str, rules: Vec<Rule>) -> TestRun {
    run_workflow(yaml, push_to("master"), rules, SchedulingStrategy::Sequential).await
}

pub fn assert_step_succeeded(run: &TestRun, job_id: &str, step_id: &str) {
    let state = run.step_state(job_id, step_id);
    assert!(
        state.is_succeeded(),
        "Step '{}/{}' should have succeeded, but was: {:?}",
        job_id,
        step_id,
        state
    );
}

pub fn assert_step_failed(run: &TestRun, job_id: &str, step_id: &str, expected_error: &str) {
    match run.step_state(job_id, step_id) {
        StepState::Failed { error, .. } => assert!(
            error.contains(expected_error),
            "Step '{}/{}' error:\n{}\n\ndoes not contain:\n{}",
            job_id,
            step_id,
            error,
            expected_error
        ),
        other => panic!(
            "Step '{}/{}' should have failed, but was: {:?}",
            job_id, step_id, other
        ),
    }
}

pub fn assert_step_skipped(run: &TestRun, job_id: &str, step_id: &str) {
    let state = run.step_state(job_id, step_id);
    assert!(
        matches!(state, StepState::Skipped { .. }),
        "Step '{}/{}' should have been skipped, but was: {:?}",
        job_id,
        step_id,
        state
    );
}

/// Minimal HTTP server standing in for the archive host and the coverage service.
///
/// `GET *.tar.gz` returns `archive`, `POST /upload/v4` returns a report URL
/// and a storage URL, `PUT /storage` accepts the report.
pub struct TestServer {
    pub base_url: String,
    requests: Arc<Mutex<Vec<String>>>,
}

impl TestServer {
    pub async fn start(archive: Vec<u8>) -> Self {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        let requests = Arc::new(Mutex::new(Vec::new()));
        let seen = requests.clone();
        let storage_url = format!("{}/storage", base_url);
        let archive = Arc::new(archive);

        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    break;
                };
                let seen = seen.clone();
                let storage_url = storage_url.clone();
                let archive = archive.clone();
                tokio::spawn(async move {
                    let mut buf = Vec::new();
                    let mut chunk = [0u8; 4096];
                    let header_end = loop {
                        let n = socket.read(&mut chunk).await.unwrap_or(0);
                        if n == 0 {
                            return;
                        }
                        buf.extend_from_slice(&chunk[..n]);
                        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                            break pos + 4;
                        }
                    };
                    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
                    let content_length = head
                        .lines()
                        .find_map(|l| {
                            let (name, value) = l.split_once(':')?;
                            name.eq_ignore_ascii_case("content-length")
                                .then(|| value.trim().parse::<usize>().ok())?
                        })
                        .unwrap_or(0);
                    while buf.len() < header_end + content_length {
                        let n = socket.read(&mut chunk).await.unwrap_or(0);
                        if n == 0 {
                            break;
                        }
                        buf.extend_from_slice(&chunk[..n]);
                    }

                    let request_line = head.lines().next().unwrap_or_default().to_string();
                    let mut parts = request_line.split_whitespace();
                    let method = parts.next().unwrap_or_default().to_string();
                    let path = parts.next().unwrap_or_default().to_string();
                    seen.lock().unwrap().push(format!("{} {}", method, path));

                    let (status, body): (&str, Vec<u8>) = if method == "GET"
                        && path.split('?').next().unwrap_or_default().ends_with(".tar.gz")
                    {
                        ("200 OK", archive.to_vec())
                    } else if method == "POST" && path.starts_with("/upload/v4") {
                        (
                            "200 OK",
                            format!("https://codecov.test/report/1\n{}", storage_url).into_bytes(),
                        )
                    } else if method == "PUT" && path.starts_with("/storage") {
                        ("200 OK", b"stored".to_vec())
                    } else {
                        ("404 Not Found", b"not found".to_vec())
                    };

                    let header = format!(
                        "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                        status,
                        body.len()
                    );
                    let _ = socket.write_all(header.as_bytes()).await;
                    let _ = socket.write_all(&body).await;
                    let _ = socket.shutdown().await;
                });
            }
        });

        Self { base_url, requests }
    }

    /// `METHOD /path?query` of every request received
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.requests().iter().filter(|r| r.starts_with(prefix)).count()
    }
}

/// A `.tar.gz` holding `root/<file>` with `contents`
pub fn tar_gz(root: &str, file: &str, contents: &[u8]) -> Vec<u8> {
    let encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    let mut builder = tar::Builder::new(encoder);
    let mut header = tar::Header::new_gnu();
    header.set_size(contents.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder
        .append_data(&mut header, format!("{}/{}", root, file), contents)
        .unwrap();
    builder.into_inner().unwrap().finish().unwrap()
}

/// Address nothing listens on
pub const UNREACHABLE: &str = "http://127.0.0.1:9";
