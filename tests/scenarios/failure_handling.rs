//! Test: Failure Handling - the first failing step halts its job

use super::{ci_workflow, runtime_archive};
use crate::helpers::*;
use jobline::core::{ExecutionStatus, FailureKind, StepState};
use jobline::execution::{ExecutionEvent, SchedulingStrategy};
use std::time::Duration;

fn failure_kind(run: &TestRun, step_id: &str) -> FailureKind {
    match run.step_state("test", step_id) {
        StepState::Failed { kind, .. } => *kind,
        other => panic!("Step '{}' should have failed, but was: {:?}", step_id, other),
    }
}

#[tokio::test]
async fn test_format_check_failure_stops_the_job() {
    let server = TestServer::start(runtime_archive()).await;
    let rules = vec![Rule::new("black --check")
        .fails(1)
        .prints("would reformat pkg/model.py\nOh no! 1 file would be reformatted.")];
    let run = run_on_master(&ci_workflow(&server.base_url), rules).await;

    assert_eq!(run.status(), ExecutionStatus::Failed);
    assert_eq!(run.job_status("test"), ExecutionStatus::Failed);
    assert_step_failed(&run, "test", "format", "exit code 1");
    assert_eq!(failure_kind(&run, "format"), FailureKind::Execution);
    for step in ["tests", "doctest", "coverage"] {
        assert_step_skipped(&run, "test", step);
    }

    assert!(run.runner.call_containing("pytest").is_none());
    assert_eq!(server.count("POST"), 0);
}

#[tokio::test]
async fn test_failed_step_keeps_exit_code_and_output() {
    let server = TestServer::start(runtime_archive()).await;
    let rules = vec![Rule::new("black --check")
        .fails(123)
        .prints("error: cannot format pkg/broken.py")];
    let run = run_on_master(&ci_workflow(&server.base_url), rules).await;

    match run.step_state("test", "format") {
        StepState::Failed {
            exit_code, output, ..
        } => {
            assert_eq!(*exit_code, Some(123));
            assert!(output.contains("cannot format"));
        }
        other => panic!("unexpected state {:?}", other),
    }
}

#[tokio::test]
async fn test_test_failure_skips_doctest_and_coverage() {
    let server = TestServer::start(runtime_archive()).await;
    let rules = vec![Rule::new("pytest").fails(1).prints("1 failed, 4 passed")];
    let run = run_on_master(&ci_workflow(&server.base_url), rules).await;

    assert_step_failed(&run, "test", "tests", "exit code 1");
    assert_step_skipped(&run, "test", "doctest");
    assert_step_skipped(&run, "test", "coverage");
    assert!(run.runner.call_containing("make doctest").is_none());
    assert_eq!(server.count("POST /upload/v4"), 0);
}

#[tokio::test]
async fn test_unreachable_archive_fails_at_dependency_stage() {
    let yaml = ci_workflow(UNREACHABLE);
    let run = run_on_master(&yaml, vec![]).await;

    assert_eq!(run.job_status("test"), ExecutionStatus::Failed);
    assert_eq!(failure_kind(&run, "runtime"), FailureKind::Dependency);
    for step in ["install", "format", "tests", "doctest", "coverage"] {
        assert_step_skipped(&run, "test", step);
    }
    assert!(run.runner.call_containing("pip install").is_none());
    assert!(run.runner.call_containing("pytest").is_none());
}

#[tokio::test]
async fn test_checksum_mismatch_fails_before_extraction() {
    let server = TestServer::start(runtime_archive()).await;
    let yaml = ci_workflow(&server.base_url).replace(
        "export: ONNXRUNTIME_DIR",
        "export: ONNXRUNTIME_DIR\n          sha256: 0000000000000000000000000000000000000000000000000000000000000000",
    );
    let run = run_on_master(&yaml, vec![]).await;

    assert_eq!(failure_kind(&run, "runtime"), FailureKind::Dependency);
    assert_step_failed(&run, "test", "runtime", "0000000000");
    assert_step_skipped(&run, "test", "install");
}

#[tokio::test]
async fn test_install_failure_is_an_execution_failure() {
    let server = TestServer::start(runtime_archive()).await;
    let rules = vec![Rule::new("pip install").fails(1)];
    let run = run_on_master(&ci_workflow(&server.base_url), rules).await;

    assert_eq!(failure_kind(&run, "install"), FailureKind::Execution);
    assert_step_skipped(&run, "test", "format");
}

#[tokio::test]
async fn test_coverage_upload_failure_fails_the_job() {
    let server = TestServer::start(runtime_archive()).await;
    let yaml = ci_workflow(&server.base_url).replace(
        &format!("url: {}\n", server.base_url),
        &format!("url: {}\n", UNREACHABLE),
    );
    let rules = vec![Rule::new("pytest").creates("coverage.xml", "<coverage/>")];
    let run = run_on_master(&yaml, rules).await;

    assert_eq!(run.job_status("test"), ExecutionStatus::Failed);
    assert_eq!(failure_kind(&run, "coverage"), FailureKind::Reporting);
    // Earlier steps keep their recorded outcome.
    assert_step_succeeded(&run, "test", "doctest");
}

#[tokio::test]
async fn test_coverage_failure_ignored_when_not_fatal() {
    let server = TestServer::start(runtime_archive()).await;
    let yaml = ci_workflow(&server.base_url)
        .replace(
            &format!("url: {}\n", server.base_url),
            &format!("url: {}\n", UNREACHABLE),
        )
        .replace("fail_ci_if_error: true", "fail_ci_if_error: false");
    let rules = vec![Rule::new("pytest").creates("coverage.xml", "<coverage/>")];
    let run = run_on_master(&yaml, rules).await;

    assert_eq!(run.job_status("test"), ExecutionStatus::Succeeded);
    let output = run.step_state("test", "coverage").output().unwrap();
    assert!(output.contains("ignored"));
}

#[tokio::test]
async fn test_missing_coverage_report_fails_reporting() {
    let server = TestServer::start(runtime_archive()).await;
    let run = run_on_master(&ci_workflow(&server.base_url), vec![]).await;

    assert_eq!(failure_kind(&run, "coverage"), FailureKind::Reporting);
    assert_step_failed(&run, "test", "coverage", "coverage.xml");
    assert_eq!(server.count("POST"), 0);
}

#[tokio::test]
async fn test_step_timeout() {
    let yaml = r#"
name: Slow
on: push
jobs:
  test:
    steps:
      - id: hang
        run: ./wait-forever
      - id: after
        run: echo unreachable
"#;
    let mut workflow = workflow_from_yaml(yaml);
    workflow.job_mut("test").unwrap().steps[0].timeout = Some(Duration::from_millis(50));
    let rules = vec![Rule::new("wait-forever").sleeps(Duration::from_secs(30))];
    let run = run_prepared(workflow, push_to("master"), rules, SchedulingStrategy::Sequential).await;

    assert_eq!(failure_kind(&run, "hang"), FailureKind::Timeout);
    assert_step_skipped(&run, "test", "after");
}

#[tokio::test]
async fn test_skip_events_follow_the_failure() {
    let server = TestServer::start(runtime_archive()).await;
    let rules = vec![Rule::new("pytest").fails(2)];
    let run = run_on_master(&ci_workflow(&server.base_url), rules).await;

    let position = |wanted: &str| {
        run.events
            .iter()
            .position(|e| match e {
                ExecutionEvent::StepFailed { step_id, .. } => step_id == wanted,
                ExecutionEvent::StepSkipped { step_id, .. } => step_id == wanted,
                _ => false,
            })
            .unwrap()
    };
    assert!(position("tests") < position("doctest"));
    assert!(position("doctest") < position("coverage"));
}

const SLOW_JOB: &str = r#"
name: Slow
on: push
jobs:
  test:
    steps:
      - id: build
        run: make build
      - id: hang
        run: ./wait-forever
      - id: after
        run: echo unreachable
"#;

#[tokio::test]
async fn test_job_deadline_caps_step_without_its_own_timeout() {
    let mut workflow = workflow_from_yaml(SLOW_JOB);
    workflow.job_mut("test").unwrap().timeout = Some(Duration::from_millis(200));
    let rules = vec![Rule::new("wait-forever").sleeps(Duration::from_secs(30))];
    let run = run_prepared(workflow, push_to("master"), rules, SchedulingStrategy::Sequential).await;

    assert_step_succeeded(&run, "test", "build");
    assert_eq!(failure_kind(&run, "hang"), FailureKind::Timeout);
    assert_step_skipped(&run, "test", "after");
    assert_eq!(run.job_status("test"), ExecutionStatus::Failed);
}

#[tokio::test]
async fn test_exhausted_job_deadline_fails_next_step() {
    let mut workflow = workflow_from_yaml(SLOW_JOB);
    workflow.job_mut("test").unwrap().timeout = Some(Duration::ZERO);
    let run = run_prepared(workflow, push_to("master"), vec![], SchedulingStrategy::Sequential).await;

    assert_eq!(failure_kind(&run, "build"), FailureKind::Timeout);
    assert_step_failed(&run, "test", "build", "Job timeout exceeded");
    assert_step_skipped(&run, "test", "hang");
    assert!(run.runner.calls().is_empty());
}

#[tokio::test]
async fn test_unbounded_job_timeout_does_not_expire() {
    let yaml = SLOW_JOB.replace("  test:\n", "  test:\n    timeout-minutes: 18446744073709551615\n");
    let rules = vec![Rule::new("wait-forever").sleeps(Duration::from_millis(10))];
    let run = run_on_master(&yaml, rules).await;

    assert_eq!(run.job_status("test"), ExecutionStatus::Succeeded);
    assert_step_succeeded(&run, "test", "after");
}
