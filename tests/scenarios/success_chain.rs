//! Test: Success Chain - every step of the CI job runs, in order

use super::{ci_workflow, runtime_archive};
use crate::helpers::*;
use jobline::core::ExecutionStatus;
use jobline::execution::RunOutcome;

fn passing_rules() -> Vec<Rule> {
    vec![
        Rule::new("pytest")
            .prints("5 passed in 0.42s")
            .creates("coverage.xml", "<coverage line-rate=\"0.9\"/>"),
        Rule::new("black --check").prints("All done! 12 files would be left unchanged."),
    ]
}

#[tokio::test]
async fn test_push_to_master_runs_every_step() {
    let server = TestServer::start(runtime_archive()).await;
    let run = run_on_master(&ci_workflow(&server.base_url), passing_rules()).await;

    assert_eq!(run.outcome, RunOutcome::Completed(ExecutionStatus::Succeeded));
    assert_eq!(run.job_status("test"), ExecutionStatus::Succeeded);
    assert_eq!(
        run.started_steps("test"),
        vec!["step-1", "step-2", "runtime", "install", "format", "tests", "doctest", "coverage"]
    );
    for step in ["install", "format", "tests", "doctest", "coverage"] {
        assert_step_succeeded(&run, "test", step);
    }
}

#[tokio::test]
async fn test_coverage_uploaded_exactly_once() {
    let server = TestServer::start(runtime_archive()).await;
    let run = run_on_master(&ci_workflow(&server.base_url), passing_rules()).await;

    assert_eq!(run.status(), ExecutionStatus::Succeeded);
    assert_eq!(server.count("POST /upload/v4"), 1);
    assert_eq!(server.count("PUT /storage"), 1);

    let upload = server
        .requests()
        .into_iter()
        .find(|r| r.starts_with("POST"))
        .unwrap();
    assert!(upload.contains("branch=master"), "{}", upload);
}

#[tokio::test]
async fn test_shell_commands_run_in_declared_order() {
    let server = TestServer::start(runtime_archive()).await;
    let run = run_on_master(&ci_workflow(&server.base_url), passing_rules()).await;

    let scripts: Vec<String> = run
        .runner
        .calls()
        .iter()
        .filter_map(|c| c.script.clone())
        .map(|s| s.trim().to_string())
        .collect();
    assert_eq!(
        scripts,
        vec![
            "pip install -e .[dev]",
            "black --check .",
            "pytest $TEST_ARGS",
            "make doctest"
        ]
    );
}

#[tokio::test]
async fn test_archive_path_is_exported_to_later_steps() {
    let server = TestServer::start(runtime_archive()).await;
    let run = run_on_master(&ci_workflow(&server.base_url), passing_rules()).await;

    let install = run.runner.call_containing("pip install").unwrap();
    let dir = install.env.get("ONNXRUNTIME_DIR").expect("archive path exported");
    assert!(dir.ends_with("onnxruntime-linux-x64-1.8.0"), "{}", dir);
    assert_eq!(server.count("GET /onnxruntime"), 1);

    // The fetching step itself ran before the export existed.
    let setup = run.runner.call_containing("--version").unwrap();
    assert!(!setup.env.contains_key("ONNXRUNTIME_DIR"));
}

#[tokio::test]
async fn test_step_outputs_are_captured() {
    let server = TestServer::start(runtime_archive()).await;
    let run = run_on_master(&ci_workflow(&server.base_url), passing_rules()).await;

    assert_eq!(run.step_state("test", "tests").output(), Some("5 passed in 0.42s"));
    let coverage = run.step_state("test", "coverage").output().unwrap();
    assert!(coverage.contains("https://codecov.test/report/1"));
}

#[tokio::test]
async fn test_archive_export_ignores_checked_out_files() {
    let server = TestServer::start(runtime_archive()).await;
    let mut rules = passing_rules();
    rules.push(Rule::new("checkout -q --force").creates("setup.py", "from setuptools import setup\n"));
    let run = run_on_master(&ci_workflow(&server.base_url), rules).await;

    assert_eq!(run.status(), ExecutionStatus::Succeeded);
    let install = run.runner.call_containing("pip install").unwrap();
    let dir = std::path::Path::new(install.env.get("ONNXRUNTIME_DIR").unwrap());
    assert_eq!(dir, install.cwd.join("onnxruntime-linux-x64-1.8.0"));
}
