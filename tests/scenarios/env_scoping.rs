//! Test: Environment Scoping - job, step and exported bindings

use crate::helpers::*;
use jobline::core::ExecutionStatus;

const ENV_WORKFLOW: &str = r#"
name: Env
on: push
env:
  VENV_PATH:
  PYTHON: python3
jobs:
  test:
    env:
      TEST_ARGS: "-k smoke --cov-report=xml"
      PYTHON: python3.8
    steps:
      - id: first
        env:
          ONLY_FIRST: "1"
        run: echo first
      - id: export
        run: echo "MODEL_DIR=/opt/models" >> "$GITHUB_ENV"
      - id: second
        run: echo second
      - id: render
        run: echo "${{ env.TEST_ARGS }} on ${{ github.ref_name }}"
"#;

#[tokio::test]
async fn test_step_bindings_do_not_leak_to_siblings() {
    let run = run_on_master(ENV_WORKFLOW, vec![]).await;
    assert_eq!(run.status(), ExecutionStatus::Succeeded);

    let first = run.runner.call_containing("echo first").unwrap();
    let second = run.runner.call_containing("echo second").unwrap();
    assert_eq!(first.env.get("ONLY_FIRST").map(String::as_str), Some("1"));
    assert!(!second.env.contains_key("ONLY_FIRST"));
}

#[tokio::test]
async fn test_job_bindings_override_workflow_bindings() {
    let run = run_on_master(ENV_WORKFLOW, vec![]).await;

    for call in run.runner.calls() {
        assert_eq!(call.env.get("PYTHON").map(String::as_str), Some("python3.8"));
        assert_eq!(
            call.env.get("TEST_ARGS").map(String::as_str),
            Some("-k smoke --cov-report=xml")
        );
    }
}

#[tokio::test]
async fn test_blank_placeholder_is_an_empty_string() {
    let run = run_on_master(ENV_WORKFLOW, vec![]).await;

    let first = run.runner.call_containing("echo first").unwrap();
    assert_eq!(first.env.get("VENV_PATH").map(String::as_str), Some(""));
}

#[tokio::test]
async fn test_exports_are_visible_to_later_steps_only() {
    let rules = vec![Rule::new("MODEL_DIR=").exports("MODEL_DIR", "/opt/models")];
    let run = run_on_master(ENV_WORKFLOW, rules).await;

    let first = run.runner.call_containing("echo first").unwrap();
    let export = run.runner.call_containing("GITHUB_ENV").unwrap();
    let second = run.runner.call_containing("echo second").unwrap();
    assert!(!first.env.contains_key("MODEL_DIR"));
    assert!(!export.env.contains_key("MODEL_DIR"));
    assert_eq!(second.env.get("MODEL_DIR").map(String::as_str), Some("/opt/models"));
}

#[tokio::test]
async fn test_exports_do_not_cross_jobs() {
    let yaml = r#"
name: Env
on: push
jobs:
  first:
    steps:
      - run: echo "TOKEN=abc" >> "$GITHUB_ENV"
      - run: echo same-job
  second:
    steps:
      - run: echo other-job
"#;
    let rules = vec![Rule::new("TOKEN=abc").exports("TOKEN", "abc")];
    let run = run_on_master(yaml, rules).await;

    assert_eq!(run.status(), ExecutionStatus::Succeeded);
    let same = run.runner.call_containing("echo same-job").unwrap();
    let other = run.runner.call_containing("echo other-job").unwrap();
    assert_eq!(same.env.get("TOKEN").map(String::as_str), Some("abc"));
    assert!(!other.env.contains_key("TOKEN"));
}

#[tokio::test]
async fn test_builtin_variables() {
    let run = run_on_master(ENV_WORKFLOW, vec![]).await;

    let call = run.runner.call_containing("echo first").unwrap();
    assert_eq!(call.env.get("CI").map(String::as_str), Some("true"));
    assert_eq!(call.env.get("GITHUB_EVENT_NAME").map(String::as_str), Some("push"));
    assert_eq!(call.env.get("GITHUB_REF").map(String::as_str), Some("refs/heads/master"));
    assert_eq!(call.env.get("JOBLINE_JOB_ID").map(String::as_str), Some("test"));
    let workspace = call.env.get("GITHUB_WORKSPACE").unwrap();
    assert_eq!(std::path::Path::new(workspace), call.cwd.as_path());
}

#[tokio::test]
async fn test_expressions_are_rendered_into_scripts() {
    let run = run_on_master(ENV_WORKFLOW, vec![]).await;

    let render = run.runner.call_containing("on master").unwrap();
    assert_eq!(
        render.script.unwrap().trim(),
        "echo \"-k smoke --cov-report=xml on master\""
    );
}

#[tokio::test]
async fn test_path_additions_apply_to_later_steps() {
    let yaml = r#"
name: Env
on: push
jobs:
  test:
    steps:
      - id: before
        run: echo before
      - id: add-path
        run: echo "/opt/ort/bin" >> "$GITHUB_PATH"
      - id: after
        run: echo after
"#;
    let rules = vec![Rule::new("GITHUB_PATH").adds_path("/opt/ort/bin")];
    let run = run_on_master(yaml, rules).await;
    assert_eq!(run.status(), ExecutionStatus::Succeeded);

    let starts_with_tools = |needle: &str| {
        let call = run.runner.call_containing(needle).unwrap();
        call.env
            .get("PATH")
            .and_then(|path| std::env::split_paths(path).next())
            .map_or(false, |first| first == std::path::Path::new("/opt/ort/bin"))
    };
    assert!(!starts_with_tools("echo before"));
    assert!(!starts_with_tools("GITHUB_PATH"));
    assert!(starts_with_tools("echo after"));
}
