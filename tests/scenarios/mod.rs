//! Scenario-based tests for jobline

mod env_scoping;
mod failure_handling;
mod success_chain;

/// The workflow most scenarios run: checkout, runtime, prebuilt archive,
/// install, format check, tests, doctests, coverage upload.
///
/// `BASE_URL` is replaced with the test server address.
pub const CI_WORKFLOW: &str = r#"
name: CI
on:
  push:
    branches: [master]
  pull_request:
    branches: [master]

env:
  VENV_PATH:

jobs:
  test:
    runs-on: ubuntu-latest
    env:
      TEST_ARGS: "--cov=pkg --cov-report=xml"
    steps:
      - uses: actions/checkout@v2
        with:
          submodules: recursive
          fetch-depth: 0
      - uses: actions/setup-python@v2
        with:
          python-version: "3.8"
      - id: runtime
        name: Fetch inference runtime
        uses: jobline/fetch-archive@v1
        with:
          url: BASE_URL/onnxruntime-linux-x64-1.8.0.tar.gz
          export: ONNXRUNTIME_DIR
      - id: install
        run: pip install -e .[dev]
      - id: format
        run: black --check .
      - id: tests
        run: pytest $TEST_ARGS
      - id: doctest
        run: make doctest
      - id: coverage
        uses: codecov/codecov-action@v1
        with:
          url: BASE_URL
          file: coverage.xml
          fail_ci_if_error: true
"#;

pub fn ci_workflow(base_url: &str) -> String {
    CI_WORKFLOW.replace("BASE_URL", base_url)
}

/// The archive served for the runtime step
pub fn runtime_archive() -> Vec<u8> {
    crate::helpers::tar_gz(
        "onnxruntime-linux-x64-1.8.0",
        "lib/libonnxruntime.so",
        b"\x7fELF",
    )
}
