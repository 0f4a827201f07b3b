//! `codecov/codecov-action`: upload coverage reports

use crate::actions::{Action, ActionCall, ActionError, ActionOutput};
use crate::core::{FailureKind, JobContext};
use async_trait::async_trait;
use std::path::Path;
use tracing::{info, warn};

const DEFAULT_URL: &str = "https://codecov.io";
const DEFAULT_FILE: &str = "coverage.xml";

#[derive(Debug, Clone)]
pub struct CoverageUpload {
    client: reqwest::Client,
}

impl CoverageUpload {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn upload(
        &self,
        ctx: &JobContext,
        call: &ActionCall<'_>,
    ) -> Result<String, ActionError> {
        let files = report_files(call);
        let report = build_report(&ctx.workspace, &files)?;

        let base = call.input("url").unwrap_or(DEFAULT_URL).trim_end_matches('/');
        let mut query: Vec<(&str, String)> = vec![
            ("package", format!("jobline-{}", env!("CARGO_PKG_VERSION"))),
            ("branch", ctx.event.branch.clone()),
            ("service", "custom".to_string()),
        ];
        if let Some(sha) = &ctx.event.sha {
            query.push(("commit", sha.clone()));
        }
        if let Some(token) = call
            .input("token")
            .map(str::to_string)
            .or_else(|| call.env.get("CODECOV_TOKEN").cloned())
            .filter(|t| !t.is_empty())
        {
            query.push(("token", token));
        }
        for key in ["flags", "name", "slug"] {
            if let Some(value) = call.input(key) {
                query.push((key, value.to_string()));
            }
        }

        info!("Uploading {} coverage file(s) to {}", files.len(), base);
        let response = self
            .client
            .post(format!("{}/upload/v4", base))
            .query(&query)
            .header("Accept", "text/plain")
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        let mut lines = response.lines();
        let report_url = lines.next().unwrap_or_default().trim().to_string();
        match lines.next().map(str::trim).filter(|l| !l.is_empty()) {
            Some(put_url) => {
                self.client
                    .put(put_url)
                    .header("Content-Type", "text/plain")
                    .body(report)
                    .send()
                    .await?
                    .error_for_status()?;
            }
            None => {
                return Err(ActionError::Failed(format!(
                    "Upload endpoint returned no storage URL: {}",
                    response.trim()
                )))
            }
        }

        Ok(format!("Coverage uploaded: {}\n", report_url))
    }
}

fn report_files(call: &ActionCall<'_>) -> Vec<String> {
    let raw = call
        .input("files")
        .or_else(|| call.input("file"))
        .unwrap_or(DEFAULT_FILE);
    raw.split(',')
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .map(str::to_string)
        .collect()
}

/// Concatenate reports in the upload format: one `# path=` header per file,
/// a `<<<<<< EOF` terminator after each.
pub fn build_report(workspace: &Path, files: &[String]) -> Result<String, ActionError> {
    let mut report = String::from("<<<<<< network\n");
    for file in files {
        let path = workspace.join(file);
        let contents = std::fs::read_to_string(&path).map_err(|e| {
            ActionError::Failed(format!("Cannot read coverage report {}: {}", path.display(), e))
        })?;
        report.push_str(&format!("# path={}\n", file));
        report.push_str(&contents);
        if !contents.ends_with('\n') {
            report.push('\n');
        }
        report.push_str("<<<<<< EOF\n");
    }
    Ok(report)
}

#[async_trait]
impl Action for CoverageUpload {
    fn failure_kind(&self) -> FailureKind {
        FailureKind::Reporting
    }

    async fn run(&self, ctx: &JobContext, call: ActionCall<'_>) -> Result<ActionOutput, ActionError> {
        let fail_on_error = call.bool_input("fail_ci_if_error", true)?;

        let upload = self.upload(ctx, &call);
        let result = match call.timeout {
            Some(limit) => tokio::time::timeout(limit, upload)
                .await
                .unwrap_or_else(|_| {
                    Err(ActionError::Process(crate::process::ProcessError::Timeout(limit)))
                }),
            None => upload.await,
        };

        match result {
            Ok(message) => Ok(ActionOutput::message(message)),
            Err(e) if !fail_on_error => {
                warn!("Coverage upload failed, continuing: {}", e);
                Ok(ActionOutput::message(format!(
                    "Coverage upload failed (ignored): {}\n",
                    e
                )))
            }
            Err(e) => Err(e),
        }
    }
}
