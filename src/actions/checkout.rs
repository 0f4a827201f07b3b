//! `actions/checkout`: materialize the source tree in the job workspace

use crate::actions::{Action, ActionCall, ActionError, ActionOutput};
use crate::core::{FailureKind, JobContext};
use crate::process::ProcessSpec;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Submodules {
    None,
    TopLevel,
    Recursive,
}

impl Submodules {
    fn parse(value: Option<&str>) -> Result<Self, ActionError> {
        match value.map(|v| v.to_ascii_lowercase()) {
            None => Ok(Submodules::None),
            Some(v) => match v.as_str() {
                "false" => Ok(Submodules::None),
                "true" => Ok(Submodules::TopLevel),
                "recursive" => Ok(Submodules::Recursive),
                _ => Err(ActionError::InvalidInput {
                    input: "submodules".to_string(),
                    value: v,
                }),
            },
        }
    }
}

/// Fetches a revision into the workspace with plain `git`
#[derive(Debug, Clone, Default)]
pub struct Checkout;

impl Checkout {
    /// Remote URL for the `repository` input, or for the configured source
    fn remote_url(ctx: &JobContext, repository: Option<&str>) -> Result<String, ActionError> {
        match repository {
            Some(repo) if repo.contains("://") || repo.starts_with("git@") => Ok(repo.to_string()),
            Some(repo) if !Path::new(repo).exists() && repo.split('/').count() == 2 => {
                Ok(format!("https://github.com/{}.git", repo))
            }
            Some(repo) => local_url(&ctx.resolve_path(repo)),
            None => local_url(&ctx.source),
        }
    }

    fn git(ctx: &JobContext, call: &ActionCall<'_>) -> ProcessSpec {
        ProcessSpec::new("git", ctx.workspace.clone()).envs(call.env.clone())
    }
}

fn local_url(path: &Path) -> Result<String, ActionError> {
    let canonical: PathBuf = path.canonicalize().map_err(|e| {
        ActionError::Failed(format!(
            "Source repository {} is not accessible: {}",
            path.display(),
            e
        ))
    })?;
    Ok(format!("file://{}", canonical.display()))
}

#[async_trait]
impl Action for Checkout {
    fn failure_kind(&self) -> FailureKind {
        FailureKind::Provisioning
    }

    async fn run(&self, ctx: &JobContext, call: ActionCall<'_>) -> Result<ActionOutput, ActionError> {
        let url = Self::remote_url(ctx, call.input("repository"))?;
        let depth: u32 = match call.input("fetch-depth") {
            None => 1,
            Some(v) => v.parse().map_err(|_| ActionError::InvalidInput {
                input: "fetch-depth".to_string(),
                value: v.to_string(),
            })?,
        };
        let submodules = Submodules::parse(call.input("submodules"))?;
        let git_ref = call
            .input("ref")
            .map(str::to_string)
            .or_else(|| ctx.event.sha.clone())
            .unwrap_or_else(|| "HEAD".to_string());

        info!(
            "Checking out {} at {} into {} (depth {})",
            url,
            git_ref,
            ctx.workspace.display(),
            if depth == 0 { "full".to_string() } else { depth.to_string() }
        );

        let mut log = String::new();
        log.push_str(&call.run_checked(Self::git(ctx, &call).args(["init", "-q"])).await?);
        log.push_str(
            &call
                .run_checked(Self::git(ctx, &call).args(["remote", "add", "origin", url.as_str()]))
                .await?,
        );

        let mut fetch = Self::git(ctx, &call).args(["fetch", "--no-tags"]);
        if depth > 0 {
            fetch = fetch.arg(format!("--depth={}", depth));
        }
        fetch = fetch.args(["origin", git_ref.as_str()]);
        log.push_str(&call.run_checked(fetch).await?);

        log.push_str(
            &call
                .run_checked(Self::git(ctx, &call).args(["checkout", "-q", "--force", "FETCH_HEAD"]))
                .await?,
        );

        if submodules != Submodules::None {
            log.push_str(
                &call
                    .run_checked(Self::git(ctx, &call).args(["submodule", "sync", "--recursive"]))
                    .await?,
            );
            let mut update = Self::git(ctx, &call)
                .args(["-c", "protocol.file.allow=always", "submodule", "update", "--init", "--force"]);
            if submodules == Submodules::Recursive {
                update = update.arg("--recursive");
            }
            if depth > 0 {
                update = update.arg(format!("--depth={}", depth));
            }
            log.push_str(&call.run_checked(update).await?);
        }

        log.push_str(&format!("Checked out {} ({})\n", url, git_ref));
        Ok(ActionOutput::message(log))
    }
}
