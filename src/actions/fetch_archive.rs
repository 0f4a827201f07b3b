//! `jobline/fetch-archive`: download a prebuilt archive into the workspace

use crate::actions::{Action, ActionCall, ActionError, ActionOutput};
use crate::core::config::env_key_regex;
use crate::core::{FailureKind, JobContext};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::io::Read;
use std::path::{Component, Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArchiveFormat {
    TarGz,
    Tar,
    Zip,
}

impl ArchiveFormat {
    fn detect(url: &str) -> Option<Self> {
        let path = url.split(['?', '#']).next().unwrap_or(url).to_ascii_lowercase();
        if path.ends_with(".tar.gz") || path.ends_with(".tgz") {
            Some(ArchiveFormat::TarGz)
        } else if path.ends_with(".tar") {
            Some(ArchiveFormat::Tar)
        } else if path.ends_with(".zip") {
            Some(ArchiveFormat::Zip)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchArchive {
    client: reqwest::Client,
}

impl FetchArchive {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, ActionError> {
        let response = self.client.get(url).send().await?.error_for_status()?;
        Ok(response.bytes().await?.to_vec())
    }
}

fn verify_sha256(data: &[u8], expected: &str) -> Result<(), ActionError> {
    let actual = hex::encode(Sha256::digest(data));
    let expected = expected.trim().to_ascii_lowercase();
    if actual != expected {
        return Err(ActionError::ChecksumMismatch { expected, actual });
    }
    Ok(())
}

/// Unpack `data` into `dest`, returning the archive's own top-level entry names
fn extract(data: &[u8], format: ArchiveFormat, dest: &Path) -> Result<BTreeSet<String>, ActionError> {
    std::fs::create_dir_all(dest)?;
    match format {
        ArchiveFormat::TarGz => unpack_tar(flate2::read::GzDecoder::new(data), dest),
        ArchiveFormat::Tar => unpack_tar(data, dest),
        ArchiveFormat::Zip => {
            let mut archive = zip::ZipArchive::new(std::io::Cursor::new(data))
                .map_err(|e| ActionError::Archive(format!("Failed to read zip: {}", e)))?;
            let roots = archive
                .file_names()
                .filter_map(|name| top_level(Path::new(name)))
                .collect();
            archive
                .extract(dest)
                .map_err(|e| ActionError::Archive(format!("Failed to extract zip: {}", e)))?;
            Ok(roots)
        }
    }
}

fn unpack_tar<R: Read>(reader: R, dest: &Path) -> Result<BTreeSet<String>, ActionError> {
    let tar_error = |e: std::io::Error| ActionError::Archive(format!("Failed to extract tar: {}", e));
    let mut archive = tar::Archive::new(reader);
    let mut roots = BTreeSet::new();
    for entry in archive.entries().map_err(tar_error)? {
        let mut entry = entry.map_err(tar_error)?;
        if let Some(root) = top_level(&entry.path().map_err(tar_error)?) {
            roots.insert(root);
        }
        entry.unpack_in(dest).map_err(tar_error)?;
    }
    Ok(roots)
}

/// First real component of an archive member path (`./a/b` gives `a`)
fn top_level(path: &Path) -> Option<String> {
    path.components().find_map(|c| match c {
        Component::Normal(name) => Some(name.to_string_lossy().into_owned()),
        _ => None,
    })
}

/// Where the archive landed: its single top-level directory, or `dest` itself
fn extraction_root(dest: &Path, roots: &BTreeSet<String>) -> PathBuf {
    let dest: PathBuf = dest
        .components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect();
    match roots.iter().collect::<Vec<_>>().as_slice() {
        [only] if dest.join(only).is_dir() => dest.join(only),
        _ => dest,
    }
}

#[async_trait]
impl Action for FetchArchive {
    fn failure_kind(&self) -> FailureKind {
        FailureKind::Dependency
    }

    async fn run(&self, ctx: &JobContext, call: ActionCall<'_>) -> Result<ActionOutput, ActionError> {
        let url = call.required_input("url")?.to_string();
        let format = ArchiveFormat::detect(&url).ok_or_else(|| ActionError::InvalidInput {
            input: "url".to_string(),
            value: url.clone(),
        })?;
        let dest = ctx.resolve_path(call.input("path").unwrap_or("."));
        let export = call.input("export").map(str::to_string);
        if let Some(name) = &export {
            if !env_key_regex().is_match(name) {
                return Err(ActionError::InvalidInput {
                    input: "export".to_string(),
                    value: name.clone(),
                });
            }
        }

        info!("Downloading {}", url);
        let download = self.download(&url);
        let data = match call.timeout {
            Some(limit) => tokio::time::timeout(limit, download)
                .await
                .map_err(|_| ActionError::Process(crate::process::ProcessError::Timeout(limit)))??,
            None => download.await?,
        };

        match call.input("sha256") {
            Some(expected) => verify_sha256(&data, expected)?,
            None => tracing::warn!("No sha256 given for {}; skipping integrity check", url),
        }

        let size = data.len();
        let extract_dest = dest.clone();
        let roots = tokio::task::spawn_blocking(move || extract(&data, format, &extract_dest))
            .await
            .map_err(|e| ActionError::Failed(format!("Extraction task failed: {}", e)))??;

        let root = extraction_root(&dest, &roots);
        info!("Extracted {} bytes into {}", size, root.display());

        let mut output = ActionOutput::message(format!(
            "Downloaded {} ({} bytes)\nExtracted to {}\n",
            url,
            size,
            root.display()
        ));
        if let Some(name) = export {
            output
                .exported_env
                .insert(name, root.display().to_string());
        }
        Ok(output)
    }
}
