//! Per-job sandbox directories

use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// `<work-root>/<run-id>/<job-id>/` with `workspace/` and `temp/` inside
#[derive(Debug, Clone)]
pub struct Sandbox {
    pub root: PathBuf,
    pub workspace: PathBuf,
    pub temp: PathBuf,
    keep: bool,
}

impl Sandbox {
    /// Create a fresh, empty sandbox for a job
    pub fn create(work_root: &Path, run_id: Uuid, job_id: &str, keep: bool) -> io::Result<Self> {
        let root = work_root.join(run_id.to_string()).join(job_id);
        if root.exists() {
            warn!("Removing stale sandbox {}", root.display());
            std::fs::remove_dir_all(&root)?;
        }

        let workspace = root.join("workspace");
        let temp = root.join("temp");
        std::fs::create_dir_all(&workspace)?;
        std::fs::create_dir_all(&temp)?;
        debug!("Created sandbox {}", root.display());

        Ok(Self {
            root,
            workspace,
            temp,
            keep,
        })
    }

    /// Remove the sandbox unless it was created with `keep`
    pub fn cleanup(&self) -> io::Result<()> {
        if self.keep {
            info!("Keeping workspace {}", self.workspace.display());
            return Ok(());
        }
        std::fs::remove_dir_all(&self.root)?;

        // The run directory goes once its last job is cleaned up.
        if let Some(run_dir) = self.root.parent() {
            let _ = std::fs::remove_dir(run_dir);
        }
        Ok(())
    }
}
