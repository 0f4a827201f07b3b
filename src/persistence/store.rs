//! SQLite-based history store

use crate::core::ExecutionStatus;
use crate::persistence::{HistoryBackend, JobSummary, RunSummary, WorkflowStats};
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use uuid::Uuid;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS runs (
        id TEXT PRIMARY KEY,
        workflow_name TEXT NOT NULL,
        event TEXT NOT NULL,
        branch TEXT NOT NULL,
        status TEXT NOT NULL,
        started_at TEXT NOT NULL,
        completed_at TEXT,
        jobs TEXT NOT NULL DEFAULT '[]'
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_runs_workflow ON runs(workflow_name)",
    "CREATE INDEX IF NOT EXISTS idx_runs_started_at ON runs(started_at)",
];

/// SQLite run history
pub struct SqliteHistoryStore {
    pool: SqlitePool,
}

impl SqliteHistoryStore {
    /// Open (creating if needed) the database at `db_path`; `:memory:` works too
    pub async fn new(db_path: &str) -> Result<Self> {
        let in_memory = db_path == ":memory:";
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path))
            .context("Invalid database path")?
            .create_if_missing(true);

        // Every connection to :memory: is a separate database.
        let max_connections = if in_memory { 1 } else { 4 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .context("Failed to connect to database")?;

        let store = Self { pool };
        store.init().await?;

        Ok(store)
    }

    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        Self::new(&path.to_string_lossy()).await
    }

    /// Default database location under the local data dir
    pub fn default_path() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("jobline")
            .join("history.db")
    }

    /// Create store with default path
    pub async fn with_default_path() -> Result<Self> {
        Self::open(&Self::default_path()).await
    }

    /// Initialize database schema
    async fn init(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .context("Failed to initialize history schema")?;
        }
        Ok(())
    }

    /// Convert DateTime<Utc> to NaiveDateTime for SQLite
    fn to_naive(dt: DateTime<Utc>) -> NaiveDateTime {
        dt.naive_utc()
    }

    /// Convert NaiveDateTime to DateTime<Utc>
    fn from_naive(dt: NaiveDateTime) -> DateTime<Utc> {
        DateTime::from_naive_utc_and_offset(dt, Utc)
    }

    fn from_row(row: &SqliteRow) -> Result<RunSummary> {
        let status: String = row.get("status");
        let jobs: String = row.get("jobs");
        Ok(RunSummary {
            run_id: Uuid::parse_str(&row.get::<String, _>("id"))?,
            workflow_name: row.get("workflow_name"),
            event: row.get("event"),
            branch: row.get("branch"),
            status: ExecutionStatus::from_str(&status).map_err(anyhow::Error::msg)?,
            started_at: Self::from_naive(row.get("started_at")),
            completed_at: row
                .get::<Option<NaiveDateTime>, _>("completed_at")
                .map(Self::from_naive),
            jobs: serde_json::from_str::<Vec<JobSummary>>(&jobs)
                .context("Corrupt job list in history")?,
        })
    }
}

const SELECT_RUNS: &str = r#"
    SELECT id, workflow_name, event, branch, status, started_at, completed_at, jobs
    FROM runs
"#;

#[async_trait::async_trait]
impl HistoryBackend for SqliteHistoryStore {
    async fn save_run(&self, run: &RunSummary) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO runs
            (id, workflow_name, event, branch, status, started_at, completed_at, jobs)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(run.run_id.to_string())
        .bind(&run.workflow_name)
        .bind(&run.event)
        .bind(&run.branch)
        .bind(run.status.as_str())
        .bind(Self::to_naive(run.started_at))
        .bind(run.completed_at.map(Self::to_naive))
        .bind(serde_json::to_string(&run.jobs)?)
        .execute(&self.pool)
        .await
        .context("Failed to save run")?;

        Ok(())
    }

    async fn load_run(&self, run_id: Uuid) -> Result<Option<RunSummary>> {
        let row = sqlx::query(&format!("{} WHERE id = ?1", SELECT_RUNS))
            .bind(run_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .context("Failed to load run")?;

        row.as_ref().map(Self::from_row).transpose()
    }

    async fn list_runs(&self, workflow_name: Option<&str>, limit: usize) -> Result<Vec<RunSummary>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = match workflow_name {
            Some(name) => {
                sqlx::query(&format!(
                    "{} WHERE workflow_name = ?1 ORDER BY started_at DESC LIMIT ?2",
                    SELECT_RUNS
                ))
                .bind(name)
                .bind(limit)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query(&format!("{} ORDER BY started_at DESC LIMIT ?1", SELECT_RUNS))
                    .bind(limit)
                    .fetch_all(&self.pool)
                    .await
            }
        }
        .context("Failed to list runs")?;

        rows.iter().map(Self::from_row).collect()
    }

    async fn list_workflows(&self) -> Result<Vec<WorkflowStats>> {
        let rows = sqlx::query(
            r#"
            SELECT workflow_name,
                   COUNT(*) AS runs,
                   SUM(CASE WHEN status = 'Succeeded' THEN 1 ELSE 0 END) AS succeeded,
                   SUM(CASE WHEN status = 'Failed' THEN 1 ELSE 0 END) AS failed
            FROM runs
            GROUP BY workflow_name
            ORDER BY workflow_name ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to list workflows")?;

        Ok(rows
            .iter()
            .map(|row| WorkflowStats {
                name: row.get("workflow_name"),
                runs: row.get::<i64, _>("runs") as usize,
                succeeded: row.get::<i64, _>("succeeded") as usize,
                failed: row.get::<i64, _>("failed") as usize,
            })
            .collect())
    }
}
