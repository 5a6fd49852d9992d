//! Durable import job records.
//!
//! One row per import run. The active job's row is written only by its
//! worker (checkpoints) and by the supervisor (terminal transitions after
//! the worker is gone), so the two writers never race.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

/// Import job lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobStatus {
    Idle,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Idle => "IDLE",
            JobStatus::Running => "RUNNING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
        }
    }
}

impl From<&str> for JobStatus {
    fn from(s: &str) -> Self {
        match s {
            "RUNNING" => JobStatus::Running,
            "COMPLETED" => JobStatus::Completed,
            "FAILED" => JobStatus::Failed,
            _ => JobStatus::Idle,
        }
    }
}

/// Durable control record for one import run (maps to `import_jobs`).
///
/// The 64-bit counters serialize as strings so JSON consumers that assume
/// 53-bit integers never lose precision.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ImportJob {
    pub id: Uuid,
    pub file_path: String,
    pub status: String,
    #[serde(serialize_with = "super::serialize_i64_string")]
    pub bytes_read: i64,
    #[serde(serialize_with = "super::serialize_i64_string")]
    pub rows_processed: i64,
    #[serde(serialize_with = "super::serialize_i64_string")]
    pub rows_inserted: i64,
    pub last_row_hash: Option<String>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl ImportJob {
    pub fn status(&self) -> JobStatus {
        JobStatus::from(self.status.as_str())
    }

    pub fn is_running(&self) -> bool {
        self.status() == JobStatus::Running
    }
}

const JOB_COLUMNS: &str = "id, file_path, status, bytes_read, rows_processed, rows_inserted, \
     last_row_hash, error, started_at, completed_at, updated_at";

/// Data-access layer for `import_jobs`.
#[derive(Debug, Clone)]
pub struct JobStore {
    pool: PgPool,
}

impl JobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create a fresh RUNNING job with zeroed counters and no marker.
    pub async fn create(&self, file_path: &str) -> Result<ImportJob, sqlx::Error> {
        let sql = format!(
            "INSERT INTO import_jobs (id, file_path, status) VALUES ($1, $2, 'RUNNING') \
             RETURNING {JOB_COLUMNS}"
        );
        sqlx::query_as::<_, ImportJob>(&sql)
            .bind(Uuid::new_v4())
            .bind(file_path)
            .fetch_one(&self.pool)
            .await
    }

    /// Most recently updated RUNNING job, if any.
    pub async fn find_latest_running(&self) -> Result<Option<ImportJob>, sqlx::Error> {
        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM import_jobs WHERE status = 'RUNNING' \
             ORDER BY updated_at DESC LIMIT 1"
        );
        sqlx::query_as::<_, ImportJob>(&sql)
            .fetch_optional(&self.pool)
            .await
    }

    /// Latest job overall, preferring a RUNNING one.
    pub async fn find_latest(&self) -> Result<Option<ImportJob>, sqlx::Error> {
        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM import_jobs \
             ORDER BY (status = 'RUNNING') DESC, updated_at DESC LIMIT 1"
        );
        sqlx::query_as::<_, ImportJob>(&sql)
            .fetch_optional(&self.pool)
            .await
    }

    /// Fetch a job by id.
    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<ImportJob>, sqlx::Error> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM import_jobs WHERE id = $1");
        sqlx::query_as::<_, ImportJob>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    /// Persist a checkpoint. All four cursor fields land in one UPDATE so a
    /// resume always reads a consistent tuple.
    pub async fn update_progress(
        &self,
        id: Uuid,
        bytes_read: i64,
        rows_processed: i64,
        rows_inserted: i64,
        last_row_hash: Option<&str>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE import_jobs \
             SET bytes_read = $2, rows_processed = $3, rows_inserted = $4, \
                 last_row_hash = $5, updated_at = NOW() \
             WHERE id = $1",
        )
        .bind(id)
        .bind(bytes_read)
        .bind(rows_processed)
        .bind(rows_inserted)
        .bind(last_row_hash)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn mark_completed(&self, id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE import_jobs \
             SET status = 'COMPLETED', completed_at = NOW(), updated_at = NOW() \
             WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn mark_failed(&self, id: Uuid, error: &str) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE import_jobs \
             SET status = 'FAILED', error = $2, completed_at = NOW(), updated_at = NOW() \
             WHERE id = $1 AND status = 'RUNNING'",
        )
        .bind(id)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
