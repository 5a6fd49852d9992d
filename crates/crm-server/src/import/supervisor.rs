//! Worker supervisor: exactly one active import per process.
//!
//! Holds the only mutable handle to the running worker behind a mutex and
//! walks a small lifecycle: Idle -> Spawning -> Running -> Draining -> Idle.
//! The supervisor writes job state only after the worker is gone (crash,
//! abort, or exit), so the two writers of a job row never race.

use sqlx::PgPool;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::AbortHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::batch::BatchWriter;
use super::jobs::{ImportJob, JobStore};
use super::progress::{ProgressBroker, WorkerEvent};
use super::worker::{ImportWorker, ResumePoint, StoreCheckpoint, WorkerParams};
use crate::config::ImportConfig;

/// Supervisor lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Idle,
    Spawning,
    Running,
    Draining,
}

/// Resolved knobs for one run; range validation happens at the HTTP layer.
#[derive(Debug, Clone)]
pub struct StartOptions {
    pub file_path: Option<String>,
    pub batch_size: usize,
    pub progress_every_ms: u64,
    pub total_rows: i64,
}

#[derive(Debug, Error)]
pub enum StartError {
    #[error("{0}")]
    Validation(String),

    #[error("An import is already running")]
    Conflict { job: Option<Box<ImportJob>> },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

struct ActiveWorker {
    job_id: Uuid,
    abort: AbortHandle,
}

struct Inner {
    state: SupervisorState,
    active: Option<ActiveWorker>,
}

/// Singleton owner of the import worker lifecycle.
pub struct ImportSupervisor {
    pool: PgPool,
    store: JobStore,
    broker: ProgressBroker,
    config: ImportConfig,
    inner: Mutex<Inner>,
}

impl ImportSupervisor {
    pub fn new(pool: PgPool, broker: ProgressBroker, config: ImportConfig) -> Arc<Self> {
        Arc::new(Self {
            store: JobStore::new(pool.clone()),
            pool,
            broker,
            config,
            inner: Mutex::new(Inner {
                state: SupervisorState::Idle,
                active: None,
            }),
        })
    }

    pub fn store(&self) -> &JobStore {
        &self.store
    }

    pub async fn state(&self) -> SupervisorState {
        self.inner.lock().await.state
    }

    /// Start (or resume) an import.
    ///
    /// Pre-checks, in order: the source path must exist and be a regular
    /// file; a live worker in this process rejects the request as a
    /// conflict; a RUNNING job row with no live worker (crash before
    /// restart, or restart raced the boot reconciliation) resumes in place
    /// under its original id and file.
    pub async fn start(self: &Arc<Self>, options: StartOptions) -> Result<ImportJob, StartError> {
        let path = options
            .file_path
            .clone()
            .unwrap_or_else(|| self.config.csv_path.clone());
        validate_source_path(&path)?;

        let mut inner = self.inner.lock().await;

        if inner.state != SupervisorState::Idle {
            let job = match self.store.find_latest_running().await? {
                Some(job) => Some(job),
                None => match inner.active.as_ref() {
                    Some(active) => self.store.find_by_id(active.job_id).await?,
                    None => None,
                },
            };
            return Err(StartError::Conflict {
                job: job.map(Box::new),
            });
        }

        let (job, resume) = match self.store.find_latest_running().await? {
            // A RUNNING record with no live worker: the previous process
            // died. Resume the same job from its persisted cursor, against
            // the file it was created with.
            Some(job) => {
                let resume = resume_point(&job, self.config.resume_overlap);
                (job, Some(resume))
            }
            None => (self.store.create(&path).await?, None),
        };

        self.spawn_worker(&mut inner, &job, &options, resume);
        Ok(job)
    }

    /// Boot-time reconciliation: pick up a RUNNING job left behind by a
    /// crash and resume it without operator intervention.
    pub async fn resume_on_boot(self: &Arc<Self>) -> Result<(), sqlx::Error> {
        let Some(job) = self.store.find_latest_running().await? else {
            return Ok(());
        };

        info!(
            job_id = %job.id,
            bytes_read = job.bytes_read,
            rows_processed = job.rows_processed,
            "Found interrupted import at boot, resuming"
        );

        let options = StartOptions {
            file_path: None,
            batch_size: self.config.batch_size,
            progress_every_ms: self.config.progress_every_ms,
            total_rows: self.config.total_rows,
        };
        let resume = resume_point(&job, self.config.resume_overlap);

        let mut inner = self.inner.lock().await;
        if inner.state == SupervisorState::Idle {
            self.spawn_worker(&mut inner, &job, &options, Some(resume));
        }
        Ok(())
    }

    fn spawn_worker(
        self: &Arc<Self>,
        inner: &mut Inner,
        job: &ImportJob,
        options: &StartOptions,
        resume: Option<ResumePoint>,
    ) {
        inner.state = SupervisorState::Spawning;
        self.broker.begin_run();

        let params = WorkerParams {
            batch_size: options.batch_size,
            progress_every_ms: options.progress_every_ms,
            total_rows: options.total_rows,
            high_water_mark: self.config.high_water_mark,
            resume,
        };

        let worker = ImportWorker::new(
            job.id,
            job.file_path.clone(),
            params,
            BatchWriter::new(self.pool.clone()),
            StoreCheckpoint::new(self.store.clone(), job.id),
            self.broker.clone(),
        );

        let handle = tokio::spawn(worker.run());
        inner.active = Some(ActiveWorker {
            job_id: job.id,
            abort: handle.abort_handle(),
        });
        inner.state = SupervisorState::Running;

        // Observe the worker from a detached task: the worker writes its own
        // terminal state; the supervisor covers panics and releases the slot.
        let supervisor = Arc::clone(self);
        let job_id = job.id;
        tokio::spawn(async move {
            let outcome = handle.await;
            {
                let mut inner = supervisor.inner.lock().await;
                inner.state = SupervisorState::Draining;
            }

            match outcome {
                // Terminal transition already durably written and published.
                Ok(_) => {}
                Err(join_err) if join_err.is_cancelled() => {
                    // Shutdown path; the aborter wrote the terminal state.
                }
                Err(join_err) => {
                    let message = format!("worker exited unexpectedly: {join_err}");
                    error!(job_id = %job_id, error = %message, "Import worker died");
                    if let Err(db_err) = supervisor.store.mark_failed(job_id, &message).await {
                        error!(job_id = %job_id, error = %db_err, "Failed to record worker death");
                    }
                    supervisor.broker.publish(WorkerEvent::Error {
                        job_id,
                        error: message,
                    });
                }
            }

            let mut inner = supervisor.inner.lock().await;
            inner.active = None;
            inner.state = SupervisorState::Idle;
        });
    }

    /// Terminate the active worker (hard stop) and fail its job. Used on
    /// graceful server shutdown.
    pub async fn shutdown(&self) {
        let active = {
            let mut inner = self.inner.lock().await;
            match inner.active.take() {
                Some(active) => {
                    inner.state = SupervisorState::Draining;
                    active
                }
                None => return,
            }
        };

        info!(job_id = %active.job_id, "Stopping import worker for shutdown");
        active.abort.abort();

        if let Err(err) = self
            .store
            .mark_failed(active.job_id, "application shutdown")
            .await
        {
            warn!(job_id = %active.job_id, error = %err, "Failed to fail job during shutdown");
        }
        self.broker.publish(WorkerEvent::Error {
            job_id: active.job_id,
            error: "application shutdown".to_string(),
        });

        let mut inner = self.inner.lock().await;
        inner.active = None;
        inner.state = SupervisorState::Idle;
    }
}

fn resume_point(job: &ImportJob, overlap_bytes: u64) -> ResumePoint {
    ResumePoint {
        start_bytes: job.bytes_read,
        overlap_bytes,
        last_row_hash: job.last_row_hash.clone(),
        rows_processed: job.rows_processed,
        rows_inserted: job.rows_inserted,
    }
}

fn validate_source_path(path: &str) -> Result<(), StartError> {
    let meta = std::fs::metadata(path).map_err(|_| {
        StartError::Validation(format!("filePath does not exist: {path}"))
    })?;
    if !meta.is_file() {
        return Err(StartError::Validation(format!(
            "filePath is not a regular file: {path}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_source_path_rejects_missing_file() {
        let err = validate_source_path("/definitely/not/here.csv").unwrap_err();
        assert!(matches!(err, StartError::Validation(_)));
    }

    #[test]
    fn test_validate_source_path_rejects_directory() {
        let dir = tempfile::tempdir().unwrap();
        let err = validate_source_path(dir.path().to_str().unwrap()).unwrap_err();
        assert!(matches!(err, StartError::Validation(_)));
    }

    #[test]
    fn test_validate_source_path_accepts_regular_file() {
        let file = tempfile::NamedTempFile::new().unwrap();
        assert!(validate_source_path(file.path().to_str().unwrap()).is_ok());
    }

    #[test]
    fn test_resume_point_mirrors_checkpoint() {
        let job = ImportJob {
            id: Uuid::new_v4(),
            file_path: "/data/customers.csv".to_string(),
            status: "RUNNING".to_string(),
            bytes_read: 2_048,
            rows_processed: 17,
            rows_inserted: 15,
            last_row_hash: Some("abc".to_string()),
            error: None,
            started_at: chrono::Utc::now(),
            completed_at: None,
            updated_at: chrono::Utc::now(),
        };
        let resume = resume_point(&job, 1_048_576);
        assert_eq!(resume.start_bytes, 2_048);
        assert_eq!(resume.overlap_bytes, 1_048_576);
        assert_eq!(resume.last_row_hash.as_deref(), Some("abc"));
        assert_eq!(resume.rows_processed, 17);
        assert_eq!(resume.rows_inserted, 15);
    }
}
