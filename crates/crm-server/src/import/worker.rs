//! Import worker: owns one job end to end.
//!
//! Reads the source file through the streaming parser, maps rows to
//! customers, commits batches through a [`CustomerSink`], and persists
//! throttled checkpoints through a [`JobCheckpoint`]. Exactly one batch
//! commit is in flight at a time; file reads overlap with database writes
//! through the parser's reader thread and bounded channel.
//!
//! On resume the stream re-opens inside an overlap window before the
//! persisted cursor and a [`ResumeGate`] swallows rows until it re-finds the
//! marker (the fingerprint of the last durably committed row), so replayed
//! rows are never counted or written twice.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use uuid::Uuid;

use super::batch::{BatchItem, BatchWriter, FlushOutcome};
use super::jobs::JobStore;
use super::mapper::{map_record, source_hash};
use super::parser::{spawn_reader, CsvStream, StreamItem};
use super::progress::{ProgressBroker, WorkerEvent};

/// Commits mapped customer batches. Seam between the worker and Postgres.
#[async_trait]
pub trait CustomerSink: Send + Sync {
    async fn flush(&self, items: Vec<BatchItem>) -> Result<FlushOutcome>;
}

#[async_trait]
impl CustomerSink for BatchWriter {
    async fn flush(&self, items: Vec<BatchItem>) -> Result<FlushOutcome> {
        BatchWriter::flush(self, items).await
    }
}

/// Durable checkpoint tuple; sufficient to resume the job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkpoint {
    pub bytes_read: i64,
    pub rows_processed: i64,
    pub rows_inserted: i64,
    pub last_row_hash: Option<String>,
}

/// Persists checkpoints and terminal transitions for one job.
#[async_trait]
pub trait JobCheckpoint: Send + Sync {
    async fn save(&self, checkpoint: &Checkpoint) -> Result<()>;
    async fn completed(&self) -> Result<()>;
    async fn failed(&self, error: &str) -> Result<()>;
}

/// [`JobCheckpoint`] backed by the `import_jobs` table.
#[derive(Debug, Clone)]
pub struct StoreCheckpoint {
    store: JobStore,
    job_id: Uuid,
}

impl StoreCheckpoint {
    pub fn new(store: JobStore, job_id: Uuid) -> Self {
        Self { store, job_id }
    }
}

#[async_trait]
impl JobCheckpoint for StoreCheckpoint {
    async fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        self.store
            .update_progress(
                self.job_id,
                checkpoint.bytes_read,
                checkpoint.rows_processed,
                checkpoint.rows_inserted,
                checkpoint.last_row_hash.as_deref(),
            )
            .await
            .context("Failed to persist progress checkpoint")
    }

    async fn completed(&self) -> Result<()> {
        self.store
            .mark_completed(self.job_id)
            .await
            .context("Failed to mark job completed")
    }

    async fn failed(&self, error: &str) -> Result<()> {
        self.store
            .mark_failed(self.job_id, error)
            .await
            .context("Failed to mark job failed")
    }
}

/// Cursor handed to a resumed worker.
#[derive(Debug, Clone, Default)]
pub struct ResumePoint {
    pub start_bytes: i64,
    pub overlap_bytes: u64,
    pub last_row_hash: Option<String>,
    pub rows_processed: i64,
    pub rows_inserted: i64,
}

/// Tunable worker parameters. Range validation happens at the HTTP
/// boundary; the worker only guards against degenerate values.
#[derive(Debug, Clone)]
pub struct WorkerParams {
    pub batch_size: usize,
    pub progress_every_ms: u64,
    pub total_rows: i64,
    pub high_water_mark: usize,
    pub resume: Option<ResumePoint>,
}

/// Swallows replayed rows until the resume marker is re-found.
///
/// The marker row itself is already committed, so it opens the gate without
/// being admitted; every row after it counts.
#[derive(Debug)]
pub struct ResumeGate {
    marker: Option<String>,
    open: bool,
}

impl ResumeGate {
    pub fn new(marker: Option<String>) -> Self {
        let open = marker.as_deref().map(str::is_empty).unwrap_or(true);
        Self { marker, open }
    }

    /// Whether this row contributes to counters, batching, and writes.
    pub fn admit(&mut self, hash: &str) -> bool {
        if self.open {
            return true;
        }
        if self.marker.as_deref() == Some(hash) {
            self.open = true;
        }
        false
    }

    pub fn is_open(&self) -> bool {
        self.open
    }
}

/// One import run.
pub struct ImportWorker<S, C> {
    job_id: Uuid,
    file_path: PathBuf,
    params: WorkerParams,
    sink: S,
    checkpoint: C,
    broker: ProgressBroker,
}

impl<S: CustomerSink, C: JobCheckpoint> ImportWorker<S, C> {
    pub fn new(
        job_id: Uuid,
        file_path: impl Into<PathBuf>,
        params: WorkerParams,
        sink: S,
        checkpoint: C,
        broker: ProgressBroker,
    ) -> Self {
        Self {
            job_id,
            file_path: file_path.into(),
            params,
            sink,
            checkpoint,
            broker,
        }
    }

    /// Run the import to its terminal state. Both outcomes are written
    /// durably and published live; a failed terminal write never suppresses
    /// the live event.
    pub async fn run(self) -> Result<()> {
        let job_id = self.job_id;

        match self.execute_guarded().await {
            Ok(()) => {
                info!(job_id = %job_id, "Import completed");
                Ok(())
            }
            Err(err) => {
                warn!(job_id = %job_id, error = %format!("{err:#}"), "Import failed");
                Err(err)
            }
        }
    }

    async fn execute_guarded(self) -> Result<()> {
        let job_id = self.job_id;
        let broker = self.broker.clone();

        match self.execute().await {
            Ok(checkpoint) => {
                if let Err(err) = checkpoint.completed().await {
                    // The job row stays RUNNING; boot reconciliation will
                    // resume it. Observers still get a terminal frame.
                    let message = format!("{err:#}");
                    broker.publish(WorkerEvent::Error {
                        job_id,
                        error: message,
                    });
                    return Err(err);
                }
                broker.publish(WorkerEvent::Done { job_id });
                Ok(())
            }
            Err((checkpoint, err)) => {
                let message = format!("{err:#}");
                if let Err(write_err) = checkpoint.failed(&message).await {
                    warn!(job_id = %job_id, error = %write_err, "Failed to persist FAILED status");
                }
                broker.publish(WorkerEvent::Error {
                    job_id,
                    error: message,
                });
                Err(err)
            }
        }
    }

    async fn execute(self) -> std::result::Result<C, (C, anyhow::Error)> {
        let Self {
            job_id,
            file_path,
            params,
            sink,
            checkpoint,
            broker,
        } = self;

        let mut run = ImportRun {
            job_id,
            file_path,
            params,
            sink,
            broker,
        };
        match run.execute(&checkpoint).await {
            Ok(()) => Ok(checkpoint),
            Err(err) => Err((checkpoint, err)),
        }
    }
}

/// Mutable state of one executing run, separated from the terminal-handling
/// wrapper above.
struct ImportRun<S> {
    job_id: Uuid,
    file_path: PathBuf,
    params: WorkerParams,
    sink: S,
    broker: ProgressBroker,
}

impl<S: CustomerSink> ImportRun<S> {
    async fn execute<C: JobCheckpoint>(&mut self, checkpoint: &C) -> Result<()> {
        let batch_size = self.params.batch_size.max(1);
        let progress_every = Duration::from_millis(self.params.progress_every_ms.max(1));

        let (stream_start, mut gate, baseline_rows, baseline_inserted, mut last_hash) =
            match &self.params.resume {
                Some(resume) => (
                    (resume.start_bytes as u64).saturating_sub(resume.overlap_bytes),
                    ResumeGate::new(resume.last_row_hash.clone()),
                    resume.rows_processed,
                    resume.rows_inserted,
                    resume.last_row_hash.clone(),
                ),
                None => (0, ResumeGate::new(None), 0, 0, None),
            };

        let headers = if stream_start > 0 {
            // Column names are stable for a job; re-read them from line one.
            Some(CsvStream::read_headers(
                &self.file_path,
                self.params.high_water_mark,
            )?)
        } else {
            None
        };

        let stream = CsvStream::open(
            &self.file_path,
            stream_start,
            self.params.high_water_mark,
            headers,
        )?;
        let mut rows = spawn_reader(stream);

        info!(
            job_id = %self.job_id,
            file = %self.file_path.display(),
            stream_start,
            resumed = self.params.resume.is_some(),
            "Import worker started"
        );

        let started_at = Utc::now();
        let mut rows_processed = baseline_rows;
        let mut rows_inserted = baseline_inserted;
        let mut bytes_read = self
            .params
            .resume
            .as_ref()
            .map(|r| r.start_bytes)
            .unwrap_or(0);
        let mut pending: Vec<BatchItem> = Vec::with_capacity(batch_size);
        let mut last_persist: Option<Instant> = None;

        while let Some(next) = rows.recv().await {
            let row = match next.context("CSV stream failed")? {
                StreamItem::Row(row) => row,
                StreamItem::Eof { offset } => {
                    bytes_read = bytes_read.max(offset as i64);
                    break;
                }
            };

            // The cursor is monotonic and covers skipped rows too; replayed
            // offsets during resume never move it backwards.
            bytes_read = bytes_read.max(row.offset as i64);

            // Rows without a usable identifier are skipped silently; they
            // are not counted as processed.
            let Some(customer) = map_record(&row.fields) else {
                continue;
            };
            let hash = source_hash(&customer);

            if !gate.admit(&hash) {
                continue;
            }

            rows_processed += 1;
            pending.push(BatchItem {
                customer,
                source_hash: hash,
            });

            if pending.len() >= batch_size {
                let outcome = self
                    .sink
                    .flush(std::mem::take(&mut pending))
                    .await
                    .context("Batch flush failed")?;
                rows_inserted += outcome.affected;
                if outcome.last_hash.is_some() {
                    last_hash = outcome.last_hash;
                }

                let admitted = last_persist
                    .map(|at| at.elapsed() >= progress_every)
                    .unwrap_or(true);
                if admitted {
                    last_persist = Some(Instant::now());
                    self.persist_and_publish(
                        checkpoint,
                        bytes_read,
                        rows_processed,
                        rows_inserted,
                        last_hash.clone(),
                        baseline_rows,
                        started_at,
                    )
                    .await?;
                }
            }
        }

        if self.params.resume.is_some() && !gate.is_open() {
            return Err(anyhow!(
                "resume marker not found within the replay window; refusing to re-import"
            ));
        }

        // Final flush and a forced progress write.
        if !pending.is_empty() {
            let outcome = self
                .sink
                .flush(std::mem::take(&mut pending))
                .await
                .context("Final batch flush failed")?;
            rows_inserted += outcome.affected;
            if outcome.last_hash.is_some() {
                last_hash = outcome.last_hash;
            }
        }

        self.persist_and_publish(
            checkpoint,
            bytes_read,
            rows_processed,
            rows_inserted,
            last_hash,
            baseline_rows,
            started_at,
        )
        .await?;

        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn persist_and_publish<C: JobCheckpoint>(
        &self,
        checkpoint: &C,
        bytes_read: i64,
        rows_processed: i64,
        rows_inserted: i64,
        last_row_hash: Option<String>,
        baseline_rows: i64,
        started_at: DateTime<Utc>,
    ) -> Result<()> {
        checkpoint
            .save(&Checkpoint {
                bytes_read,
                rows_processed,
                rows_inserted,
                last_row_hash: last_row_hash.clone(),
            })
            .await?;

        let elapsed_sec = (Utc::now() - started_at).num_seconds().max(0);
        let rate = (rows_processed - baseline_rows) as f64 / elapsed_sec.max(1) as f64;

        self.broker.publish(WorkerEvent::Progress {
            job_id: self.job_id,
            rows_processed,
            rows_inserted,
            bytes_read,
            rate,
            elapsed_sec,
            last_row_hash,
        });

        Ok(())
    }
}
