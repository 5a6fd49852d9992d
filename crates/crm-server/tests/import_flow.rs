//! End-to-end worker scenarios over real files, with the database behind
//! in-memory seams: a fresh import, in-batch duplicates, identifier-less
//! rows, and a crash-and-resume cycle that must not duplicate work.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::NamedTempFile;
use uuid::Uuid;

use crm_server::import::batch::{dedup_last_wins, BatchItem, FlushOutcome};
use crm_server::import::mapper::Customer;
use crm_server::import::progress::{ProgressBroker, WorkerEvent};
use crm_server::import::worker::{
    Checkpoint, CustomerSink, ImportWorker, JobCheckpoint, ResumePoint, WorkerParams,
};

const HIGH_WATER_MARK: usize = 64 * 1024;

/// In-memory stand-in for the customers table. Mirrors the batch writer's
/// contract: last-wins dedup, then upsert; affected counts inserts plus
/// updates.
#[derive(Clone, Default)]
struct MemorySink {
    customers: Arc<Mutex<BTreeMap<String, Customer>>>,
    flush_sizes: Arc<Mutex<Vec<usize>>>,
    fail_on_flush: Arc<AtomicUsize>,
    flushes: Arc<AtomicUsize>,
}

impl MemorySink {
    fn new() -> Self {
        Self {
            fail_on_flush: Arc::new(AtomicUsize::new(usize::MAX)),
            ..Default::default()
        }
    }

    /// Make the Nth flush (1-based) fail, simulating a crash mid-import.
    fn fail_on(self, n: usize) -> Self {
        self.fail_on_flush.store(n, Ordering::SeqCst);
        self
    }

    fn rows(&self) -> BTreeMap<String, Customer> {
        self.customers.lock().unwrap().clone()
    }

    fn flush_sizes(&self) -> Vec<usize> {
        self.flush_sizes.lock().unwrap().clone()
    }
}

#[async_trait]
impl CustomerSink for MemorySink {
    async fn flush(&self, items: Vec<BatchItem>) -> Result<FlushOutcome> {
        let n = self.flushes.fetch_add(1, Ordering::SeqCst) + 1;
        if n >= self.fail_on_flush.load(Ordering::SeqCst) {
            return Err(anyhow!("simulated storage failure"));
        }

        // Writes must settle slower than the progress throttle so every
        // flush is allowed to checkpoint.
        tokio::time::sleep(std::time::Duration::from_millis(3)).await;

        let deduped = dedup_last_wins(items);
        self.flush_sizes.lock().unwrap().push(deduped.len());
        let last_hash = deduped.last().map(|item| item.source_hash.clone());

        let mut customers = self.customers.lock().unwrap();
        let affected = deduped.len() as i64;
        for item in deduped {
            customers.insert(item.customer.customer_id.clone(), item.customer);
        }

        Ok(FlushOutcome {
            affected,
            last_hash,
        })
    }
}

/// In-memory stand-in for the import_jobs row.
#[derive(Clone, Default)]
struct MemoryCheckpoint {
    saved: Arc<Mutex<Vec<Checkpoint>>>,
    completed: Arc<AtomicBool>,
    failed: Arc<Mutex<Option<String>>>,
}

impl MemoryCheckpoint {
    fn last(&self) -> Option<Checkpoint> {
        self.saved.lock().unwrap().last().cloned()
    }

    fn is_completed(&self) -> bool {
        self.completed.load(Ordering::SeqCst)
    }

    fn failure(&self) -> Option<String> {
        self.failed.lock().unwrap().clone()
    }
}

#[async_trait]
impl JobCheckpoint for MemoryCheckpoint {
    async fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        self.saved.lock().unwrap().push(checkpoint.clone());
        Ok(())
    }

    async fn completed(&self) -> Result<()> {
        self.completed.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn failed(&self, error: &str) -> Result<()> {
        *self.failed.lock().unwrap() = Some(error.to_string());
        Ok(())
    }
}

fn write_csv(rows: &[&str]) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "Customer Id,First Name,Email").unwrap();
    for row in rows {
        writeln!(file, "{row}").unwrap();
    }
    file.flush().unwrap();
    file
}

fn ten_rows() -> Vec<String> {
    let names = [
        "Alice", "Bob", "Carol", "Dave", "Erin", "Frank", "Grace", "Heidi", "Ivan", "Jane",
    ];
    names
        .iter()
        .enumerate()
        .map(|(i, name)| format!("C{:03},{},{}@x", i + 1, name, name.to_lowercase()))
        .collect()
}

fn params(batch_size: usize, resume: Option<ResumePoint>) -> WorkerParams {
    WorkerParams {
        batch_size,
        progress_every_ms: 1,
        total_rows: 10,
        high_water_mark: HIGH_WATER_MARK,
        resume,
    }
}

async fn run_worker(
    file: &NamedTempFile,
    sink: MemorySink,
    checkpoint: MemoryCheckpoint,
    broker: ProgressBroker,
    worker_params: WorkerParams,
) -> Result<()> {
    ImportWorker::new(
        Uuid::new_v4(),
        file.path(),
        worker_params,
        sink,
        checkpoint,
        broker,
    )
    .run()
    .await
}

#[tokio::test]
async fn fresh_import_commits_in_batches_and_completes() {
    let rows = ten_rows();
    let file = write_csv(&rows.iter().map(String::as_str).collect::<Vec<_>>());
    let sink = MemorySink::new();
    let checkpoint = MemoryCheckpoint::default();
    let broker = ProgressBroker::new();
    let mut events = broker.subscribe();

    run_worker(&file, sink.clone(), checkpoint.clone(), broker, params(4, None))
        .await
        .unwrap();

    assert_eq!(sink.flush_sizes(), vec![4, 4, 2]);
    assert_eq!(sink.rows().len(), 10);
    assert!(checkpoint.is_completed());
    assert!(checkpoint.failure().is_none());

    let last = checkpoint.last().unwrap();
    assert_eq!(last.rows_processed, 10);
    assert_eq!(last.rows_inserted, 10);
    assert_eq!(last.bytes_read, file.as_file().metadata().unwrap().len() as i64);
    assert!(last.last_row_hash.is_some());

    // Observer contract: progress frames then exactly one done, in order.
    let mut saw_progress = 0;
    let mut saw_done = 0;
    while let Ok(event) = events.try_recv() {
        match event {
            WorkerEvent::Progress { .. } => {
                assert_eq!(saw_done, 0, "progress after done");
                saw_progress += 1;
            }
            WorkerEvent::Done { .. } => saw_done += 1,
            other => panic!("unexpected event: {other:?}"),
        }
    }
    assert!(saw_progress >= 1);
    assert_eq!(saw_done, 1);
}

#[tokio::test]
async fn duplicate_customer_id_within_batch_keeps_last() {
    let file = write_csv(&["C001,Alice,alice@x", "C001,Alicia,alicia@x"]);
    let sink = MemorySink::new();
    let checkpoint = MemoryCheckpoint::default();

    run_worker(
        &file,
        sink.clone(),
        checkpoint.clone(),
        ProgressBroker::new(),
        params(4, None),
    )
    .await
    .unwrap();

    let rows = sink.rows();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows["C001"].first_name.as_deref(), Some("Alicia"));

    let last = checkpoint.last().unwrap();
    assert_eq!(last.rows_processed, 2);
    assert_eq!(last.rows_inserted, 1);
}

#[tokio::test]
async fn rows_without_identifier_are_skipped_not_counted() {
    let file = write_csv(&[
        "C001,Alice,alice@x",
        "C002,Bob,bob@x",
        ",NoId,", // neither customer id nor email
        "C003,Carol,carol@x",
        "C004,Dave,dave@x",
        "C005,Erin,erin@x",
    ]);
    let sink = MemorySink::new();
    let checkpoint = MemoryCheckpoint::default();

    run_worker(
        &file,
        sink.clone(),
        checkpoint.clone(),
        ProgressBroker::new(),
        params(100, None),
    )
    .await
    .unwrap();

    assert_eq!(sink.rows().len(), 5);
    assert!(checkpoint.is_completed());

    let last = checkpoint.last().unwrap();
    assert_eq!(last.rows_processed, 5);
    assert_eq!(last.rows_inserted, 5);
}

#[tokio::test]
async fn resume_after_crash_matches_uninterrupted_run() {
    let rows = ten_rows();
    let row_strs: Vec<&str> = rows.iter().map(String::as_str).collect();

    // Reference: an uninterrupted run.
    let reference_file = write_csv(&row_strs);
    let reference_sink = MemorySink::new();
    run_worker(
        &reference_file,
        reference_sink.clone(),
        MemoryCheckpoint::default(),
        ProgressBroker::new(),
        params(3, None),
    )
    .await
    .unwrap();

    // Crash run: the third commit fails, leaving two committed batches and
    // a checkpoint pointing at row six.
    let file = write_csv(&row_strs);
    let sink = MemorySink::new().fail_on(3);
    let checkpoint = MemoryCheckpoint::default();
    let result = run_worker(
        &file,
        sink.clone(),
        checkpoint.clone(),
        ProgressBroker::new(),
        params(3, None),
    )
    .await;

    assert!(result.is_err());
    assert!(checkpoint.failure().is_some());
    assert!(!checkpoint.is_completed());
    assert_eq!(sink.rows().len(), 6);

    let saved = checkpoint.last().expect("a checkpoint was persisted");
    assert_eq!(saved.rows_processed, 6);
    assert!(saved.last_row_hash.is_some());

    // Restart against the same (in-memory) customer state, replaying a
    // window far larger than the file.
    let resume = ResumePoint {
        start_bytes: saved.bytes_read,
        overlap_bytes: 1_048_576,
        last_row_hash: saved.last_row_hash.clone(),
        rows_processed: saved.rows_processed,
        rows_inserted: saved.rows_inserted,
    };
    let resumed_sink = MemorySink {
        customers: sink.customers.clone(),
        ..MemorySink::new()
    };
    let resumed_checkpoint = MemoryCheckpoint::default();

    run_worker(
        &file,
        resumed_sink.clone(),
        resumed_checkpoint.clone(),
        ProgressBroker::new(),
        params(3, Some(resume)),
    )
    .await
    .unwrap();

    // Byte-equivalent final state, exact counters, cursor at end of file.
    let final_rows = resumed_sink.rows();
    let reference_rows = reference_sink.rows();
    assert_eq!(final_rows.len(), 10);
    assert_eq!(final_rows, reference_rows);

    let last = resumed_checkpoint.last().unwrap();
    assert_eq!(last.rows_processed, 10);
    assert_eq!(last.rows_inserted, 10);
    assert_eq!(last.bytes_read, file.as_file().metadata().unwrap().len() as i64);
    assert!(resumed_checkpoint.is_completed());

    // The marker row was not re-admitted: only rows 7..10 were flushed.
    let replayed: usize = resumed_sink.flush_sizes().iter().sum();
    assert_eq!(replayed, 4);
}

#[tokio::test]
async fn resume_with_marker_missing_from_file_fails_the_job() {
    let file = write_csv(&["C001,Alice,alice@x", "C002,Bob,bob@x"]);
    let checkpoint = MemoryCheckpoint::default();
    let resume = ResumePoint {
        start_bytes: 10,
        overlap_bytes: 1_048_576,
        last_row_hash: Some("not-a-real-fingerprint".to_string()),
        rows_processed: 5,
        rows_inserted: 5,
    };

    let result = run_worker(
        &file,
        MemorySink::new(),
        checkpoint.clone(),
        ProgressBroker::new(),
        params(3, Some(resume)),
    )
    .await;

    assert!(result.is_err());
    let failure = checkpoint.failure().unwrap();
    assert!(failure.contains("marker"), "unexpected failure: {failure}");
}

#[tokio::test]
async fn parse_failure_emits_error_event_and_fails_job() {
    let file = write_csv(&["C001,Alice,alice@x"]);
    let path = file.path().to_path_buf();
    drop(file); // the file vanishes before the worker opens it

    let checkpoint = MemoryCheckpoint::default();
    let broker = ProgressBroker::new();
    let mut events = broker.subscribe();

    let result = ImportWorker::new(
        Uuid::new_v4(),
        path,
        params(4, None),
        MemorySink::new(),
        checkpoint.clone(),
        broker,
    )
    .run()
    .await;

    assert!(result.is_err());
    assert!(checkpoint.failure().is_some());
    match events.try_recv() {
        Ok(WorkerEvent::Error { error, .. }) => assert!(!error.is_empty()),
        other => panic!("expected error event, got {other:?}"),
    }
}
