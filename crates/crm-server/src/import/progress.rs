//! Progress broker: snapshots of the latest job and live event fan-out.
//!
//! One producer (the worker, bridged by the supervisor) multicasts to any
//! number of observers over a broadcast channel. Slow observers never block
//! the producer; a lagged observer loses intermediate `progress` frames
//! (the next frame carries absolute state) but never a terminal frame,
//! which is kept in a sticky slot until the next run starts.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;
use uuid::Uuid;

use super::jobs::{ImportJob, JobStatus, JobStore};
use crate::models::{CustomerRecord, CUSTOMER_COLUMNS};

/// Events buffered per subscriber before old `progress` frames drop.
const BROKER_CAPACITY: usize = 256;

/// Bounds for the recent-customers limit on snapshots.
pub const RECENT_LIMIT_MIN: i64 = 1;
pub const RECENT_LIMIT_MAX: i64 = 200;

/// Live event published by the import worker.
///
/// Counters are string-encoded; see [`ImportJob`](super::jobs::ImportJob).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WorkerEvent {
    #[serde(rename_all = "camelCase")]
    Progress {
        job_id: Uuid,
        #[serde(serialize_with = "super::serialize_i64_string")]
        rows_processed: i64,
        #[serde(serialize_with = "super::serialize_i64_string")]
        rows_inserted: i64,
        #[serde(serialize_with = "super::serialize_i64_string")]
        bytes_read: i64,
        rate: f64,
        elapsed_sec: i64,
        #[serde(skip_serializing_if = "Option::is_none")]
        last_row_hash: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Done { job_id: Uuid },
    #[serde(rename_all = "camelCase")]
    Error { job_id: Uuid, error: String },
    Heartbeat { ts: String },
}

impl WorkerEvent {
    pub fn heartbeat() -> Self {
        WorkerEvent::Heartbeat {
            ts: Utc::now().to_rfc3339(),
        }
    }

    /// done / error end a run; observers must not miss them.
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkerEvent::Done { .. } | WorkerEvent::Error { .. })
    }
}

/// Multi-producer multi-consumer publisher for worker events.
#[derive(Debug, Clone)]
pub struct ProgressBroker {
    tx: broadcast::Sender<WorkerEvent>,
    last_terminal: Arc<RwLock<Option<WorkerEvent>>>,
}

impl Default for ProgressBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressBroker {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BROKER_CAPACITY);
        Self {
            tx,
            last_terminal: Arc::new(RwLock::new(None)),
        }
    }

    /// Publish an event to all current subscribers. Terminal events are
    /// additionally pinned so late or lagged observers can recover them.
    pub fn publish(&self, event: WorkerEvent) {
        if event.is_terminal() {
            *self.last_terminal.write().expect("terminal slot poisoned") = Some(event.clone());
        }
        // No subscribers is fine; the snapshot endpoint still reflects state.
        let _ = self.tx.send(event);
    }

    /// Clear the sticky terminal frame when a new run begins.
    pub fn begin_run(&self) {
        *self.last_terminal.write().expect("terminal slot poisoned") = None;
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WorkerEvent> {
        self.tx.subscribe()
    }

    /// Terminal frame of the most recently finished run, if no newer run
    /// has started.
    pub fn sticky_terminal(&self) -> Option<WorkerEvent> {
        self.last_terminal
            .read()
            .expect("terminal slot poisoned")
            .clone()
    }
}

/// Derived, never-stored view of the latest import job.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSnapshot {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<Uuid>,
    pub status: String,
    #[serde(serialize_with = "super::serialize_i64_string")]
    pub rows_processed: i64,
    #[serde(serialize_with = "super::serialize_i64_string")]
    pub rows_inserted: i64,
    #[serde(serialize_with = "super::serialize_i64_string")]
    pub bytes_read: i64,
    pub percent: f64,
    pub rate_rows_per_sec: f64,
    pub elapsed_sec: i64,
    pub eta_sec: Option<i64>,
    pub started_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub disable_sync: bool,
    pub recent_customers: Vec<CustomerRecord>,
}

impl ProgressSnapshot {
    /// Synthetic snapshot when no job has ever run.
    pub fn idle() -> Self {
        Self {
            job_id: None,
            status: JobStatus::Idle.as_str().to_string(),
            rows_processed: 0,
            rows_inserted: 0,
            bytes_read: 0,
            percent: 0.0,
            rate_rows_per_sec: 0.0,
            elapsed_sec: 0,
            eta_sec: None,
            started_at: None,
            updated_at: None,
            completed_at: None,
            error: None,
            disable_sync: false,
            recent_customers: Vec::new(),
        }
    }
}

/// Parameters for building a snapshot.
#[derive(Debug, Clone, Copy)]
pub struct SnapshotParams {
    pub total_rows: i64,
    pub recent_limit: i64,
}

/// Derived rate/percent/ETA figures, split out so they stay a pure function
/// of the job row plus the clock.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Derived {
    pub percent: f64,
    pub rate_rows_per_sec: f64,
    pub elapsed_sec: i64,
    pub eta_sec: Option<i64>,
}

pub fn derive_progress(
    rows_processed: i64,
    total_rows: i64,
    started_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Derived {
    let total = total_rows.max(1);
    let percent = (rows_processed as f64 / total as f64 * 100.0).clamp(0.0, 100.0);

    let elapsed_sec = (now - started_at).num_seconds().max(0);
    let rate_rows_per_sec = if elapsed_sec > 0 {
        rows_processed as f64 / elapsed_sec as f64
    } else {
        0.0
    };

    let eta_sec = if rate_rows_per_sec > 0.0 {
        let remaining = (total - rows_processed).max(0) as f64;
        Some((remaining / rate_rows_per_sec).ceil() as i64)
    } else {
        None
    };

    Derived {
        percent,
        rate_rows_per_sec,
        elapsed_sec,
        eta_sec,
    }
}

/// Build the snapshot for the most recent job (preferring a RUNNING one),
/// attaching up to `recent_limit` customers touched since the job started.
pub async fn snapshot(
    pool: &PgPool,
    store: &JobStore,
    params: SnapshotParams,
) -> Result<ProgressSnapshot, sqlx::Error> {
    let Some(job) = store.find_latest().await? else {
        return Ok(ProgressSnapshot::idle());
    };

    Ok(snapshot_for_job(pool, &job, params, Utc::now()).await?)
}

pub(crate) async fn snapshot_for_job(
    pool: &PgPool,
    job: &ImportJob,
    params: SnapshotParams,
    now: DateTime<Utc>,
) -> Result<ProgressSnapshot, sqlx::Error> {
    let derived = derive_progress(job.rows_processed, params.total_rows, job.started_at, now);
    let status = job.status();

    let recent_customers = if matches!(status, JobStatus::Running | JobStatus::Completed) {
        let limit = params
            .recent_limit
            .clamp(RECENT_LIMIT_MIN, RECENT_LIMIT_MAX);
        let sql = format!(
            "SELECT {CUSTOMER_COLUMNS} FROM customers \
             WHERE updated_at >= $1 ORDER BY updated_at DESC LIMIT $2"
        );
        sqlx::query_as::<_, CustomerRecord>(&sql)
            .bind(job.started_at)
            .bind(limit)
            .fetch_all(pool)
            .await?
    } else {
        Vec::new()
    };

    Ok(ProgressSnapshot {
        job_id: Some(job.id),
        status: job.status.clone(),
        rows_processed: job.rows_processed,
        rows_inserted: job.rows_inserted,
        bytes_read: job.bytes_read,
        percent: derived.percent,
        rate_rows_per_sec: derived.rate_rows_per_sec,
        elapsed_sec: derived.elapsed_sec,
        eta_sec: derived.eta_sec,
        started_at: Some(job.started_at),
        updated_at: Some(job.updated_at),
        completed_at: job.completed_at,
        error: job.error.clone(),
        disable_sync: status == JobStatus::Running,
        recent_customers,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_derive_progress_midway() {
        let started = Utc::now();
        let now = started + Duration::seconds(10);
        let derived = derive_progress(500, 1_000, started, now);

        assert!((derived.percent - 50.0).abs() < f64::EPSILON);
        assert!((derived.rate_rows_per_sec - 50.0).abs() < f64::EPSILON);
        assert_eq!(derived.elapsed_sec, 10);
        assert_eq!(derived.eta_sec, Some(10));
    }

    #[test]
    fn test_derive_progress_zero_elapsed() {
        let now = Utc::now();
        let derived = derive_progress(100, 1_000, now, now);
        assert_eq!(derived.rate_rows_per_sec, 0.0);
        assert_eq!(derived.eta_sec, None);
    }

    #[test]
    fn test_derive_progress_percent_clamps_at_100() {
        let started = Utc::now();
        let now = started + Duration::seconds(5);
        let derived = derive_progress(2_000, 1_000, started, now);
        assert_eq!(derived.percent, 100.0);
        assert_eq!(derived.eta_sec, Some(0));
    }

    #[test]
    fn test_heartbeat_serialization() {
        let value = serde_json::to_value(WorkerEvent::heartbeat()).unwrap();
        assert_eq!(value["type"], "heartbeat");
        assert!(value["ts"].as_str().unwrap().contains('T'));
    }

    #[test]
    fn test_progress_event_serialization() {
        let event = WorkerEvent::Progress {
            job_id: Uuid::nil(),
            rows_processed: 9_007_199_254_740_993,
            rows_inserted: 12,
            bytes_read: 4_096,
            rate: 1_234.5,
            elapsed_sec: 7,
            last_row_hash: Some("abc".to_string()),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "progress");
        assert_eq!(value["rowsProcessed"], "9007199254740993");
        assert_eq!(value["bytesRead"], "4096");
        assert_eq!(value["lastRowHash"], "abc");
    }

    #[test]
    fn test_terminal_detection() {
        assert!(WorkerEvent::Done { job_id: Uuid::nil() }.is_terminal());
        assert!(WorkerEvent::Error {
            job_id: Uuid::nil(),
            error: "boom".to_string()
        }
        .is_terminal());
        assert!(!WorkerEvent::heartbeat().is_terminal());
    }

    #[tokio::test]
    async fn test_broker_fans_out_to_every_subscriber() {
        let broker = ProgressBroker::new();
        let mut a = broker.subscribe();
        let mut b = broker.subscribe();

        broker.publish(WorkerEvent::Done { job_id: Uuid::nil() });

        assert!(a.recv().await.unwrap().is_terminal());
        assert!(b.recv().await.unwrap().is_terminal());
    }

    #[tokio::test]
    async fn test_broker_pins_terminal_frames() {
        let broker = ProgressBroker::new();
        broker.publish(WorkerEvent::Error {
            job_id: Uuid::nil(),
            error: "disk vanished".to_string(),
        });

        assert!(broker.sticky_terminal().is_some());
        broker.begin_run();
        assert!(broker.sticky_terminal().is_none());
    }

    #[test]
    fn test_idle_snapshot_shape() {
        let snapshot = ProgressSnapshot::idle();
        let value = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(value["status"], "IDLE");
        assert_eq!(value["rowsProcessed"], "0");
        assert_eq!(value["disableSync"], false);
        assert!(value.get("jobId").is_none());
    }
}
