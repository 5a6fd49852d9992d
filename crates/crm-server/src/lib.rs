//! CRM Server Library
//!
//! HTTP service for bulk customer ingestion.
//!
//! # Overview
//!
//! The server streams multi-gigabyte delimited customer files from local
//! disk into Postgres while serving live progress to any number of
//! observers:
//!
//! - **Streaming ingest**: bounded buffering from any byte offset, so files
//!   never need to fit in memory
//! - **Single active job**: one durable `import_jobs` record per run,
//!   enforced in-process by the supervisor
//! - **Crash-safe resume**: a fingerprint marker re-aligns the stream to a
//!   row boundary inside a replay window, without re-inserting committed rows
//! - **Progress fan-out**: snapshot-on-connect plus a multicast event stream
//!   with heartbeats
//!
//! # Architecture
//!
//! Feature slices (`features::customers`, `features::sync`) own the HTTP
//! surface; the `import` module owns the pipeline (parser -> mapper ->
//! batch writer -> worker) and its control plane (job store, supervisor,
//! progress broker).
//!
//! ## Framework Stack
//!
//! - **Axum**: routing, extractors, SSE responses
//! - **SQLx**: Postgres pool, migrations, runtime queries
//! - **Tokio**: worker tasks, channels, broadcast fan-out

pub mod config;
pub mod db;
pub mod error;
pub mod features;
pub mod import;
pub mod middleware;
pub mod models;

pub use error::{AppError, AppResult};
