//! Import surface: start/resume a sync, snapshot progress, live stream.

pub mod commands;
pub mod routes;

pub use routes::{sync_routes, SyncState};
