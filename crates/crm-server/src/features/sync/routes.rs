//! Sync routes: start an import, read a progress snapshot, follow the live
//! progress stream.
//!
//! The stream contract: exactly one `snapshot` frame first, then every
//! worker event in publish order, with `heartbeat` frames interleaved at a
//! fixed cadence. A subscriber that falls behind may lose intermediate
//! `progress` frames (the next one carries absolute state) but never a
//! terminal frame: on lag the broker's sticky terminal is replayed.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{
        sse::{Event, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures::stream::{self, Stream, StreamExt};
use serde::Deserialize;
use serde_json::json;
use sqlx::PgPool;
use std::{convert::Infallible, sync::Arc, time::Duration};
use tokio::sync::broadcast;
use tokio::time::{interval_at, Instant, Interval};

use super::commands::start_import::StartImportCommand;
use crate::config::ImportConfig;
use crate::error::AppError;
use crate::import::progress::{
    self, ProgressBroker, ProgressSnapshot, SnapshotParams, WorkerEvent,
};
use crate::import::supervisor::{ImportSupervisor, StartError};

/// State shared by the sync routes.
#[derive(Clone)]
pub struct SyncState {
    pub db: PgPool,
    pub supervisor: Arc<ImportSupervisor>,
    pub broker: ProgressBroker,
    pub config: ImportConfig,
}

/// Sync routes, mounted under `/customers`.
pub fn sync_routes(state: SyncState) -> Router<()> {
    Router::new()
        .route("/sync", post(start_sync))
        .route("/progress", get(get_progress))
        .route("/progress/stream", get(progress_stream))
        .with_state(state)
}

/// Query parameters shared by the snapshot and stream endpoints.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressQuery {
    pub total_rows: Option<i64>,
    pub recent_limit: Option<i64>,
}

impl ProgressQuery {
    fn params(&self, config: &ImportConfig) -> SnapshotParams {
        SnapshotParams {
            total_rows: self.total_rows.unwrap_or(config.total_rows).max(1),
            recent_limit: self.recent_limit.unwrap_or(config.recent_limit),
        }
    }
}

/// POST /customers/sync
///
/// Starts a fresh import or resumes an interrupted one; 200 with the job
/// row either way, 400 on validation problems, 409 while an import is live.
async fn start_sync(
    State(state): State<SyncState>,
    Json(body): Json<serde_json::Value>,
) -> Result<Response, AppError> {
    // Deserialize by hand so an unknown field is a client error, not a 422.
    let command: StartImportCommand = serde_json::from_value(body)
        .map_err(|e| AppError::Validation(format!("Invalid sync request: {e}")))?;

    let options = command
        .resolve(&state.config)
        .map_err(AppError::Validation)?;

    match state.supervisor.start(options).await {
        Ok(job) => Ok((StatusCode::OK, Json(job)).into_response()),
        Err(StartError::Validation(message)) => Err(AppError::Validation(message)),
        Err(StartError::Conflict { job }) => {
            let details = job
                .map(|job| json!({ "jobId": job.id, "status": job.status }))
                .unwrap_or_else(|| json!({}));
            Err(AppError::conflict_with("An import is already running", details))
        }
        Err(StartError::Database(err)) => Err(AppError::Database(err)),
    }
}

/// GET /customers/progress
async fn get_progress(
    State(state): State<SyncState>,
    Query(query): Query<ProgressQuery>,
) -> Result<Response, AppError> {
    let snapshot = progress::snapshot(
        &state.db,
        state.supervisor.store(),
        query.params(&state.config),
    )
    .await?;
    Ok((StatusCode::OK, Json(snapshot)).into_response())
}

/// GET /customers/progress/stream
///
/// Long-lived SSE connection. Subscribes to the broker *before* computing
/// the snapshot so no event published in between is lost.
async fn progress_stream(
    State(state): State<SyncState>,
    Query(query): Query<ProgressQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let rx = state.broker.subscribe();
    let broker = state.broker.clone();

    let snapshot = progress::snapshot(
        &state.db,
        state.supervisor.store(),
        query.params(&state.config),
    )
    .await?;

    let initial = stream::iter([Ok(snapshot_frame(&snapshot))]);

    let live = stream::unfold((rx, broker), |(mut rx, broker)| async move {
        loop {
            match rx.recv().await {
                Ok(event) => return Some((Ok(event_frame(&event)), (rx, broker))),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "Progress subscriber lagged");
                    // Dropped progress frames are recoverable from the next
                    // one; a dropped terminal frame is not, so replay it.
                    if let Some(terminal) = broker.sticky_terminal() {
                        return Some((Ok(event_frame(&terminal)), (rx, broker)));
                    }
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    });

    let period = Duration::from_millis(state.config.sse_heartbeat_ms.max(1));
    let ticker = interval_at(Instant::now() + period, period);
    let heartbeats = stream::unfold(ticker, |mut ticker: Interval| async move {
        ticker.tick().await;
        Some((Ok(event_frame(&WorkerEvent::heartbeat())), ticker))
    });

    Ok(Sse::new(initial.chain(stream::select(live, heartbeats))))
}

fn snapshot_frame(snapshot: &ProgressSnapshot) -> Event {
    let mut payload = serde_json::to_value(snapshot).unwrap_or_else(|_| json!({}));
    payload["type"] = json!("snapshot");
    Event::default()
        .json_data(payload)
        .unwrap_or_else(|_| Event::default().comment("serialization error"))
}

fn event_frame(event: &WorkerEvent) -> Event {
    Event::default()
        .json_data(event)
        .unwrap_or_else(|_| Event::default().comment("serialization error"))
}
