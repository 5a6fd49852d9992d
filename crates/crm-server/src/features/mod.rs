//! Feature slices implementing the CRM API.
//!
//! Each feature is a vertical slice with its own commands, queries, and
//! routes:
//!
//! - **customers**: CRUD over imported customer rows
//! - **sync**: bulk import control and progress observation
//!
//! Commands and queries carry `mediator::Request` marker impls and are
//! dispatched directly by their routes.

pub mod customers;
pub mod shared;
pub mod sync;

use axum::Router;
use sqlx::PgPool;
use std::sync::Arc;

use crate::config::ImportConfig;
use crate::import::progress::ProgressBroker;
use crate::import::supervisor::ImportSupervisor;
use sync::SyncState;

/// Shared state for all feature routes.
#[derive(Clone)]
pub struct FeatureState {
    pub db: PgPool,
    pub supervisor: Arc<ImportSupervisor>,
    pub broker: ProgressBroker,
    pub config: ImportConfig,
}

/// Main API router. Everything lives under `/customers`: the CRUD surface
/// plus the sync control endpoints (`/customers/sync`, `/customers/progress`,
/// `/customers/progress/stream`).
pub fn router(state: FeatureState) -> Router<()> {
    let crud = customers::customers_routes().with_state(state.db.clone());
    let sync = sync::sync_routes(SyncState {
        db: state.db,
        supervisor: state.supervisor,
        broker: state.broker,
        config: state.config,
    });

    Router::new().nest("/customers", crud.merge(sync))
}
