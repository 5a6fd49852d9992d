//! CRM Server - Main entry point

use anyhow::Result;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use crm_common::logging::{init_logging, LogConfig};
use serde_json::json;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::signal;
use tower_http::compression::CompressionLayer;
use tracing::info;

use crm_server::{
    config::Config,
    db, features,
    import::{progress::ProgressBroker, supervisor::ImportSupervisor},
    middleware,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Environment overrides win over the built-in defaults.
    let log_config = LogConfig::from_env()
        .unwrap_or_default()
        .with_file_prefix("crm-server".to_string());
    init_logging(&log_config)?;

    info!("Starting CRM server");

    let config = Config::load()?;
    info!(
        "Configuration loaded - server will bind to {}:{}",
        config.server.host, config.server.port
    );

    let db_pool = db::connect(&config.database).await?;
    info!("Database connection pool established");

    sqlx::migrate!("../../migrations")
        .run(&db_pool)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to run migrations: {}", e))?;
    info!("Database migrations completed");

    let broker = ProgressBroker::new();
    let supervisor = ImportSupervisor::new(db_pool.clone(), broker.clone(), config.import.clone());

    // Close the crash/restart loop: a RUNNING job with no live worker is
    // picked up and resumed before the server accepts traffic.
    supervisor.resume_on_boot().await?;

    let app = create_router(db_pool, supervisor.clone(), broker, &config);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(config.server.shutdown_timeout_secs))
        .await?;

    // Stop the worker (if any) and fail its job durably before exit.
    supervisor.shutdown().await;

    info!("Server shut down gracefully");
    Ok(())
}

/// Create the application router with all routes and middleware
fn create_router(
    db: sqlx::PgPool,
    supervisor: Arc<ImportSupervisor>,
    broker: ProgressBroker,
    config: &Config,
) -> Router {
    let feature_state = features::FeatureState {
        db: db.clone(),
        supervisor,
        broker,
        config: config.import.clone(),
    };

    Router::new()
        .route("/health", get(health_check))
        .with_state(db)
        .nest("/api/v1", features::router(feature_state))
        .layer(CompressionLayer::new())
        .layer(middleware::tracing_layer())
        .layer(middleware::cors_layer(&config.cors))
}

/// Health check handler
async fn health_check(State(db): State<sqlx::PgPool>) -> Result<Response, StatusCode> {
    match sqlx::query("SELECT 1").fetch_one(&db).await {
        Ok(_) => Ok((
            StatusCode::OK,
            Json(json!({
                "status": "healthy",
                "database": "connected"
            })),
        )
            .into_response()),
        Err(e) => {
            tracing::error!("Database health check failed: {:?}", e);
            Err(StatusCode::SERVICE_UNAVAILABLE)
        }
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal(timeout_secs: u64) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        },
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        },
    }

    // Give in-flight requests a moment to complete.
    info!("Waiting up to {} seconds for connections to close", timeout_secs);
    tokio::time::sleep(Duration::from_secs(timeout_secs.min(5))).await;
}
