//! Router-level validation tests. These exercise the request-rejection
//! paths that must answer before any database work happens, so they run
//! against a lazy pool that never connects.

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use sqlx::postgres::PgPoolOptions;
use tower::ServiceExt;

use crm_server::config::ImportConfig;
use crm_server::features::{self, FeatureState};
use crm_server::import::{progress::ProgressBroker, supervisor::ImportSupervisor};

fn test_router() -> Router {
    let pool = PgPoolOptions::new()
        .connect_lazy("postgresql://localhost/crm_test")
        .expect("lazy pool");
    let broker = ProgressBroker::new();
    let config = ImportConfig::default();
    let supervisor = ImportSupervisor::new(pool.clone(), broker.clone(), config.clone());

    features::router(FeatureState {
        db: pool,
        supervisor,
        broker,
        config,
    })
}

async fn post_sync(body: &str) -> (StatusCode, String) {
    let app = test_router();
    let response = app
        .oneshot(
            Request::post("/customers/sync")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .unwrap();
    (status, String::from_utf8_lossy(&bytes).to_string())
}

#[tokio::test]
async fn sync_rejects_unknown_body_fields() {
    let (status, body) = post_sync(r#"{"filePath":"/tmp/x.csv","mode":"turbo"}"#).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.contains("Invalid sync request"), "body: {body}");
}

#[tokio::test]
async fn sync_rejects_out_of_range_batch_size() {
    let (status, body) = post_sync(r#"{"batchSize":5}"#).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.contains("batchSize"), "body: {body}");
}

#[tokio::test]
async fn sync_rejects_out_of_range_progress_cadence() {
    let (status, body) = post_sync(r#"{"progressUpdateEveryMs":50}"#).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.contains("progressUpdateEveryMs"), "body: {body}");
}

#[tokio::test]
async fn sync_rejects_out_of_range_total_rows() {
    let (status, body) = post_sync(r#"{"totalRows":0}"#).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.contains("totalRows"), "body: {body}");
}

#[tokio::test]
async fn sync_rejects_missing_source_file() {
    let (status, body) = post_sync(r#"{"filePath":"/definitely/not/here.csv"}"#).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.contains("does not exist"), "body: {body}");
}

#[tokio::test]
async fn sync_rejects_directory_as_source() {
    let dir = tempfile::tempdir().unwrap();
    let body = format!(r#"{{"filePath":"{}"}}"#, dir.path().display());
    let (status, body) = post_sync(&body).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.contains("not a regular file"), "body: {body}");
}
