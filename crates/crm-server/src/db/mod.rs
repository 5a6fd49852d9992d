//! Database pool construction and transient-error retry policy.

use rand::Rng;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::future::Future;
use std::time::Duration;

use crate::config::DatabaseConfig;

/// Build the connection pool from configuration.
pub async fn connect(config: &DatabaseConfig) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
        .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
        .connect(&config.url)
        .await
}

/// Postgres error codes that are safe to retry. Deadlocks and serialization
/// failures roll the whole transaction back, so a retry starts clean.
const RETRYABLE_PG_CODES: &[&str] = &[
    "40001", // serialization_failure
    "40P01", // deadlock_detected
    "57P03", // cannot_connect_now
];

/// Whether an error is transient and worth retrying.
pub fn is_retryable(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err
            .code()
            .map(|code| RETRYABLE_PG_CODES.contains(&code.as_ref()))
            .unwrap_or(false),
        sqlx::Error::PoolTimedOut => true,
        sqlx::Error::Io(_) => true,
        _ => false,
    }
}

/// Bounded exponential backoff with jitter.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Delay before the given retry attempt (0-based).
    pub fn compute_delay(&self, attempt: u32) -> Duration {
        let base = self.initial_delay.as_millis() as f64 * self.multiplier.powi(attempt as i32);
        let capped = base.min(self.max_delay.as_millis() as f64);
        let delay_ms = if self.jitter {
            let jitter_range = capped * 0.1;
            capped - jitter_range + rand::thread_rng().gen::<f64>() * jitter_range * 2.0
        } else {
            capped
        };
        Duration::from_millis(delay_ms as u64)
    }
}

/// Run a database operation, retrying transient failures with backoff.
///
/// The operation must be safe to repeat from scratch; callers wrap whole
/// transactions, never partial ones.
pub async fn with_retries<T, F, Fut>(
    retry: &RetryConfig,
    op_name: &str,
    mut op: F,
) -> Result<T, sqlx::Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, sqlx::Error>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if is_retryable(&err) && attempt + 1 < retry.max_attempts => {
                let delay = retry.compute_delay(attempt);
                tracing::warn!(
                    operation = op_name,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Transient database error, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compute_delay_grows_and_caps() {
        let retry = RetryConfig {
            jitter: false,
            ..Default::default()
        };
        assert_eq!(retry.compute_delay(0), Duration::from_millis(100));
        assert_eq!(retry.compute_delay(1), Duration::from_millis(200));
        assert_eq!(retry.compute_delay(2), Duration::from_millis(400));
        assert_eq!(retry.compute_delay(10), Duration::from_secs(5));
    }

    #[test]
    fn test_compute_delay_jitter_stays_near_base() {
        let retry = RetryConfig::default();
        for _ in 0..50 {
            let delay = retry.compute_delay(1).as_millis() as f64;
            assert!((160.0..=240.0).contains(&delay), "delay {} out of range", delay);
        }
    }

    #[test]
    fn test_pool_timeout_is_retryable() {
        assert!(is_retryable(&sqlx::Error::PoolTimedOut));
        assert!(!is_retryable(&sqlx::Error::RowNotFound));
    }

    #[tokio::test]
    async fn test_with_retries_gives_up_after_max_attempts() {
        let retry = RetryConfig {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            jitter: false,
            ..Default::default()
        };
        let mut calls = 0u32;
        let result: Result<(), _> = with_retries(&retry, "test", || {
            calls += 1;
            async { Err(sqlx::Error::PoolTimedOut) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls, 3);
    }

    #[tokio::test]
    async fn test_with_retries_does_not_retry_permanent_errors() {
        let retry = RetryConfig::default();
        let mut calls = 0u32;
        let result: Result<(), _> = with_retries(&retry, "test", || {
            calls += 1;
            async { Err(sqlx::Error::RowNotFound) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }
}
