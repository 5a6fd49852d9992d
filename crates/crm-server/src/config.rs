//! Configuration management

use serde::{Deserialize, Serialize};

// ============================================================================
// Server Configuration Constants
// ============================================================================

/// Default server host binding.
pub const DEFAULT_SERVER_HOST: &str = "127.0.0.1";

/// Default server port.
pub const DEFAULT_SERVER_PORT: u16 = 8000;

/// Default shutdown timeout in seconds.
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;

/// Default database URL for local development.
pub const DEFAULT_DATABASE_URL: &str = "postgresql://localhost/crm";

/// Default maximum database connections in the pool.
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 10;

/// Default minimum database connections in the pool.
pub const DEFAULT_DATABASE_MIN_CONNECTIONS: u32 = 2;

/// Default database connection timeout in seconds.
pub const DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default database idle timeout in seconds (10 minutes).
pub const DEFAULT_DATABASE_IDLE_TIMEOUT_SECS: u64 = 600;

/// Default CORS allowed origin for local development.
pub const DEFAULT_CORS_ALLOWED_ORIGIN: &str = "http://localhost:3000";

// ============================================================================
// Import Configuration Constants
// ============================================================================

/// Default source file when a sync request carries no filePath.
pub const DEFAULT_CSV_PATH: &str = "./data/customers.csv";

/// Presentation-only row total used for percent/ETA when not supplied.
pub const DEFAULT_TOTAL_ROWS: i64 = 2_000_000;

/// Rows accumulated before a batch commit.
pub const DEFAULT_BATCH_SIZE: usize = 1_000;

/// Minimum cadence between progress checkpoint writes.
pub const DEFAULT_PROGRESS_EVERY_MS: u64 = 1_000;

/// Read-ahead buffer for the streaming parser (1 MiB).
pub const DEFAULT_HIGH_WATER_MARK: usize = 1_048_576;

/// Byte window replayed before the checkpoint cursor on resume (1 MiB).
pub const DEFAULT_RESUME_OVERLAP: u64 = 1_048_576;

/// Recent-customer rows attached to a progress snapshot.
pub const DEFAULT_RECENT_LIMIT: i64 = 20;

/// Cadence of heartbeat frames on the progress stream.
pub const DEFAULT_SSE_HEARTBEAT_MS: u64 = 15_000;

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub cors: CorsConfig,
    pub import: ImportConfig,
}

/// Server-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub shutdown_timeout_secs: u64,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_secs: u64,
    pub idle_timeout_secs: u64,
}

/// CORS configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
    pub allow_credentials: bool,
}

/// Import pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportConfig {
    /// Default source file, used when the sync request omits filePath.
    pub csv_path: String,
    /// Presentation-only total used for percent and ETA.
    pub total_rows: i64,
    pub batch_size: usize,
    pub progress_every_ms: u64,
    /// Parser read-ahead in bytes.
    pub high_water_mark: usize,
    /// Bytes replayed before the persisted cursor on resume.
    pub resume_overlap: u64,
    pub recent_limit: i64,
    pub sse_heartbeat_ms: u64,
}

fn env_parsed<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Config {
            server: ServerConfig {
                host: std::env::var("CRM_HOST").unwrap_or_else(|_| DEFAULT_SERVER_HOST.to_string()),
                port: env_parsed("CRM_PORT", DEFAULT_SERVER_PORT),
                shutdown_timeout_secs: env_parsed(
                    "CRM_SHUTDOWN_TIMEOUT",
                    DEFAULT_SHUTDOWN_TIMEOUT_SECS,
                ),
            },
            database: DatabaseConfig {
                url: std::env::var("DATABASE_URL")
                    .unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string()),
                max_connections: env_parsed(
                    "DATABASE_MAX_CONNECTIONS",
                    DEFAULT_DATABASE_MAX_CONNECTIONS,
                ),
                min_connections: env_parsed(
                    "DATABASE_MIN_CONNECTIONS",
                    DEFAULT_DATABASE_MIN_CONNECTIONS,
                ),
                connect_timeout_secs: env_parsed(
                    "DATABASE_CONNECT_TIMEOUT",
                    DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
                ),
                idle_timeout_secs: env_parsed(
                    "DATABASE_IDLE_TIMEOUT",
                    DEFAULT_DATABASE_IDLE_TIMEOUT_SECS,
                ),
            },
            cors: CorsConfig {
                allowed_origins: std::env::var("CORS_ALLOWED_ORIGINS")
                    .unwrap_or_else(|_| DEFAULT_CORS_ALLOWED_ORIGIN.to_string())
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .collect(),
                allow_credentials: env_parsed("CORS_ALLOW_CREDENTIALS", true),
            },
            import: ImportConfig {
                csv_path: std::env::var("CSV_PATH")
                    .unwrap_or_else(|_| DEFAULT_CSV_PATH.to_string()),
                total_rows: env_parsed("IMPORT_TOTAL_ROWS", DEFAULT_TOTAL_ROWS),
                batch_size: env_parsed("IMPORT_BATCH_SIZE", DEFAULT_BATCH_SIZE),
                progress_every_ms: env_parsed(
                    "IMPORT_PROGRESS_EVERY_MS",
                    DEFAULT_PROGRESS_EVERY_MS,
                ),
                high_water_mark: env_parsed("IMPORT_HIGH_WATER_MARK", DEFAULT_HIGH_WATER_MARK),
                resume_overlap: env_parsed("IMPORT_RESUME_OVERLAP", DEFAULT_RESUME_OVERLAP),
                recent_limit: env_parsed("IMPORT_RECENT_LIMIT", DEFAULT_RECENT_LIMIT),
                sse_heartbeat_ms: env_parsed("SSE_HEARTBEAT_MS", DEFAULT_SSE_HEARTBEAT_MS),
            },
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.server.port == 0 {
            anyhow::bail!("Server port must be greater than 0");
        }

        if self.database.url.is_empty() {
            anyhow::bail!("Database URL cannot be empty");
        }

        if self.database.max_connections == 0 {
            anyhow::bail!("Database max_connections must be greater than 0");
        }

        if self.database.min_connections > self.database.max_connections {
            anyhow::bail!(
                "Database min_connections ({}) cannot be greater than max_connections ({})",
                self.database.min_connections,
                self.database.max_connections
            );
        }

        if self.import.total_rows < 1 {
            anyhow::bail!("IMPORT_TOTAL_ROWS must be at least 1");
        }

        if self.import.high_water_mark == 0 {
            anyhow::bail!("IMPORT_HIGH_WATER_MARK must be greater than 0");
        }

        if self.cors.allowed_origins.is_empty() {
            tracing::warn!("No CORS origins configured - all origins will be allowed");
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: DEFAULT_SERVER_HOST.to_string(),
                port: DEFAULT_SERVER_PORT,
                shutdown_timeout_secs: DEFAULT_SHUTDOWN_TIMEOUT_SECS,
            },
            database: DatabaseConfig {
                url: DEFAULT_DATABASE_URL.to_string(),
                max_connections: DEFAULT_DATABASE_MAX_CONNECTIONS,
                min_connections: DEFAULT_DATABASE_MIN_CONNECTIONS,
                connect_timeout_secs: DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
                idle_timeout_secs: DEFAULT_DATABASE_IDLE_TIMEOUT_SECS,
            },
            cors: CorsConfig {
                allowed_origins: vec![DEFAULT_CORS_ALLOWED_ORIGIN.to_string()],
                allow_credentials: true,
            },
            import: ImportConfig::default(),
        }
    }
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            csv_path: DEFAULT_CSV_PATH.to_string(),
            total_rows: DEFAULT_TOTAL_ROWS,
            batch_size: DEFAULT_BATCH_SIZE,
            progress_every_ms: DEFAULT_PROGRESS_EVERY_MS,
            high_water_mark: DEFAULT_HIGH_WATER_MARK,
            resume_overlap: DEFAULT_RESUME_OVERLAP,
            recent_limit: DEFAULT_RECENT_LIMIT,
            sse_heartbeat_ms: DEFAULT_SSE_HEARTBEAT_MS,
        }
    }
}
