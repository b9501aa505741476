use common::postgres::{PostgresConfig, MAX_UPSERT_ROWS};
use config::{Config, ConfigError, Environment};
use garde::Validate;
use scan_worker::batching::BatchConfig;
use scan_worker::ScanWorkerConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Deserialize, Serialize, Clone, Validate)]
pub struct ServiceConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    #[garde(skip)]
    pub log_level: String,

    /// Emit JSON log lines
    #[serde(default = "default_log_json")]
    #[garde(skip)]
    pub log_json: bool,

    // NATS configuration
    /// NATS server URL
    #[serde(default = "default_nats_url")]
    #[garde(length(min = 1))]
    pub nats_url: String,

    /// NATS JetStream stream carrying scan results
    #[serde(default = "default_nats_stream")]
    #[garde(length(min = 1))]
    pub nats_stream: String,

    /// NATS subject pattern for the consumer filter
    #[serde(default = "default_nats_subject")]
    #[garde(length(min = 1))]
    pub nats_subject: String,

    /// Durable consumer name
    #[serde(default = "default_subscription")]
    #[garde(length(min = 1))]
    pub subscription: String,

    /// Startup timeout for initialization operations in seconds
    #[serde(default = "default_startup_timeout_secs")]
    #[garde(range(min = 1))]
    pub startup_timeout_secs: u64,

    // Batching configuration
    /// Maximum scan results per write
    #[serde(default = "default_batch_size")]
    #[garde(range(min = 1, max = MAX_UPSERT_ROWS))]
    pub batch_size: usize,

    /// Silence after the last arrival that closes a partial batch
    #[serde(default = "default_batch_timeout_ms")]
    #[garde(range(min = 1))]
    pub batch_timeout_ms: u64,

    /// Ceiling on how long a batch stays open; 0 disables it
    #[serde(default = "default_max_batch_age_ms")]
    #[garde(skip)]
    pub max_batch_age_ms: u64,

    /// Batches written concurrently
    #[serde(default = "default_max_concurrent_batches")]
    #[garde(range(min = 1))]
    pub max_concurrent_batches: usize,

    // PostgreSQL configuration
    /// PostgreSQL host
    #[serde(default = "default_postgres_host")]
    #[garde(length(min = 1))]
    pub postgres_host: String,

    /// PostgreSQL port
    #[serde(default = "default_postgres_port")]
    #[garde(range(min = 1))]
    pub postgres_port: u16,

    /// PostgreSQL database name
    #[serde(default = "default_postgres_database")]
    #[garde(length(min = 1))]
    pub postgres_database: String,

    /// PostgreSQL username
    #[serde(default = "default_postgres_username")]
    #[garde(length(min = 1))]
    pub postgres_username: String,

    /// PostgreSQL password
    #[serde(default = "default_postgres_password")]
    #[garde(skip)]
    pub postgres_password: String,

    /// PostgreSQL connection pool size
    #[serde(default = "default_postgres_max_pool_size")]
    #[garde(range(min = 1))]
    pub postgres_max_pool_size: usize,

    /// Table holding the latest result per target
    #[serde(default = "default_scan_table")]
    #[garde(length(min = 1))]
    pub scan_table: String,

    /// Time allowed for closers during shutdown in seconds
    #[serde(default = "default_shutdown_timeout_secs")]
    #[garde(skip)]
    pub shutdown_timeout_secs: u64,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_json() -> bool {
    true
}

fn default_nats_url() -> String {
    "nats://localhost:4222".to_string()
}

fn default_nats_stream() -> String {
    "scans".to_string()
}

fn default_nats_subject() -> String {
    "scans.>".to_string()
}

fn default_subscription() -> String {
    "scan-sub".to_string()
}

fn default_startup_timeout_secs() -> u64 {
    30
}

fn default_batch_size() -> usize {
    100
}

fn default_batch_timeout_ms() -> u64 {
    2000
}

fn default_max_batch_age_ms() -> u64 {
    10_000
}

fn default_max_concurrent_batches() -> usize {
    4
}

fn default_postgres_host() -> String {
    "localhost".to_string()
}

fn default_postgres_port() -> u16 {
    5432
}

fn default_postgres_database() -> String {
    "scans".to_string()
}

fn default_postgres_username() -> String {
    "scans".to_string()
}

fn default_postgres_password() -> String {
    "scans".to_string()
}

fn default_postgres_max_pool_size() -> usize {
    10
}

fn default_scan_table() -> String {
    "scan_results".to_string()
}

fn default_shutdown_timeout_secs() -> u64 {
    10
}

impl std::fmt::Debug for ServiceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceConfig")
            .field("log_level", &self.log_level)
            .field("log_json", &self.log_json)
            .field("nats_url", &self.nats_url)
            .field("nats_stream", &self.nats_stream)
            .field("nats_subject", &self.nats_subject)
            .field("subscription", &self.subscription)
            .field("startup_timeout_secs", &self.startup_timeout_secs)
            .field("batch_size", &self.batch_size)
            .field("batch_timeout_ms", &self.batch_timeout_ms)
            .field("max_batch_age_ms", &self.max_batch_age_ms)
            .field("max_concurrent_batches", &self.max_concurrent_batches)
            .field("postgres_host", &self.postgres_host)
            .field("postgres_port", &self.postgres_port)
            .field("postgres_database", &self.postgres_database)
            .field("postgres_username", &self.postgres_username)
            .field("postgres_password", &"<redacted>")
            .field("postgres_max_pool_size", &self.postgres_max_pool_size)
            .field("scan_table", &self.scan_table)
            .field("shutdown_timeout_secs", &self.shutdown_timeout_secs)
            .finish()
    }
}

impl ServiceConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let config = Self::load()?;
        common::garde::validate_struct(&config)?;
        Ok(config)
    }

    fn load() -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(Environment::with_prefix("SCAN_INGESTER"))
            .build()?
            .try_deserialize()
    }

    pub fn worker_config(&self) -> ScanWorkerConfig {
        ScanWorkerConfig {
            batch: BatchConfig {
                batch_size: self.batch_size,
                batch_timeout: Duration::from_millis(self.batch_timeout_ms),
                max_batch_age: (self.max_batch_age_ms > 0)
                    .then(|| Duration::from_millis(self.max_batch_age_ms)),
            },
            max_concurrent_batches: self.max_concurrent_batches,
        }
    }

    pub fn postgres_config(&self) -> PostgresConfig {
        PostgresConfig {
            host: self.postgres_host.clone(),
            port: self.postgres_port,
            database: self.postgres_database.clone(),
            username: self.postgres_username.clone(),
            password: self.postgres_password.clone(),
            max_pool_size: self.postgres_max_pool_size,
        }
    }
}
