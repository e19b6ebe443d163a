//! Worker configuration
//!
//! Read from `BILLING_*` environment variables (a `.env` file is loaded first
//! by the binary). Every field has a default, so an empty environment yields a
//! usable local configuration.

use std::path::PathBuf;
use std::time::Duration;

use domain_billing::{CoordinatorConfig, RenderQueueConfig};
use infra_db::DatabaseConfig;
use serde::Deserialize;

/// Environment variable prefix
pub const ENV_PREFIX: &str = "BILLING";

/// Worker configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// PostgreSQL connection string
    pub database_url: String,
    /// Log level: trace, debug, info, warn, error
    pub log_level: String,
    /// Emit JSON log lines instead of human-readable output
    pub log_json: bool,
    pub max_connections: u32,
    pub min_connections: u32,
    /// Wait for a pooled connection; keep below `transaction_timeout_secs`
    pub db_acquire_timeout_secs: u64,
    pub db_max_lifetime_secs: u64,
    pub db_idle_timeout_secs: u64,
    /// Deadline for one billing unit of work, including lock waits
    pub transaction_timeout_secs: u64,
    /// Pause between render passes
    pub render_poll_interval_secs: u64,
    pub render_batch_size: usize,
    /// Attempts after which a failed render is left for manual attention
    pub render_max_attempts: u32,
    /// Directory receiving rendered invoice documents
    pub storage_dir: PathBuf,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            database_url: "postgres://localhost/courier_billing".to_string(),
            log_level: "info".to_string(),
            log_json: false,
            max_connections: 10,
            min_connections: 2,
            db_acquire_timeout_secs: 10,
            db_max_lifetime_secs: 30 * 60,
            db_idle_timeout_secs: 10 * 60,
            transaction_timeout_secs: 30,
            render_poll_interval_secs: 5,
            render_batch_size: 50,
            render_max_attempts: 5,
            storage_dir: PathBuf::from("./invoices"),
        }
    }
}

impl WorkerConfig {
    /// Loads configuration from the process environment
    pub fn from_env() -> Result<Self, config::ConfigError> {
        Self::from_source(None)
    }

    /// Loads configuration from an explicit variable map instead of the
    /// process environment
    pub fn from_source(vars: Option<config::Map<String, String>>) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .try_parsing(true)
                    .source(vars),
            )
            .build()?
            .try_deserialize()
    }

    pub fn database_config(&self) -> DatabaseConfig {
        DatabaseConfig::new(self.database_url.clone())
            .max_connections(self.max_connections)
            .min_connections(self.min_connections)
            .acquire_timeout(Duration::from_secs(self.db_acquire_timeout_secs))
            .max_lifetime(Duration::from_secs(self.db_max_lifetime_secs))
            .idle_timeout(Duration::from_secs(self.db_idle_timeout_secs))
    }

    pub fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig::default()
            .with_transaction_timeout(Duration::from_secs(self.transaction_timeout_secs))
    }

    pub fn render_queue_config(&self) -> RenderQueueConfig {
        RenderQueueConfig::default()
            .with_max_attempts(self.render_max_attempts)
            .with_batch_size(self.render_batch_size)
    }

    pub fn render_poll_interval(&self) -> Duration {
        Duration::from_secs(self.render_poll_interval_secs.max(1))
    }
}
