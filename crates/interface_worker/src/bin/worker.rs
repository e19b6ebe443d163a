//! Courier Billing - Render Worker Binary
//!
//! Renders invoice documents queued by the billing engine and retries the
//! ones whose post-commit render failed.
//!
//! # Usage
//!
//! ```bash
//! BILLING_DATABASE_URL=postgres://... BILLING_STORAGE_DIR=/var/lib/invoices billing-worker
//! ```
//!
//! # Environment Variables
//!
//! * `BILLING_DATABASE_URL` - PostgreSQL connection string
//! * `BILLING_LOG_LEVEL` - trace, debug, info, warn, error (default: info; `RUST_LOG` wins)
//! * `BILLING_LOG_JSON` - emit JSON log lines (default: false)
//! * `BILLING_MAX_CONNECTIONS`, `BILLING_MIN_CONNECTIONS` - pool size (default: 10, 2)
//! * `BILLING_DB_ACQUIRE_TIMEOUT_SECS` - wait for a pooled connection (default: 10)
//! * `BILLING_TRANSACTION_TIMEOUT_SECS` - deadline per unit of work (default: 30)
//! * `BILLING_RENDER_POLL_INTERVAL_SECS` - pause between passes (default: 5)
//! * `BILLING_RENDER_BATCH_SIZE` - jobs per pass (default: 50)
//! * `BILLING_RENDER_MAX_ATTEMPTS` - attempts before a job is left alone (default: 5)
//! * `BILLING_STORAGE_DIR` - output directory (default: ./invoices)

use anyhow::Context;
use interface_worker::{build_render_queue, config::WorkerConfig, worker::RenderWorker};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = WorkerConfig::from_env().context("invalid BILLING_* configuration")?;
    init_tracing(&config);

    tracing::info!(
        storage_dir = %config.storage_dir.display(),
        batch_size = config.render_batch_size,
        max_attempts = config.render_max_attempts,
        "Starting billing render worker"
    );

    let pool = infra_db::create_pool(config.database_config())
        .await
        .context("cannot connect to database")?;
    infra_db::run_migrations(&pool)
        .await
        .context("cannot apply migrations")?;

    let worker = RenderWorker::new(
        build_render_queue(pool.clone(), &config),
        config.render_poll_interval(),
    );
    worker.run(shutdown_signal()).await;

    pool.close().await;
    tracing::info!("Worker shutdown complete");
    Ok(())
}

/// Initializes the tracing subscriber; `RUST_LOG` takes precedence over the
/// configured level
fn init_tracing(config: &WorkerConfig) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(filter);
    if config.log_json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .init();
    }
}

/// Completes on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Ctrl+C handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, draining current pass");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, draining current pass");
        }
    }
}
