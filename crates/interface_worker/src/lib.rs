//! Billing worker process
//!
//! Hosts the parts of the billing engine that run outside a request: the
//! render worker that retries invoice documents left pending or failed after
//! commit, plus the configuration and wiring shared by any process that
//! embeds the engine.
//!
//! # Example
//!
//! ```rust,ignore
//! use interface_worker::{config::WorkerConfig, build_coordinator};
//!
//! let config = WorkerConfig::from_env()?;
//! let coordinator = build_coordinator(pool, &config);
//! coordinator.confirm_shipment(shipment_id, &ActorContext::user("ops")).await?;
//! ```

pub mod config;
pub mod renderer;
pub mod worker;

use std::sync::Arc;

use domain_billing::{RenderQueue, TransactionCoordinator};
use infra_db::{DatabasePool, PostgresBillingStore, PostgresRenderJobStore};

use crate::config::WorkerConfig;
use crate::renderer::FileSnapshotRenderer;

/// Render queue backed by PostgreSQL and the local file renderer
pub fn build_render_queue(pool: DatabasePool, config: &WorkerConfig) -> RenderQueue {
    RenderQueue::new(
        Arc::new(FileSnapshotRenderer::new(config.storage_dir.clone())),
        Arc::new(PostgresRenderJobStore::new(pool)),
        config.render_queue_config(),
    )
}

/// Transaction coordinator backed by PostgreSQL
pub fn build_coordinator(pool: DatabasePool, config: &WorkerConfig) -> TransactionCoordinator {
    let renders = build_render_queue(pool.clone(), config);
    TransactionCoordinator::new(
        Arc::new(PostgresBillingStore::new(pool)),
        renders,
        config.coordinator_config(),
    )
}
