//! Post-commit invoice rendering
//!
//! Rendering is a side effect that must never touch committed financial
//! state. Each generated invoice gets one [`RenderJob`] keyed by invoice id,
//! written inside the financial transaction. After commit the jobs are handed
//! to the [`InvoiceRenderer`]; failures are stored on the job and retried
//! later by the worker.
//!
//! ```text
//! Pending ──render ok──> Succeeded
//!    │                      ▲
//!    └─render err─> Failed ─┘ (retried while attempts < max_attempts)
//! ```

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::error::BillingError;
use crate::invoice::InvoiceSnapshot;

/// External document renderer and uploader
///
/// Implementations must be idempotent per invoice id: rendering the same
/// invoice twice overwrites the stored artifact instead of adding another.
#[async_trait]
pub trait InvoiceRenderer: Send + Sync {
    /// Renders and stores a document, returning its storage key
    ///
    /// # Errors
    ///
    /// Returns `BillingError::Storage` when rendering or upload fails
    async fn render(&self, invoice_id: Uuid, snapshot: &InvoiceSnapshot) -> Result<String, BillingError>;
}

/// Render job status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RenderJobStatus {
    Pending,
    Succeeded,
    Failed,
}

impl RenderJobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RenderJobStatus::Pending => "PENDING",
            RenderJobStatus::Succeeded => "SUCCEEDED",
            RenderJobStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for RenderJobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RenderJobStatus {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(RenderJobStatus::Pending),
            "SUCCEEDED" => Ok(RenderJobStatus::Succeeded),
            "FAILED" => Ok(RenderJobStatus::Failed),
            other => Err(BillingError::validation(format!("unknown render job status '{}'", other))),
        }
    }
}

/// A queued render of one invoice document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderJob {
    /// Id of the shipment invoice or customer invoice being rendered
    pub invoice_id: Uuid,
    pub invoice_number: String,
    pub snapshot: InvoiceSnapshot,
    pub status: RenderJobStatus,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub storage_key: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RenderJob {
    pub fn new(snapshot: InvoiceSnapshot) -> Self {
        let now = Utc::now();
        Self {
            invoice_id: snapshot.invoice_id,
            invoice_number: snapshot.invoice_number.clone(),
            snapshot,
            status: RenderJobStatus::Pending,
            attempts: 0,
            last_error: None,
            storage_key: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the worker should pick this job up
    pub fn is_due(&self, max_attempts: u32) -> bool {
        match self.status {
            RenderJobStatus::Pending => true,
            RenderJobStatus::Failed => self.attempts < max_attempts,
            RenderJobStatus::Succeeded => false,
        }
    }
}

/// Render job state outside any financial transaction
#[async_trait]
pub trait RenderJobStore: Send + Sync {
    async fn get(&self, invoice_id: Uuid) -> Result<Option<RenderJob>, BillingError>;

    /// Pending jobs and failed jobs below `max_attempts`, oldest first
    async fn due(&self, limit: usize, max_attempts: u32) -> Result<Vec<RenderJob>, BillingError>;

    async fn mark_succeeded(&self, invoice_id: Uuid, storage_key: &str) -> Result<(), BillingError>;

    /// Records the error and increments `attempts`
    async fn mark_failed(&self, invoice_id: Uuid, error: &str) -> Result<(), BillingError>;
}

/// Render queue configuration
#[derive(Debug, Clone)]
pub struct RenderQueueConfig {
    /// Attempts after which a failed job is left for manual attention
    pub max_attempts: u32,
    /// Jobs taken per `process_due` call
    pub batch_size: usize,
}

impl Default for RenderQueueConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            batch_size: 50,
        }
    }
}

impl RenderQueueConfig {
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }
}

/// Outcome of one `process_due` pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderRunSummary {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Drives render jobs through the renderer
#[derive(Clone)]
pub struct RenderQueue {
    renderer: Arc<dyn InvoiceRenderer>,
    jobs: Arc<dyn RenderJobStore>,
    config: RenderQueueConfig,
}

impl RenderQueue {
    pub fn new(
        renderer: Arc<dyn InvoiceRenderer>,
        jobs: Arc<dyn RenderJobStore>,
        config: RenderQueueConfig,
    ) -> Self {
        Self { renderer, jobs, config }
    }

    pub fn config(&self) -> &RenderQueueConfig {
        &self.config
    }

    /// Renders one queued invoice
    ///
    /// A job that already succeeded is not rendered again; its stored key is
    /// returned.
    ///
    /// # Errors
    ///
    /// - `NotFound` if nothing is queued for `invoice_id`
    /// - `Storage` if the renderer failed; the failure is recorded on the job
    #[instrument(skip(self))]
    pub async fn process(&self, invoice_id: Uuid) -> Result<String, BillingError> {
        let job = self
            .jobs
            .get(invoice_id)
            .await?
            .ok_or_else(|| BillingError::not_found("RenderJob", invoice_id))?;

        self.run(job).await
    }

    /// Renders every due job, up to the configured batch size
    ///
    /// One job failing, including failing to record its own failure, never
    /// stops the rest of the pass.
    #[instrument(skip(self))]
    pub async fn process_due(&self) -> Result<RenderRunSummary, BillingError> {
        let jobs = self
            .jobs
            .due(self.config.batch_size, self.config.max_attempts)
            .await?;

        let mut summary = RenderRunSummary::default();
        for job in jobs {
            let invoice_id = job.invoice_id;
            summary.attempted += 1;
            match self.run(job).await {
                Ok(_) => summary.succeeded += 1,
                Err(BillingError::Storage(_)) => summary.failed += 1,
                Err(error) => {
                    warn!(%invoice_id, %error, "Render job bookkeeping failed");
                    summary.failed += 1;
                }
            }
        }

        if summary.attempted > 0 {
            info!(
                attempted = summary.attempted,
                succeeded = summary.succeeded,
                failed = summary.failed,
                "Render pass complete"
            );
        }
        Ok(summary)
    }

    async fn run(&self, job: RenderJob) -> Result<String, BillingError> {
        if job.status == RenderJobStatus::Succeeded {
            if let Some(key) = job.storage_key {
                debug!(invoice_number = %job.invoice_number, "Already rendered");
                return Ok(key);
            }
        }

        match self.renderer.render(job.invoice_id, &job.snapshot).await {
            Ok(key) => {
                self.jobs.mark_succeeded(job.invoice_id, &key).await?;
                debug!(invoice_number = %job.invoice_number, storage_key = %key, "Invoice rendered");
                Ok(key)
            }
            Err(error) => {
                let message = error.to_string();
                self.jobs.mark_failed(job.invoice_id, &message).await?;
                warn!(
                    invoice_number = %job.invoice_number,
                    attempt = job.attempts + 1,
                    error = %message,
                    "Invoice render failed"
                );
                Err(BillingError::Storage(message))
            }
        }
    }
}
