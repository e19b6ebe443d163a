//! Background render worker
//!
//! Polls the render queue until shutdown is requested. A pass that fails as
//! a whole (for example, the database is unreachable) is logged and retried
//! on the next tick; individual render failures are already recorded on
//! their jobs by the queue.

use std::future::Future;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use domain_billing::{RenderQueue, RenderRunSummary};

pub struct RenderWorker {
    queue: RenderQueue,
    poll_interval: Duration,
}

impl RenderWorker {
    pub fn new(queue: RenderQueue, poll_interval: Duration) -> Self {
        Self { queue, poll_interval }
    }

    /// Runs render passes until `shutdown` completes
    ///
    /// The pass in progress when shutdown fires is allowed to finish.
    /// Returns the totals over all passes.
    pub async fn run<F>(&self, shutdown: F) -> RenderRunSummary
    where
        F: Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        let mut totals = RenderRunSummary::default();
        info!(poll_interval = ?self.poll_interval, "Render worker started");

        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                _ = ticker.tick() => {
                    match self.queue.process_due().await {
                        Ok(pass) => {
                            totals.attempted += pass.attempted;
                            totals.succeeded += pass.succeeded;
                            totals.failed += pass.failed;
                        }
                        Err(e) if e.is_retryable() => warn!(error = %e, "Render pass failed, will retry"),
                        Err(e) => error!(error = %e, "Render pass failed"),
                    }
                }
            }
        }

        info!(
            attempted = totals.attempted,
            succeeded = totals.succeeded,
            failed = totals.failed,
            "Render worker stopped"
        );
        totals
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;
    use chrono::Utc;
    use core_kernel::{CustomerId, ShipmentId};
    use domain_billing::{
        BillingError, BillingStore, InMemoryBillingStore, InvoiceKind, InvoiceRenderer,
        InvoiceSnapshot, InvoiceStatus, RenderJob, RenderJobStatus, RenderQueueConfig,
    };
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    struct CountingRenderer {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl InvoiceRenderer for CountingRenderer {
        async fn render(&self, invoice_id: Uuid, _snapshot: &InvoiceSnapshot) -> Result<String, BillingError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(BillingError::Storage("bucket unavailable".to_string()));
            }
            Ok(format!("invoices/{}.pdf", invoice_id))
        }
    }

    async fn queue_job(store: &InMemoryBillingStore) -> Uuid {
        let snapshot = InvoiceSnapshot {
            invoice_id: Uuid::new_v4(),
            invoice_number: "INV-2026-000001".to_string(),
            kind: InvoiceKind::Customer,
            shipment_id: ShipmentId::new(),
            customer_id: CustomerId::new(),
            lines: Vec::new(),
            subtotal: dec!(100),
            tax: dec!(0),
            total: dec!(100),
            status: InvoiceStatus::Unpaid,
            issued_at: Utc::now(),
        };
        let id = snapshot.invoice_id;

        let mut tx = store.begin().await.unwrap();
        tx.enqueue_render_job(&RenderJob::new(snapshot)).await.unwrap();
        tx.commit().await.unwrap();
        id
    }

    fn worker(store: &InMemoryBillingStore, renderer: Arc<CountingRenderer>, max_attempts: u32) -> RenderWorker {
        let queue = RenderQueue::new(
            renderer,
            Arc::new(store.clone()),
            RenderQueueConfig::default().with_max_attempts(max_attempts),
        );
        RenderWorker::new(queue, Duration::from_millis(10))
    }

    #[tokio::test]
    async fn test_worker_renders_pending_jobs_until_shutdown() {
        let store = InMemoryBillingStore::new();
        let invoice_id = queue_job(&store).await;
        let renderer = Arc::new(CountingRenderer {
            calls: AtomicUsize::new(0),
            fail: false,
        });

        let totals = worker(&store, renderer.clone(), 5)
            .run(tokio::time::sleep(Duration::from_millis(100)))
            .await;

        assert_eq!(totals.succeeded, 1);
        assert_eq!(renderer.calls.load(Ordering::SeqCst), 1);

        let jobs = store.render_jobs().await;
        let job = jobs.iter().find(|j| j.invoice_id == invoice_id).unwrap();
        assert_eq!(job.status, RenderJobStatus::Succeeded);
        assert_eq!(job.storage_key.as_deref(), Some(format!("invoices/{}.pdf", invoice_id).as_str()));
    }

    #[tokio::test]
    async fn test_worker_stops_retrying_at_max_attempts() {
        let store = InMemoryBillingStore::new();
        queue_job(&store).await;
        let renderer = Arc::new(CountingRenderer {
            calls: AtomicUsize::new(0),
            fail: true,
        });

        let totals = worker(&store, renderer.clone(), 3)
            .run(tokio::time::sleep(Duration::from_millis(200)))
            .await;

        assert_eq!(totals.failed, 3);
        assert_eq!(renderer.calls.load(Ordering::SeqCst), 3);

        let jobs = store.render_jobs().await;
        assert_eq!(jobs[0].status, RenderJobStatus::Failed);
        assert_eq!(jobs[0].attempts, 3);
        assert_eq!(jobs[0].last_error.as_deref(), Some("Storage error: bucket unavailable"));
    }

    #[tokio::test]
    async fn test_shutdown_before_first_pass() {
        let store = InMemoryBillingStore::new();
        let renderer = Arc::new(CountingRenderer {
            calls: AtomicUsize::new(0),
            fail: false,
        });

        let totals = worker(&store, renderer, 5).run(std::future::ready(())).await;
        assert_eq!(totals, RenderRunSummary::default());
    }
}
