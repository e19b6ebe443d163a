//! In-memory billing store
//!
//! Units of work are serialised: `begin` takes an owned lock on the whole
//! state and works on a copy. `commit` writes the copy back; dropping or
//! rolling back discards it. This gives the same atomicity and
//! lost-update protection the row locks give in PostgreSQL, at the cost of
//! no parallelism.
//!
//! Unique constraints of the relational schema are checked on insert and
//! reported as `Conflict`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;
use uuid::Uuid;

use core_kernel::{CustomerId, InvoiceId, ShipmentId};

use crate::customer::Customer;
use crate::error::BillingError;
use crate::invoice::{Invoice, ShipmentInvoice};
use crate::ledger::LedgerEntry;
use crate::payment::Payment;
use crate::ports::{BillingStore, BillingTx};
use crate::rendering::{RenderJob, RenderJobStatus, RenderJobStore};
use crate::shipment::{BillingInvoiceInput, Shipment, ShipmentStatus};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    customers: HashMap<CustomerId, Customer>,
    shipments: HashMap<ShipmentId, Shipment>,
    shipment_invoices: Vec<ShipmentInvoice>,
    invoices: Vec<Invoice>,
    payments: Vec<Payment>,
    ledger: Vec<LedgerEntry>,
    sequences: HashMap<(String, i32), i64>,
    render_jobs: Vec<RenderJob>,
}

/// Process-local [`BillingStore`] and [`RenderJobStore`]
#[derive(Debug, Clone, Default)]
pub struct InMemoryBillingStore {
    state: Arc<Mutex<MemoryState>>,
    commit_delay: Option<Duration>,
}

impl InMemoryBillingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every commit sleep before publishing, to stand in for a slow
    /// database round trip
    pub fn with_commit_delay(mut self, delay: Duration) -> Self {
        self.commit_delay = Some(delay);
        self
    }

    /// Seeds a customer outside any unit of work
    pub async fn insert_customer(&self, customer: Customer) {
        self.state.lock().await.customers.insert(customer.id, customer);
    }

    /// Seeds a shipment outside any unit of work
    ///
    /// Rejects values the relational schema could not store exactly.
    pub async fn insert_shipment(&self, shipment: Shipment) -> Result<(), BillingError> {
        shipment.validate()?;
        self.state.lock().await.shipments.insert(shipment.id, shipment);
        Ok(())
    }

    pub async fn customer(&self, id: CustomerId) -> Option<Customer> {
        self.state.lock().await.customers.get(&id).cloned()
    }

    pub async fn shipment(&self, id: ShipmentId) -> Option<Shipment> {
        self.state.lock().await.shipments.get(&id).cloned()
    }

    /// A customer's entries in creation order
    pub async fn ledger_entries(&self, customer_id: CustomerId) -> Vec<LedgerEntry> {
        entries_for(&self.state.lock().await.ledger, customer_id)
    }

    pub async fn shipment_invoices(&self, shipment_id: ShipmentId) -> Vec<ShipmentInvoice> {
        self.state
            .lock()
            .await
            .shipment_invoices
            .iter()
            .filter(|invoice| invoice.shipment_id == shipment_id)
            .cloned()
            .collect()
    }

    pub async fn invoices(&self) -> Vec<Invoice> {
        self.state.lock().await.invoices.clone()
    }

    pub async fn payments(&self) -> Vec<Payment> {
        self.state.lock().await.payments.clone()
    }

    pub async fn render_jobs(&self) -> Vec<RenderJob> {
        self.state.lock().await.render_jobs.clone()
    }
}

fn entries_for(ledger: &[LedgerEntry], customer_id: CustomerId) -> Vec<LedgerEntry> {
    ledger
        .iter()
        .filter(|entry| entry.customer_id == customer_id)
        .cloned()
        .collect()
}

#[async_trait]
impl BillingStore for InMemoryBillingStore {
    async fn begin(&self) -> Result<Box<dyn BillingTx>, BillingError> {
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(InMemoryTx {
            guard,
            working,
            commit_delay: self.commit_delay,
        }))
    }
}

/// One unit of work against [`InMemoryBillingStore`]
struct InMemoryTx {
    guard: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
    commit_delay: Option<Duration>,
}

impl InMemoryTx {
    fn shipment_mut(&mut self, id: ShipmentId) -> Result<&mut Shipment, BillingError> {
        self.working
            .shipments
            .get_mut(&id)
            .ok_or_else(|| BillingError::not_found("Shipment", id))
    }
}

#[async_trait]
impl BillingTx for InMemoryTx {
    async fn lock_customer(&mut self, id: CustomerId) -> Result<Option<Customer>, BillingError> {
        Ok(self.working.customers.get(&id).cloned())
    }

    async fn update_customer_balance(
        &mut self,
        id: CustomerId,
        ledger_balance: Decimal,
    ) -> Result<(), BillingError> {
        let customer = self
            .working
            .customers
            .get_mut(&id)
            .ok_or_else(|| BillingError::not_found("Customer", id))?;
        customer.ledger_balance = ledger_balance;
        Ok(())
    }

    async fn insert_ledger_entry(&mut self, entry: &LedgerEntry) -> Result<(), BillingError> {
        self.working.ledger.push(entry.clone());
        Ok(())
    }

    async fn ledger_entries(&mut self, customer_id: CustomerId) -> Result<Vec<LedgerEntry>, BillingError> {
        Ok(entries_for(&self.working.ledger, customer_id))
    }

    async fn lock_shipment(&mut self, id: ShipmentId) -> Result<Option<Shipment>, BillingError> {
        Ok(self.working.shipments.get(&id).cloned())
    }

    async fn update_shipment_status(
        &mut self,
        id: ShipmentId,
        status: ShipmentStatus,
    ) -> Result<(), BillingError> {
        let shipment = self.shipment_mut(id)?;
        shipment.status = status;
        shipment.updated_at = Utc::now();
        Ok(())
    }

    async fn update_shipment_charges(
        &mut self,
        id: ShipmentId,
        charged_weight_kg: Decimal,
        customs_value: Decimal,
    ) -> Result<(), BillingError> {
        let shipment = self.shipment_mut(id)?;
        shipment.charged_weight_kg = Some(charged_weight_kg);
        shipment.customs_value = Some(customs_value);
        shipment.updated_at = Utc::now();
        Ok(())
    }

    async fn update_billing_input(
        &mut self,
        id: ShipmentId,
        input: &BillingInvoiceInput,
    ) -> Result<(), BillingError> {
        let shipment = self.shipment_mut(id)?;
        shipment.billing_input = Some(input.clone());
        shipment.updated_at = Utc::now();
        Ok(())
    }

    async fn shipment_invoices(&mut self, shipment_id: ShipmentId) -> Result<Vec<ShipmentInvoice>, BillingError> {
        Ok(self
            .working
            .shipment_invoices
            .iter()
            .filter(|invoice| invoice.shipment_id == shipment_id)
            .cloned()
            .collect())
    }

    async fn insert_shipment_invoice(&mut self, invoice: &ShipmentInvoice) -> Result<(), BillingError> {
        let duplicate = self.working.shipment_invoices.iter().any(|existing| {
            existing.invoice_number == invoice.invoice_number
                || (existing.shipment_id == invoice.shipment_id
                    && existing.invoice_type == invoice.invoice_type)
        });
        if duplicate {
            return Err(BillingError::conflict(format!(
                "shipment invoice {} ({}) already exists",
                invoice.invoice_number, invoice.invoice_type
            )));
        }
        self.working.shipment_invoices.push(invoice.clone());
        Ok(())
    }

    async fn invoice_for_shipment(&mut self, shipment_id: ShipmentId) -> Result<Option<Invoice>, BillingError> {
        Ok(self
            .working
            .invoices
            .iter()
            .find(|invoice| invoice.shipment_id == shipment_id)
            .cloned())
    }

    async fn lock_invoice(&mut self, id: InvoiceId) -> Result<Option<Invoice>, BillingError> {
        Ok(self.working.invoices.iter().find(|invoice| invoice.id == id).cloned())
    }

    async fn insert_invoice(&mut self, invoice: &Invoice) -> Result<(), BillingError> {
        let duplicate = self.working.invoices.iter().any(|existing| {
            existing.invoice_number == invoice.invoice_number
                || existing.shipment_id == invoice.shipment_id
        });
        if duplicate {
            return Err(BillingError::conflict(format!(
                "invoice {} already exists",
                invoice.invoice_number
            )));
        }
        self.working.invoices.push(invoice.clone());
        Ok(())
    }

    async fn update_invoice_payment(&mut self, invoice: &Invoice) -> Result<(), BillingError> {
        let stored = self
            .working
            .invoices
            .iter_mut()
            .find(|existing| existing.id == invoice.id)
            .ok_or_else(|| BillingError::not_found("Invoice", invoice.id))?;
        stored.amount_paid = invoice.amount_paid;
        stored.balance_due = invoice.balance_due;
        stored.status = invoice.status;
        stored.updated_at = invoice.updated_at;
        Ok(())
    }

    async fn insert_payment(&mut self, payment: &Payment) -> Result<(), BillingError> {
        self.working.payments.push(payment.clone());
        Ok(())
    }

    async fn next_sequence(&mut self, prefix: &str, year: i32) -> Result<i64, BillingError> {
        let counter = self
            .working
            .sequences
            .entry((prefix.to_string(), year))
            .or_insert(0);
        *counter += 1;
        Ok(*counter)
    }

    async fn enqueue_render_job(&mut self, job: &RenderJob) -> Result<(), BillingError> {
        if self.working.render_jobs.iter().any(|queued| queued.invoice_id == job.invoice_id) {
            return Ok(());
        }
        self.working.render_jobs.push(job.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), BillingError> {
        let InMemoryTx {
            mut guard,
            working,
            commit_delay,
        } = *self;
        if let Some(delay) = commit_delay {
            tokio::time::sleep(delay).await;
        }
        *guard = working;
        debug!("In-memory transaction committed");
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), BillingError> {
        debug!("In-memory transaction rolled back");
        Ok(())
    }
}

#[async_trait]
impl RenderJobStore for InMemoryBillingStore {
    async fn get(&self, invoice_id: Uuid) -> Result<Option<RenderJob>, BillingError> {
        Ok(self
            .state
            .lock()
            .await
            .render_jobs
            .iter()
            .find(|job| job.invoice_id == invoice_id)
            .cloned())
    }

    async fn due(&self, limit: usize, max_attempts: u32) -> Result<Vec<RenderJob>, BillingError> {
        Ok(self
            .state
            .lock()
            .await
            .render_jobs
            .iter()
            .filter(|job| job.is_due(max_attempts))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn mark_succeeded(&self, invoice_id: Uuid, storage_key: &str) -> Result<(), BillingError> {
        let mut state = self.state.lock().await;
        let job = state
            .render_jobs
            .iter_mut()
            .find(|job| job.invoice_id == invoice_id)
            .ok_or_else(|| BillingError::not_found("RenderJob", invoice_id))?;
        job.status = RenderJobStatus::Succeeded;
        job.attempts += 1;
        job.storage_key = Some(storage_key.to_string());
        job.last_error = None;
        job.updated_at = Utc::now();
        Ok(())
    }

    async fn mark_failed(&self, invoice_id: Uuid, error: &str) -> Result<(), BillingError> {
        let mut state = self.state.lock().await;
        let job = state
            .render_jobs
            .iter_mut()
            .find(|job| job.invoice_id == invoice_id)
            .ok_or_else(|| BillingError::not_found("RenderJob", invoice_id))?;
        job.status = RenderJobStatus::Failed;
        job.attempts += 1;
        job.last_error = Some(error.to_string());
        job.updated_at = Utc::now();
        Ok(())
    }
}
