//! PostgreSQL Billing Adapter
//!
//! Implements the billing engine's storage ports on top of the repositories.
//! One [`PgBillingTx`] wraps one database transaction; its `lock_*` methods
//! use `SELECT ... FOR UPDATE` so concurrent operations on the same customer,
//! shipment or invoice are serialized by the database.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use domain_billing::{BillingStore, TransactionCoordinator};
//! use infra_db::{PostgresBillingStore, PostgresRenderJobStore};
//!
//! let store: Arc<dyn BillingStore> = Arc::new(PostgresBillingStore::new(pool.clone()));
//! let jobs = Arc::new(PostgresRenderJobStore::new(pool));
//! ```

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{debug, instrument};

use core_kernel::{CustomerId, InvoiceId, ShipmentId};
use domain_billing::{
    BillingError, BillingInvoiceInput, BillingStore, BillingTx, Customer, Invoice, LedgerEntry,
    Payment, RenderJob, Shipment, ShipmentInvoice, ShipmentStatus,
};

use crate::error::DatabaseError;
use crate::repositories::{
    InvoiceRepository, LedgerRepository, RenderJobRepository, ShipmentRepository,
};

/// PostgreSQL-backed [`BillingStore`]
#[derive(Debug, Clone)]
pub struct PostgresBillingStore {
    pool: PgPool,
}

impl PostgresBillingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Inserts a customer in its own transaction
    pub async fn insert_customer(&self, customer: &Customer) -> Result<(), DatabaseError> {
        let mut conn = self.pool.acquire().await?;
        LedgerRepository::insert_customer(&mut conn, customer).await
    }

    /// Inserts a shipment with its boxes, items and billing input atomically
    ///
    /// Values that the NUMERIC columns would round are rejected with
    /// `Validation` before anything is written.
    pub async fn insert_shipment(&self, shipment: &Shipment) -> Result<(), BillingError> {
        shipment.validate()?;
        let mut tx = self.pool.begin().await.map_err(DatabaseError::from)?;
        ShipmentRepository::insert(&mut tx, shipment).await?;
        tx.commit().await.map_err(DatabaseError::from)?;
        Ok(())
    }
}

#[async_trait]
impl BillingStore for PostgresBillingStore {
    #[instrument(skip(self))]
    async fn begin(&self) -> Result<Box<dyn BillingTx>, BillingError> {
        let tx = self.pool.begin().await.map_err(DatabaseError::from)?;
        debug!("Billing transaction started");
        Ok(Box::new(PgBillingTx { tx }))
    }
}

/// One billing unit of work on a PostgreSQL transaction
///
/// Dropping it without calling `commit` rolls the transaction back.
pub struct PgBillingTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl BillingTx for PgBillingTx {
    #[instrument(skip(self), fields(customer_id = %id))]
    async fn lock_customer(&mut self, id: CustomerId) -> Result<Option<Customer>, BillingError> {
        Ok(LedgerRepository::lock_customer(&mut self.tx, id).await?)
    }

    async fn update_customer_balance(
        &mut self,
        id: CustomerId,
        ledger_balance: Decimal,
    ) -> Result<(), BillingError> {
        Ok(LedgerRepository::update_balance(&mut self.tx, id, ledger_balance).await?)
    }

    async fn insert_ledger_entry(&mut self, entry: &LedgerEntry) -> Result<(), BillingError> {
        Ok(LedgerRepository::insert_entry(&mut self.tx, entry).await?)
    }

    async fn ledger_entries(&mut self, customer_id: CustomerId) -> Result<Vec<LedgerEntry>, BillingError> {
        Ok(LedgerRepository::entries_for_customer(&mut self.tx, customer_id).await?)
    }

    #[instrument(skip(self), fields(shipment_id = %id))]
    async fn lock_shipment(&mut self, id: ShipmentId) -> Result<Option<Shipment>, BillingError> {
        Ok(ShipmentRepository::lock(&mut self.tx, id).await?)
    }

    async fn update_shipment_status(
        &mut self,
        id: ShipmentId,
        status: ShipmentStatus,
    ) -> Result<(), BillingError> {
        Ok(ShipmentRepository::update_status(&mut self.tx, id, status).await?)
    }

    async fn update_shipment_charges(
        &mut self,
        id: ShipmentId,
        charged_weight_kg: Decimal,
        customs_value: Decimal,
    ) -> Result<(), BillingError> {
        Ok(ShipmentRepository::update_charges(&mut self.tx, id, charged_weight_kg, customs_value).await?)
    }

    async fn update_billing_input(
        &mut self,
        id: ShipmentId,
        input: &BillingInvoiceInput,
    ) -> Result<(), BillingError> {
        Ok(ShipmentRepository::upsert_billing_input(&mut self.tx, id, input).await?)
    }

    async fn shipment_invoices(&mut self, shipment_id: ShipmentId) -> Result<Vec<ShipmentInvoice>, BillingError> {
        Ok(InvoiceRepository::shipment_invoices(&mut self.tx, shipment_id).await?)
    }

    async fn insert_shipment_invoice(&mut self, invoice: &ShipmentInvoice) -> Result<(), BillingError> {
        Ok(InvoiceRepository::insert_shipment_invoice(&mut self.tx, invoice).await?)
    }

    async fn invoice_for_shipment(&mut self, shipment_id: ShipmentId) -> Result<Option<Invoice>, BillingError> {
        Ok(InvoiceRepository::invoice_for_shipment(&mut self.tx, shipment_id).await?)
    }

    #[instrument(skip(self), fields(invoice_id = %id))]
    async fn lock_invoice(&mut self, id: InvoiceId) -> Result<Option<Invoice>, BillingError> {
        Ok(InvoiceRepository::lock_invoice(&mut self.tx, id).await?)
    }

    async fn insert_invoice(&mut self, invoice: &Invoice) -> Result<(), BillingError> {
        Ok(InvoiceRepository::insert_invoice(&mut self.tx, invoice).await?)
    }

    async fn update_invoice_payment(&mut self, invoice: &Invoice) -> Result<(), BillingError> {
        Ok(InvoiceRepository::update_payment_state(&mut self.tx, invoice).await?)
    }

    async fn insert_payment(&mut self, payment: &Payment) -> Result<(), BillingError> {
        Ok(InvoiceRepository::insert_payment(&mut self.tx, payment).await?)
    }

    async fn next_sequence(&mut self, prefix: &str, year: i32) -> Result<i64, BillingError> {
        Ok(InvoiceRepository::next_sequence(&mut self.tx, prefix, year).await?)
    }

    async fn enqueue_render_job(&mut self, job: &RenderJob) -> Result<(), BillingError> {
        Ok(RenderJobRepository::enqueue(&mut self.tx, job).await?)
    }

    #[instrument(skip(self))]
    async fn commit(self: Box<Self>) -> Result<(), BillingError> {
        self.tx
            .commit()
            .await
            .map_err(|e| DatabaseError::TransactionFailed(e.to_string()))?;
        debug!("Billing transaction committed");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn rollback(self: Box<Self>) -> Result<(), BillingError> {
        self.tx
            .rollback()
            .await
            .map_err(|e| DatabaseError::TransactionFailed(e.to_string()))?;
        debug!("Billing transaction rolled back");
        Ok(())
    }
}
