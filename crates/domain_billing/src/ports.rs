//! Storage ports
//!
//! The engine reaches its data only through these traits. A [`BillingStore`]
//! hands out one [`BillingTx`] per business operation; every component entry
//! point takes that transaction by `&mut dyn BillingTx` and never opens one of
//! its own.
//!
//! ```text
//! TransactionCoordinator ── begin() ──> BillingTx ──> commit()/rollback()
//!        │                                ▲
//!        ├── InvoiceFactory ──────────────┤
//!        ├── PaymentReconciler ───────────┤
//!        └── LedgerPoster ────────────────┘
//! ```
//!
//! Dropping a transaction without committing discards its writes.
//!
//! # Adapters
//!
//! - `InMemoryBillingStore` in this crate
//! - `PostgresBillingStore` in `infra_db`

use async_trait::async_trait;
use rust_decimal::Decimal;

use core_kernel::{CustomerId, InvoiceId, ShipmentId};

use crate::customer::Customer;
use crate::error::BillingError;
use crate::invoice::{Invoice, ShipmentInvoice};
use crate::ledger::LedgerEntry;
use crate::payment::Payment;
use crate::rendering::RenderJob;
use crate::shipment::{BillingInvoiceInput, Shipment, ShipmentStatus};

/// Opens units of work
#[async_trait]
pub trait BillingStore: Send + Sync {
    /// Begins a new transaction
    async fn begin(&self) -> Result<Box<dyn BillingTx>, BillingError>;
}

/// One atomic unit of work
///
/// `lock_*` methods read a row and hold it for the rest of the transaction so
/// read-modify-write sequences on that row are linearized. Callers lock in the
/// order shipment, invoice, customer.
#[async_trait]
pub trait BillingTx: Send {
    // Customers

    async fn lock_customer(&mut self, id: CustomerId) -> Result<Option<Customer>, BillingError>;

    async fn update_customer_balance(
        &mut self,
        id: CustomerId,
        ledger_balance: Decimal,
    ) -> Result<(), BillingError>;

    // Ledger

    async fn insert_ledger_entry(&mut self, entry: &LedgerEntry) -> Result<(), BillingError>;

    /// All of a customer's entries in creation order
    async fn ledger_entries(&mut self, customer_id: CustomerId) -> Result<Vec<LedgerEntry>, BillingError>;

    // Shipments

    async fn lock_shipment(&mut self, id: ShipmentId) -> Result<Option<Shipment>, BillingError>;

    async fn update_shipment_status(
        &mut self,
        id: ShipmentId,
        status: ShipmentStatus,
    ) -> Result<(), BillingError>;

    async fn update_shipment_charges(
        &mut self,
        id: ShipmentId,
        charged_weight_kg: Decimal,
        customs_value: Decimal,
    ) -> Result<(), BillingError>;

    async fn update_billing_input(
        &mut self,
        id: ShipmentId,
        input: &BillingInvoiceInput,
    ) -> Result<(), BillingError>;

    // Invoices

    async fn shipment_invoices(&mut self, shipment_id: ShipmentId) -> Result<Vec<ShipmentInvoice>, BillingError>;

    /// Fails with `Conflict` on a duplicate number or a second invoice of the same type
    async fn insert_shipment_invoice(&mut self, invoice: &ShipmentInvoice) -> Result<(), BillingError>;

    async fn invoice_for_shipment(&mut self, shipment_id: ShipmentId) -> Result<Option<Invoice>, BillingError>;

    async fn lock_invoice(&mut self, id: InvoiceId) -> Result<Option<Invoice>, BillingError>;

    /// Fails with `Conflict` on a duplicate number or a second invoice for the shipment
    async fn insert_invoice(&mut self, invoice: &Invoice) -> Result<(), BillingError>;

    /// Writes `amount_paid`, `balance_due`, `status` and `updated_at`
    async fn update_invoice_payment(&mut self, invoice: &Invoice) -> Result<(), BillingError>;

    // Payments

    async fn insert_payment(&mut self, payment: &Payment) -> Result<(), BillingError>;

    // Numbering

    /// Reserves the next value of the `(prefix, year)` counter, starting at 1
    async fn next_sequence(&mut self, prefix: &str, year: i32) -> Result<i64, BillingError>;

    // Render outbox

    /// Enqueues a render job; a job already queued for the same invoice is kept
    async fn enqueue_render_job(&mut self, job: &RenderJob) -> Result<(), BillingError>;

    async fn commit(self: Box<Self>) -> Result<(), BillingError>;

    async fn rollback(self: Box<Self>) -> Result<(), BillingError>;
}
