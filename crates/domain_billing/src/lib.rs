//! Billing Domain - Ledger & Invoice Integration Engine
//!
//! This crate turns confirmed courier shipments into invoices and keeps each
//! customer's running ledger balance consistent as invoices are posted and
//! payments are applied.
//!
//! # Components
//!
//! - **Charge calculator** (`charges`): volumetric weight, charged weight and
//!   declared value from box and item data
//! - **Invoice number allocator** (`numbering`): `{PREFIX}-{YEAR}-{SEQ6}` numbers
//!   reserved from a counter inside the caller's transaction
//! - **Invoice factory** (`factory`): declared-value, billing and customer
//!   invoices for a confirmed shipment, created exactly once
//! - **Ledger poster** (`ledger`): signed entries with a `balance_after` snapshot
//! - **Payment reconciler** (`payment`): applies payments to customer invoices
//! - **Transaction coordinator** (`coordinator`): one unit of work per business
//!   operation, followed by best-effort invoice rendering
//!
//! # Invariants
//!
//! For every customer, `ledger_balance == Σ(debit − credit)` over that
//! customer's entries, and each entry's `balance_after` equals the running sum
//! up to and including that entry.
//!
//! # Example
//!
//! ```rust,ignore
//! use domain_billing::{TransactionCoordinator, ActorContext};
//!
//! let coordinator = TransactionCoordinator::new(store, render_queue, CoordinatorConfig::default());
//! let outcome = coordinator.confirm_shipment(shipment_id, &ActorContext::system()).await?;
//! for warning in &outcome.warnings {
//!     tracing::warn!(invoice = %warning.invoice_number, "render pending: {}", warning.message);
//! }
//! ```

pub mod adapters;
pub mod charges;
pub mod coordinator;
pub mod customer;
pub mod error;
pub mod factory;
pub mod invoice;
pub mod ledger;
pub mod numbering;
pub mod payment;
pub mod ports;
pub mod rendering;
pub mod shipment;

pub use adapters::InMemoryBillingStore;
pub use charges::{ChargeBreakdown, ChargeCalculator, VOLUMETRIC_DIVISOR};
pub use coordinator::{
    ActorContext, AdjustmentRequest, ConfirmationOutcome, CoordinatorConfig, StorageWarning,
    TransactionCoordinator,
};
pub use customer::Customer;
pub use error::BillingError;
pub use factory::{GeneratedInvoices, InvoiceFactory};
pub use invoice::{
    Invoice, InvoiceLine, InvoiceSnapshot, InvoiceStatus, LineKind, ShipmentInvoice,
    ShipmentInvoiceType,
};
pub use ledger::{EntryType, LedgerEntry, LedgerPoster, LedgerPosting, LedgerStatement};
pub use numbering::{InvoiceKind, InvoiceNumberAllocator};
pub use payment::{Payment, PaymentMethod, PaymentReceipt, PaymentReconciler, PaymentRequest};
pub use ports::{BillingStore, BillingTx};
pub use rendering::{
    InvoiceRenderer, RenderJob, RenderJobStatus, RenderJobStore, RenderQueue, RenderQueueConfig,
    RenderRunSummary,
};
pub use shipment::{
    BillingInputPatch, BillingInvoiceInput, ProductInvoiceItem, Shipment, ShipmentBox,
    ShipmentStatus,
};
