//! Core Kernel - Foundational types shared by the courier billing crates
//!
//! This crate provides the building blocks used across the workspace:
//! - Strongly-typed identifiers for customers, shipments, invoices and ledger rows
//! - Decimal money helpers with a single rounding policy
//! - The kernel error type

pub mod money;
pub mod identifiers;
pub mod error;

pub use money::{
    round_money, ensure_positive, ensure_non_negative, ensure_fits, ensure_money,
    MONEY_LIMIT, MONEY_PRECISION, MONEY_SCALE, RECONCILIATION_TOLERANCE,
};
pub use identifiers::{
    CustomerId, ShipmentId, BoxId, ShipmentInvoiceId, InvoiceId,
    LedgerEntryId, PaymentId,
};
pub use error::CoreError;
