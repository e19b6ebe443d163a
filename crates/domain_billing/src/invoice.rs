//! Invoice documents
//!
//! Two families of document are produced per confirmed shipment:
//! - [`ShipmentInvoice`]s, one per [`ShipmentInvoiceType`], carrying line items
//! - one customer-facing [`Invoice`] that tracks what has been paid

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use core_kernel::{
    ensure_money, round_money, CoreError, CustomerId, InvoiceId, LedgerEntryId, ShipmentId,
    ShipmentInvoiceId,
};

use crate::error::BillingError;
use crate::numbering::InvoiceKind;

/// Type of per-shipment invoice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ShipmentInvoiceType {
    DeclaredValue,
    Billing,
}

impl ShipmentInvoiceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShipmentInvoiceType::DeclaredValue => "DECLARED_VALUE",
            ShipmentInvoiceType::Billing => "BILLING",
        }
    }

    /// The numbering counter this type draws from
    pub fn kind(&self) -> InvoiceKind {
        match self {
            ShipmentInvoiceType::DeclaredValue => InvoiceKind::DeclaredValue,
            ShipmentInvoiceType::Billing => InvoiceKind::Billing,
        }
    }
}

impl fmt::Display for ShipmentInvoiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ShipmentInvoiceType {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DECLARED_VALUE" => Ok(ShipmentInvoiceType::DeclaredValue),
            "BILLING" => Ok(ShipmentInvoiceType::Billing),
            other => Err(BillingError::validation(format!("unknown invoice type '{}'", other))),
        }
    }
}

/// Invoice status
///
/// Payment transitions are monotonic: `Unpaid -> Partial -> Paid`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvoiceStatus {
    /// Informational document, not payable (declared value)
    Draft,
    Unpaid,
    Partial,
    Paid,
    /// Billed on account: the total was debited to the customer ledger
    AddToLedger,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Draft => "DRAFT",
            InvoiceStatus::Unpaid => "UNPAID",
            InvoiceStatus::Partial => "PARTIAL",
            InvoiceStatus::Paid => "PAID",
            InvoiceStatus::AddToLedger => "ADD_TO_LEDGER",
        }
    }
}

impl fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InvoiceStatus {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DRAFT" => Ok(InvoiceStatus::Draft),
            "UNPAID" => Ok(InvoiceStatus::Unpaid),
            "PARTIAL" => Ok(InvoiceStatus::Partial),
            "PAID" => Ok(InvoiceStatus::Paid),
            "ADD_TO_LEDGER" => Ok(InvoiceStatus::AddToLedger),
            other => Err(BillingError::validation(format!("unknown invoice status '{}'", other))),
        }
    }
}

/// What a line item bills for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LineKind {
    DeclaredItem,
    Freight,
    Surcharge,
    /// Reconciles computed lines to the authoritative grand total
    Adjustment,
}

impl LineKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LineKind::DeclaredItem => "DECLARED_ITEM",
            LineKind::Freight => "FREIGHT",
            LineKind::Surcharge => "SURCHARGE",
            LineKind::Adjustment => "ADJUSTMENT",
        }
    }
}

impl FromStr for LineKind {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DECLARED_ITEM" => Ok(LineKind::DeclaredItem),
            "FREIGHT" => Ok(LineKind::Freight),
            "SURCHARGE" => Ok(LineKind::Surcharge),
            "ADJUSTMENT" => Ok(LineKind::Adjustment),
            other => Err(BillingError::validation(format!("unknown line kind '{}'", other))),
        }
    }
}

/// A line item on a shipment invoice
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceLine {
    /// 1-based position on the document
    pub position: u32,
    pub kind: LineKind,
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub total: Decimal,
}

impl InvoiceLine {
    /// Creates a line whose total is `quantity × unit_price`, rounded
    ///
    /// # Errors
    ///
    /// Returns `Validation` if the total does not fit a stored amount
    pub fn new(
        kind: LineKind,
        description: impl Into<String>,
        quantity: Decimal,
        unit_price: Decimal,
    ) -> Result<Self, BillingError> {
        let description = description.into();
        let total = quantity
            .checked_mul(unit_price)
            .map(round_money)
            .ok_or_else(|| CoreError::out_of_range("line total", &description))?;

        Ok(Self {
            position: 0,
            kind,
            total: ensure_money("line total", total)?,
            description,
            quantity,
            unit_price,
        })
    }

    /// Creates a single-quantity line for a fixed amount
    pub fn amount(kind: LineKind, description: impl Into<String>, amount: Decimal) -> Result<Self, BillingError> {
        Self::new(kind, description, Decimal::ONE, amount)
    }
}

/// A declared-value or billing invoice for one shipment
///
/// At most one exists per `(shipment_id, invoice_type)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShipmentInvoice {
    pub id: ShipmentInvoiceId,
    pub shipment_id: ShipmentId,
    pub customer_id: CustomerId,
    pub invoice_type: ShipmentInvoiceType,
    pub invoice_number: String,
    pub subtotal: Decimal,
    pub tax: Decimal,
    pub total: Decimal,
    pub status: InvoiceStatus,
    /// Ledger entry that debited this invoice to the customer account
    pub posted_ledger_entry_id: Option<LedgerEntryId>,
    pub lines: Vec<InvoiceLine>,
    pub created_at: DateTime<Utc>,
}

impl ShipmentInvoice {
    /// Builds an invoice and numbers its lines in order
    pub fn new(
        shipment_id: ShipmentId,
        customer_id: CustomerId,
        invoice_type: ShipmentInvoiceType,
        invoice_number: String,
        subtotal: Decimal,
        lines: Vec<InvoiceLine>,
    ) -> Self {
        let lines = lines
            .into_iter()
            .enumerate()
            .map(|(i, line)| InvoiceLine {
                position: i as u32 + 1,
                ..line
            })
            .collect();
        let subtotal = round_money(subtotal);

        Self {
            id: ShipmentInvoiceId::new_v7(),
            shipment_id,
            customer_id,
            invoice_type,
            invoice_number,
            subtotal,
            tax: Decimal::ZERO,
            total: subtotal,
            status: InvoiceStatus::Unpaid,
            posted_ledger_entry_id: None,
            lines,
            created_at: Utc::now(),
        }
    }

    /// Sum of line totals
    ///
    /// Equals `total` for declared-value invoices. A billing invoice may differ
    /// by at most one cent, below which no adjustment line is added.
    pub fn lines_total(&self) -> Result<Decimal, BillingError> {
        sum_lines(&self.lines)
    }
}

/// Checked sum of line totals
pub(crate) fn sum_lines(lines: &[InvoiceLine]) -> Result<Decimal, BillingError> {
    lines.iter().try_fold(Decimal::ZERO, |sum, line| {
        sum.checked_add(line.total)
            .ok_or_else(|| BillingError::from(CoreError::out_of_range("invoice lines total", lines.len())))
    })
}

/// The customer-facing invoice that payments are applied against
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invoice {
    pub id: InvoiceId,
    pub invoice_number: String,
    pub shipment_id: ShipmentId,
    pub customer_id: CustomerId,
    pub billing_invoice_id: ShipmentInvoiceId,
    pub total: Decimal,
    pub amount_paid: Decimal,
    pub balance_due: Decimal,
    pub status: InvoiceStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Invoice {
    /// Creates an unpaid invoice mirroring a billing invoice
    pub fn for_billing(billing: &ShipmentInvoice, invoice_number: String) -> Self {
        let now = Utc::now();
        Self {
            id: InvoiceId::new_v7(),
            invoice_number,
            shipment_id: billing.shipment_id,
            customer_id: billing.customer_id,
            billing_invoice_id: billing.id,
            total: billing.total,
            amount_paid: Decimal::ZERO,
            balance_due: billing.total,
            status: InvoiceStatus::Unpaid,
            created_at: now,
            updated_at: now,
        }
    }

    /// Applies a payment amount and returns the overpayment, if any
    ///
    /// `balance_due` never goes below zero; any excess over the outstanding
    /// balance is returned instead. Status never regresses.
    ///
    /// # Errors
    ///
    /// - `InvalidState` if the invoice is already `Paid`
    /// - `Validation` if the paid amount would not fit a stored amount
    pub fn apply_payment(&mut self, amount: Decimal) -> Result<Decimal, BillingError> {
        if self.status == InvoiceStatus::Paid {
            return Err(BillingError::invalid_state(
                "Invoice",
                &self.invoice_number,
                "UNPAID or PARTIAL",
                self.status,
            ));
        }

        let new_paid = self
            .amount_paid
            .checked_add(amount)
            .map(round_money)
            .ok_or_else(|| CoreError::out_of_range("amount paid", &self.invoice_number))?;
        let new_paid = ensure_money("amount paid", new_paid)?;
        let outstanding = self.total - new_paid;

        self.status = if new_paid >= self.total {
            InvoiceStatus::Paid
        } else if new_paid > Decimal::ZERO {
            InvoiceStatus::Partial
        } else {
            self.status
        };
        self.amount_paid = new_paid;
        self.balance_due = outstanding.max(Decimal::ZERO);
        self.updated_at = Utc::now();

        Ok((-outstanding).max(Decimal::ZERO))
    }
}

/// Immutable document data handed to the renderer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceSnapshot {
    pub invoice_id: Uuid,
    pub invoice_number: String,
    pub kind: InvoiceKind,
    pub shipment_id: ShipmentId,
    pub customer_id: CustomerId,
    pub lines: Vec<InvoiceLine>,
    pub subtotal: Decimal,
    pub tax: Decimal,
    pub total: Decimal,
    pub status: InvoiceStatus,
    pub issued_at: DateTime<Utc>,
}

impl From<&ShipmentInvoice> for InvoiceSnapshot {
    fn from(invoice: &ShipmentInvoice) -> Self {
        Self {
            invoice_id: *invoice.id.as_uuid(),
            invoice_number: invoice.invoice_number.clone(),
            kind: invoice.invoice_type.kind(),
            shipment_id: invoice.shipment_id,
            customer_id: invoice.customer_id,
            lines: invoice.lines.clone(),
            subtotal: invoice.subtotal,
            tax: invoice.tax,
            total: invoice.total,
            status: invoice.status,
            issued_at: invoice.created_at,
        }
    }
}

impl InvoiceSnapshot {
    /// Snapshot of a customer invoice, carrying the billing invoice's lines
    pub fn for_customer_invoice(invoice: &Invoice, billing: &ShipmentInvoice) -> Self {
        Self {
            invoice_id: *invoice.id.as_uuid(),
            invoice_number: invoice.invoice_number.clone(),
            kind: InvoiceKind::Customer,
            shipment_id: invoice.shipment_id,
            customer_id: invoice.customer_id,
            lines: billing.lines.clone(),
            subtotal: billing.subtotal,
            tax: billing.tax,
            total: invoice.total,
            status: invoice.status,
            issued_at: invoice.created_at,
        }
    }
}
