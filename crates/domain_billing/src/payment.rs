//! Payment reconciliation
//!
//! Applies a payment to a customer invoice, moves the invoice along
//! `Unpaid -> Partial -> Paid` and credits the customer's ledger, all inside
//! the caller's unit of work.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use core_kernel::{ensure_positive, round_money, CustomerId, InvoiceId, PaymentId};

use crate::error::BillingError;
use crate::invoice::Invoice;
use crate::ledger::{EntryType, LedgerEntry, LedgerPoster, LedgerPosting};
use crate::ports::BillingTx;

/// How a payment was (or will be) made
///
/// `Credit` means billed on account: the invoice total is debited to the
/// customer ledger when the invoice is generated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    Cash,
    Credit,
    BankTransfer,
    Cheque,
    Card,
    Online,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Cash => "CASH",
            PaymentMethod::Credit => "CREDIT",
            PaymentMethod::BankTransfer => "BANK_TRANSFER",
            PaymentMethod::Cheque => "CHEQUE",
            PaymentMethod::Card => "CARD",
            PaymentMethod::Online => "ONLINE",
        }
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentMethod {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CASH" => Ok(PaymentMethod::Cash),
            "CREDIT" => Ok(PaymentMethod::Credit),
            "BANK_TRANSFER" => Ok(PaymentMethod::BankTransfer),
            "CHEQUE" => Ok(PaymentMethod::Cheque),
            "CARD" => Ok(PaymentMethod::Card),
            "ONLINE" => Ok(PaymentMethod::Online),
            other => Err(BillingError::validation(format!("unknown payment method '{}'", other))),
        }
    }
}

/// A recorded payment event. Never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub customer_id: CustomerId,
    pub invoice_id: Option<InvoiceId>,
    pub amount: Decimal,
    pub method: PaymentMethod,
    pub reference: Option<String>,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A payment to apply against a customer invoice
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRequest {
    pub invoice_id: InvoiceId,
    pub amount: Decimal,
    pub method: PaymentMethod,
    pub reference: Option<String>,
}

impl PaymentRequest {
    pub fn new(invoice_id: InvoiceId, amount: Decimal, method: PaymentMethod) -> Self {
        Self {
            invoice_id,
            amount,
            method,
            reference: None,
        }
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }
}

/// Everything a reconciled payment produced
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentReceipt {
    pub payment: Payment,
    /// The invoice after the payment was applied
    pub invoice: Invoice,
    pub ledger_entry: LedgerEntry,
    /// `total − amount_paid`, never below zero
    pub outstanding: Decimal,
    /// Amount paid beyond the outstanding balance
    pub overpayment: Decimal,
}

/// Applies payments to customer invoices
pub struct PaymentReconciler;

impl PaymentReconciler {
    /// Applies a payment inside `tx`
    ///
    /// Locks the invoice, records the payment, updates `amount_paid`,
    /// `balance_due` and status, then credits the customer ledger with
    /// the payment amount.
    ///
    /// # Arguments
    ///
    /// * `tx` - The caller's unit of work
    /// * `request` - Invoice, amount, method and reference
    /// * `created_by` - Attributed user, if any
    ///
    /// # Errors
    ///
    /// - `Validation` for a zero or negative amount (checked before any read)
    /// - `NotFound` if the invoice or its customer is missing
    /// - `InvalidState` if the invoice is already `Paid`
    #[instrument(skip(tx, request), fields(invoice_id = %request.invoice_id, amount = %request.amount))]
    pub async fn apply_payment(
        tx: &mut dyn BillingTx,
        request: PaymentRequest,
        created_by: Option<String>,
    ) -> Result<PaymentReceipt, BillingError> {
        let amount = round_money(ensure_positive("payment amount", request.amount)?);
        if amount.is_zero() {
            return Err(BillingError::validation("payment amount rounds to zero"));
        }

        let mut invoice = tx
            .lock_invoice(request.invoice_id)
            .await?
            .ok_or_else(|| BillingError::not_found("Invoice", request.invoice_id))?;

        let overpayment = invoice.apply_payment(amount)?;

        let payment = Payment {
            id: PaymentId::new_v7(),
            customer_id: invoice.customer_id,
            invoice_id: Some(invoice.id),
            amount,
            method: request.method,
            reference: request.reference,
            created_by: created_by.clone(),
            created_at: Utc::now(),
        };

        tx.insert_payment(&payment).await?;
        tx.update_invoice_payment(&invoice).await?;

        let ledger_entry = LedgerPoster::post(
            tx,
            LedgerPosting::credit(
                invoice.customer_id,
                amount,
                EntryType::Payment,
                *payment.id.as_uuid(),
                format!("Payment {} against {}", payment.method, invoice.invoice_number),
            )
            .created_by(created_by),
        )
        .await?;

        if overpayment > Decimal::ZERO {
            warn!(
                invoice_number = %invoice.invoice_number,
                %overpayment,
                "Payment exceeds outstanding balance"
            );
        }

        info!(
            payment_id = %payment.id,
            invoice_number = %invoice.invoice_number,
            status = %invoice.status,
            balance_due = %invoice.balance_due,
            "Payment applied"
        );

        Ok(PaymentReceipt {
            outstanding: invoice.balance_due,
            payment,
            invoice,
            ledger_entry,
            overpayment,
        })
    }
}
