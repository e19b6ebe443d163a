//! Invoice number allocation
//!
//! Numbers have the form `{PREFIX}-{YEAR}-{SEQ6}`. The sequence is reserved
//! from a counter keyed by `(prefix, year)` through the caller's transaction,
//! so the number and the invoice row commit or roll back together and two
//! concurrent confirmations can never receive the same number.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::BillingError;
use crate::ports::BillingTx;

/// The kinds of invoice that receive a number
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvoiceKind {
    /// Customs declared-value invoice
    DeclaredValue,
    /// Freight billing invoice
    Billing,
    /// Customer-facing aggregate invoice
    Customer,
}

impl InvoiceKind {
    pub fn prefix(&self) -> &'static str {
        match self {
            InvoiceKind::DeclaredValue => "DV",
            InvoiceKind::Billing => "BL",
            InvoiceKind::Customer => "INV",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceKind::DeclaredValue => "DECLARED_VALUE",
            InvoiceKind::Billing => "BILLING",
            InvoiceKind::Customer => "CUSTOMER",
        }
    }

    pub fn parse(value: &str) -> Result<Self, BillingError> {
        match value {
            "DECLARED_VALUE" => Ok(InvoiceKind::DeclaredValue),
            "BILLING" => Ok(InvoiceKind::Billing),
            "CUSTOMER" => Ok(InvoiceKind::Customer),
            other => Err(BillingError::validation(format!("unknown invoice kind '{}'", other))),
        }
    }
}

impl fmt::Display for InvoiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reserves invoice numbers inside an open transaction
pub struct InvoiceNumberAllocator;

impl InvoiceNumberAllocator {
    /// Formats a number; sequences past 999999 widen rather than wrap
    pub fn format(kind: InvoiceKind, year: i32, sequence: i64) -> String {
        format!("{}-{}-{:06}", kind.prefix(), year, sequence)
    }

    /// Reserves the next number for `(kind, year)`
    ///
    /// # Arguments
    ///
    /// * `tx` - The unit of work the invoice will be written in
    /// * `kind` - Which counter to draw from
    /// * `year` - Calendar year of issue
    ///
    /// # Errors
    ///
    /// Returns `Validation` for a year outside 1000..=9999 and `Conflict` if the
    /// store hands back a non-positive sequence
    pub async fn allocate(
        tx: &mut dyn BillingTx,
        kind: InvoiceKind,
        year: i32,
    ) -> Result<String, BillingError> {
        if !(1000..=9999).contains(&year) {
            return Err(BillingError::validation(format!("invoice year {} out of range", year)));
        }

        let sequence = tx.next_sequence(kind.prefix(), year).await?;
        if sequence < 1 {
            return Err(BillingError::conflict(format!(
                "counter {}-{} returned invalid sequence {}",
                kind.prefix(),
                year,
                sequence
            )));
        }

        let number = Self::format(kind, year, sequence);
        debug!(%number, "Allocated invoice number");
        Ok(number)
    }
}
