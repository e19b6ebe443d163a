//! Customer accounts

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use core_kernel::CustomerId;

/// A billed customer and their running ledger balance
///
/// `ledger_balance` is only written by the ledger poster. Positive means the
/// customer owes money.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub id: CustomerId,
    pub name: String,
    pub ledger_balance: Decimal,
    pub created_at: DateTime<Utc>,
}

impl Customer {
    /// Creates a customer with a zero balance
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: CustomerId::new_v7(),
            name: name.into(),
            ledger_balance: Decimal::ZERO,
            created_at: Utc::now(),
        }
    }
}
