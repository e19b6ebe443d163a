//! Customer ledger
//!
//! This module posts signed entries against a customer's running balance.
//! Entries are append-only; corrections are new `Adjustment` entries.
//!
//! # Invariants
//!
//! - `customer.ledger_balance == Σ(debit − credit)` over the customer's entries
//! - each entry's `balance_after` is the running sum up to and including it,
//!   in creation order
//!
//! Both hold as long as every posting reads and writes the balance through
//! the same locked customer row as the write that triggered it.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use uuid::Uuid;

use core_kernel::{ensure_money, ensure_non_negative, round_money, CoreError, CustomerId, LedgerEntryId};

use crate::error::BillingError;
use crate::ports::BillingTx;

/// What caused a ledger entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryType {
    Invoice,
    Payment,
    Adjustment,
}

impl EntryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryType::Invoice => "INVOICE",
            EntryType::Payment => "PAYMENT",
            EntryType::Adjustment => "ADJUSTMENT",
        }
    }
}

impl fmt::Display for EntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntryType {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "INVOICE" => Ok(EntryType::Invoice),
            "PAYMENT" => Ok(EntryType::Payment),
            "ADJUSTMENT" => Ok(EntryType::Adjustment),
            other => Err(BillingError::validation(format!("unknown ledger entry type '{}'", other))),
        }
    }
}

/// An append-only ledger row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: LedgerEntryId,
    pub customer_id: CustomerId,
    /// The invoice or payment that caused this entry
    pub reference_id: Uuid,
    pub entry_type: EntryType,
    pub debit: Decimal,
    pub credit: Decimal,
    /// Customer balance immediately after this entry was applied
    pub balance_after: Decimal,
    pub description: String,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// Signed effect on the balance: `debit − credit`
    pub fn net(&self) -> Decimal {
        self.debit - self.credit
    }
}

/// Arguments to [`LedgerPoster::post`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerPosting {
    pub customer_id: CustomerId,
    pub debit: Decimal,
    pub credit: Decimal,
    pub entry_type: EntryType,
    pub reference_id: Uuid,
    pub description: String,
    pub created_by: Option<String>,
}

impl LedgerPosting {
    /// A posting that increases what the customer owes
    pub fn debit(
        customer_id: CustomerId,
        amount: Decimal,
        entry_type: EntryType,
        reference_id: Uuid,
        description: impl Into<String>,
    ) -> Self {
        Self {
            customer_id,
            debit: amount,
            credit: Decimal::ZERO,
            entry_type,
            reference_id,
            description: description.into(),
            created_by: None,
        }
    }

    /// A posting that reduces what the customer owes
    pub fn credit(
        customer_id: CustomerId,
        amount: Decimal,
        entry_type: EntryType,
        reference_id: Uuid,
        description: impl Into<String>,
    ) -> Self {
        Self {
            debit: Decimal::ZERO,
            credit: amount,
            ..Self::debit(customer_id, Decimal::ZERO, entry_type, reference_id, description)
        }
    }

    /// Attributes the posting to a user
    pub fn created_by(mut self, user: Option<impl Into<String>>) -> Self {
        self.created_by = user.map(Into::into);
        self
    }

    /// Rounds both amounts to cents and checks them
    ///
    /// Rounding comes first so an amount below half a cent cannot pass as
    /// non-zero and then be stored as zero.
    fn normalized(mut self) -> Result<Self, BillingError> {
        self.debit = ensure_money("debit", round_money(ensure_non_negative("debit", self.debit)?))?;
        self.credit = ensure_money("credit", round_money(ensure_non_negative("credit", self.credit)?))?;
        if self.debit.is_zero() && self.credit.is_zero() {
            return Err(BillingError::validation(
                "ledger posting needs a debit or credit of at least one cent",
            ));
        }
        Ok(self)
    }
}

/// Appends entries and keeps the customer's balance in step
pub struct LedgerPoster;

impl LedgerPoster {
    /// Posts one entry against a customer's balance
    ///
    /// Reads the customer under a row lock, computes
    /// `new_balance = balance + debit − credit`, inserts the entry with
    /// `balance_after = new_balance` and writes the new balance back, all
    /// through `tx`. The caller owns commit and rollback.
    ///
    /// # Arguments
    ///
    /// * `tx` - The unit of work of the invoice or payment write that triggered this posting
    /// * `posting` - Amounts, type, reference and description
    ///
    /// # Returns
    ///
    /// The inserted entry
    ///
    /// # Errors
    ///
    /// - `Validation` if an amount is negative, both round to zero, or the
    ///   new balance would not fit a stored amount
    /// - `NotFound` if the customer does not exist
    #[instrument(skip(tx, posting), fields(customer_id = %posting.customer_id, entry_type = %posting.entry_type))]
    pub async fn post(
        tx: &mut dyn BillingTx,
        posting: LedgerPosting,
    ) -> Result<LedgerEntry, BillingError> {
        let posting = posting.normalized()?;
        let (debit, credit) = (posting.debit, posting.credit);

        let customer = tx
            .lock_customer(posting.customer_id)
            .await?
            .ok_or_else(|| BillingError::not_found("Customer", posting.customer_id))?;

        let new_balance = customer
            .ledger_balance
            .checked_add(debit)
            .and_then(|balance| balance.checked_sub(credit))
            .map(round_money)
            .ok_or_else(|| CoreError::out_of_range("ledger balance", customer.id))?;
        let new_balance = ensure_money("ledger balance", new_balance)?;

        let entry = LedgerEntry {
            id: LedgerEntryId::new_v7(),
            customer_id: customer.id,
            reference_id: posting.reference_id,
            entry_type: posting.entry_type,
            debit,
            credit,
            balance_after: new_balance,
            description: posting.description,
            created_by: posting.created_by,
            created_at: Utc::now(),
        };

        tx.insert_ledger_entry(&entry).await?;
        tx.update_customer_balance(customer.id, new_balance).await?;

        debug!(
            entry_id = %entry.id,
            previous_balance = %customer.ledger_balance,
            balance_after = %new_balance,
            "Ledger entry posted"
        );

        Ok(entry)
    }

    /// Reads a customer's statement inside `tx`
    pub async fn statement(
        tx: &mut dyn BillingTx,
        customer_id: CustomerId,
    ) -> Result<LedgerStatement, BillingError> {
        let customer = tx
            .lock_customer(customer_id)
            .await?
            .ok_or_else(|| BillingError::not_found("Customer", customer_id))?;
        let entries = tx.ledger_entries(customer_id).await?;

        LedgerStatement::new(customer_id, customer.ledger_balance, entries)
    }
}

/// A customer's entries with the stored and recomputed balances
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerStatement {
    pub customer_id: CustomerId,
    /// Entries in creation order
    pub entries: Vec<LedgerEntry>,
    pub stored_balance: Decimal,
    pub computed_balance: Decimal,
}

impl LedgerStatement {
    /// # Errors
    ///
    /// Returns `Validation` if the entries do not sum to a representable amount
    pub fn new(
        customer_id: CustomerId,
        stored_balance: Decimal,
        entries: Vec<LedgerEntry>,
    ) -> Result<Self, BillingError> {
        let mut computed_balance = Decimal::ZERO;
        for entry in &entries {
            computed_balance = computed_balance
                .checked_add(entry.net())
                .ok_or_else(|| CoreError::out_of_range("ledger sum", customer_id))?;
        }
        Ok(Self {
            customer_id,
            entries,
            stored_balance,
            computed_balance,
        })
    }

    /// Index of the first entry whose `balance_after` disagrees with the running sum
    pub fn first_divergence(&self) -> Option<usize> {
        let mut running = Decimal::ZERO;
        for (i, entry) in self.entries.iter().enumerate() {
            match running.checked_add(entry.net()) {
                Some(next) if next == entry.balance_after => running = next,
                _ => return Some(i),
            }
        }
        None
    }

    pub fn is_consistent(&self) -> bool {
        self.stored_balance == self.computed_balance && self.first_divergence().is_none()
    }

    /// Fails with `Conflict` describing the first broken invariant
    pub fn verify(&self) -> Result<(), BillingError> {
        if let Some(i) = self.first_divergence() {
            let entry = &self.entries[i];
            return Err(BillingError::conflict(format!(
                "ledger entry {} for {} records balance_after {} but running sum differs",
                entry.id, self.customer_id, entry.balance_after
            )));
        }
        if self.stored_balance != self.computed_balance {
            return Err(BillingError::conflict(format!(
                "customer {} stored balance {} != sum of entries {}",
                self.customer_id, self.stored_balance, self.computed_balance
            )));
        }
        Ok(())
    }
}
