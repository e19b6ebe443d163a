//! Billing domain errors

use std::time::Duration;

use core_kernel::CoreError;
use thiserror::Error;

/// Errors that can occur in the billing domain
///
/// Anything raised before a unit of work commits rolls the whole unit back.
/// `Storage` is only produced after commit, by invoice rendering.
#[derive(Debug, Error)]
pub enum BillingError {
    /// Bad, missing or non-positive input
    #[error("Validation error: {0}")]
    Validation(String),

    /// Shipment, invoice or customer absent
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Duplicate invoice number or re-creation outside the idempotent path
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Operation attempted from a disallowed status
    #[error("Invalid state for {entity} {id}: expected {expected}, found {actual}")]
    InvalidState {
        entity: &'static str,
        id: String,
        expected: String,
        actual: String,
    },

    /// Post-commit rendering or upload failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// The underlying store failed
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// The surrounding unit of work exceeded its deadline and was rolled back
    #[error("Transaction for {operation} timed out after {timeout:?}")]
    TransactionTimeout {
        operation: &'static str,
        timeout: Duration,
    },

    /// COMMIT was sent but its outcome never came back
    ///
    /// The work may or may not be durable. Repeating it blindly could apply
    /// it twice, so callers must check the stored state first.
    #[error("Commit of {operation} failed with unknown outcome: {reason}")]
    CommitOutcomeUnknown { operation: &'static str, reason: String },
}

impl BillingError {
    pub fn validation(message: impl Into<String>) -> Self {
        BillingError::Validation(message.into())
    }

    pub fn not_found(entity: &'static str, id: impl std::fmt::Display) -> Self {
        BillingError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn invalid_state(
        entity: &'static str,
        id: impl std::fmt::Display,
        expected: impl std::fmt::Display,
        actual: impl std::fmt::Display,
    ) -> Self {
        BillingError::InvalidState {
            entity,
            id: id.to_string(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        BillingError::Conflict(message.into())
    }

    /// Returns true if this error indicates the entity was not found
    pub fn is_not_found(&self) -> bool {
        matches!(self, BillingError::NotFound { .. })
    }

    /// Returns true if repeating the whole operation may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BillingError::Persistence(_) | BillingError::TransactionTimeout { .. }
        )
    }
}

impl From<CoreError> for BillingError {
    fn from(error: CoreError) -> Self {
        match error {
            CoreError::Validation(message) => BillingError::Validation(message),
            CoreError::InvalidIdentifier(message) => BillingError::Validation(message),
        }
    }
}
