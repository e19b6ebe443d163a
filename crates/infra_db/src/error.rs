//! Database error types
//!
//! This module defines the error types that can occur during database operations
//! and their translation into the billing domain's error taxonomy.

use domain_billing::BillingError;
use thiserror::Error;

/// Errors that can occur during database operations
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to establish a database connection
    #[error("Failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Query execution failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Entity not found in database
    #[error("Entity not found: {0}")]
    NotFound(String),

    /// Unique constraint violation
    #[error("Duplicate entry: {0}")]
    DuplicateEntry(String),

    /// A row referenced a customer, shipment or invoice that does not exist
    #[error("Foreign key violation: {0}")]
    ForeignKeyViolation(String),

    /// Check constraint violation
    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    /// Transaction error
    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    /// Migration error
    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// A stored value could not be mapped to its domain type
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Pool exhaustion - no available connections
    #[error("Connection pool exhausted")]
    PoolExhausted,
}

impl DatabaseError {
    /// Creates a not found error for a specific entity type and identifier
    ///
    /// # Example
    ///
    /// ```rust
    /// use infra_db::DatabaseError;
    ///
    /// let error = DatabaseError::not_found("Shipment", "SHP-123");
    /// assert!(error.to_string().contains("Shipment"));
    /// ```
    pub fn not_found(entity: &str, id: impl std::fmt::Display) -> Self {
        DatabaseError::NotFound(format!("{} with id '{}' not found", entity, id))
    }

    /// Wraps a failure to read a stored column into a domain value
    pub fn decode(column: &str, error: impl std::fmt::Display) -> Self {
        DatabaseError::SerializationError(format!("{}: {}", column, error))
    }

}

/// Maps SQLx errors to specific variants using the PostgreSQL error code
impl From<sqlx::Error> for DatabaseError {
    fn from(error: sqlx::Error) -> Self {
        match &error {
            sqlx::Error::RowNotFound => DatabaseError::NotFound("Record not found".to_string()),
            sqlx::Error::PoolTimedOut => DatabaseError::PoolExhausted,
            sqlx::Error::Database(db_err) => {
                // https://www.postgresql.org/docs/current/errcodes-appendix.html
                let message = db_err.message().to_string();
                match db_err.code().as_deref() {
                    Some("23505") => DatabaseError::DuplicateEntry(message),
                    Some("23503") => DatabaseError::ForeignKeyViolation(message),
                    Some("23514") => DatabaseError::ConstraintViolation(message),
                    _ => DatabaseError::QueryFailed(message),
                }
            }
            _ => DatabaseError::QueryFailed(error.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for DatabaseError {
    fn from(error: sqlx::migrate::MigrateError) -> Self {
        DatabaseError::MigrationFailed(error.to_string())
    }
}

/// Translates infrastructure failures into the domain taxonomy
///
/// - `NotFound` -> `BillingError::NotFound`
/// - `DuplicateEntry` -> `BillingError::Conflict`
/// - check and foreign key constraints -> `BillingError::Validation`
/// - everything else -> `BillingError::Persistence`, which is retryable
///
/// Constraint failures are deterministic: repeating the same statement
/// fails the same way, so they must not surface as `Persistence`.
impl From<DatabaseError> for BillingError {
    fn from(error: DatabaseError) -> Self {
        match error {
            DatabaseError::NotFound(message) => BillingError::NotFound {
                entity: "Record",
                id: message,
            },
            DatabaseError::DuplicateEntry(message) => BillingError::Conflict(message),
            DatabaseError::ConstraintViolation(message) | DatabaseError::ForeignKeyViolation(message) => {
                BillingError::Validation(message)
            }
            other => BillingError::Persistence(other.to_string()),
        }
    }
}
