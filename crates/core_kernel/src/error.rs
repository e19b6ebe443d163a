//! Core error types used across the system

use thiserror::Error;

/// Core error type for the kernel
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CoreError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),
}

impl CoreError {
    pub fn validation(message: impl Into<String>) -> Self {
        CoreError::Validation(message.into())
    }

    /// A value too large to store or to compute with
    pub fn out_of_range(field: &str, value: impl std::fmt::Display) -> Self {
        CoreError::Validation(format!("{} is out of range: {}", field, value))
    }
}
