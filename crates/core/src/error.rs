//! Caller-facing input errors.

use thiserror::Error;

/// Input rejected before any job state is touched.
///
/// Storage, quota and provider failures have their own error types in the
/// crates that own them; this one only describes bad input from a caller.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("validation failed: {0}")]
    Validation(String),

    /// Unparseable identifier. The message is prefixed with the id type.
    #[error("invalid identifier: {0}")]
    InvalidId(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }
}
