//! Shared error model.

use thiserror::Error;

/// Result type used by value constructors and identifier parsing.
pub type CoreResult<T> = Result<T, CoreError>;

/// Core-level error.
///
/// Every variant describes a caller mistake (bad input, bad wiring). None of
/// them is worth retrying; transient infrastructure failures have their own
/// error types next to the component that talks to the infrastructure.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// A value failed validation (e.g. a backoff policy with `min > max`).
    #[error("validation failed: {0}")]
    Validation(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),
}

impl CoreError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }
}
