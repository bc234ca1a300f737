//! Error types for the attune core library.

use thiserror::Error;

/// Top-level error type for all attune operations.
///
/// Only [`AttuneError::Config`], [`AttuneError::InvalidArgument`] and
/// [`AttuneError::InvariantViolation`] are meant to abort a unit of work.
/// Missing data is usually resolved to a neutral value by the caller.
#[derive(Error, Debug)]
pub enum AttuneError {
    /// Invalid weights, thresholds or cutoffs supplied at construction.
    #[error("Configuration error: {0}")]
    Config(String),

    /// An argument outside the domain of the operation.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A data-consistency or programming error. Never retried.
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// A requested record does not exist.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// What kind of record was looked up (user model, message, ...).
        kind: &'static str,
        /// Identifier of the missing record.
        id: String,
    },

    /// The backing store failed.
    #[error("Store error: {0}")]
    Store(String),

    /// Serialization or deserialization failure.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AttuneError {
    /// Shorthand for a [`AttuneError::NotFound`].
    pub fn not_found(kind: &'static str, id: impl std::fmt::Display) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    /// Whether this error is a legitimate lack of data that callers may
    /// resolve locally instead of aborting the batch.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Convenience Result type alias.
pub type Result<T> = std::result::Result<T, AttuneError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_not_found_is_recoverable() {
        assert!(AttuneError::not_found("message", 7).is_recoverable());
        assert!(!AttuneError::Config("bad".into()).is_recoverable());
        assert!(!AttuneError::InvariantViolation("x".into()).is_recoverable());
        assert!(!AttuneError::Store("down".into()).is_recoverable());
    }

    #[test]
    fn not_found_message_names_kind() {
        let err = AttuneError::not_found("user model", "u-1");
        assert_eq!(err.to_string(), "user model not found: u-1");
    }
}
