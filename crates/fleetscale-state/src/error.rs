//! Error types for the fleetscale state crate.

use thiserror::Error;

/// Result type alias for state store operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors that can occur while reading, writing, or validating policies.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum StateError {
    #[error("failed to open database: {0}")]
    Open(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),

    #[error("invalid policy: {0}")]
    Invalid(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store is closed")]
    Closed,
}

impl StateError {
    /// True when the error describes the policy content rather than the
    /// store that holds it.
    pub fn is_policy_error(&self) -> bool {
        matches!(self, StateError::Deserialize(_) | StateError::Invalid(_))
    }
}
