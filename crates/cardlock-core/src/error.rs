//! Error types for the cardlock core
//!
//! Authentication decisions are never errors; they are reported through
//! [`AuthOutcome`](crate::AuthOutcome). The types here cover the plumbing
//! underneath: storage, lookups, hashing, audit delivery and admin actions.

use thiserror::Error;

/// Result type alias for cardlock operations
pub type Result<T> = std::result::Result<T, CardlockError>;

/// General errors raised while constructing or configuring the core
#[derive(Debug, Error)]
pub enum CardlockError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Card identifier failed validation
    #[error("Invalid card id: {0}")]
    InvalidCardId(String),

    /// PIN has the wrong number of digits
    #[error("PIN must be {0}-{1} digits")]
    InvalidPinLength(usize, usize),

    /// PIN contains something other than digits
    #[error("PIN must contain only digits")]
    InvalidPinFormat,

    /// Configuration could not be read or parsed
    #[error("Configuration error: {0}")]
    Config(String),

    /// Lockout store error
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// PIN hashing error
    #[error("Hash error: {0}")]
    Hash(#[from] HashError),

    /// Audit sink error
    #[error("Audit error: {0}")]
    Audit(#[from] AuditError),
}

/// Errors from the lockout store's backing storage
#[derive(Debug, Error)]
pub enum StoreError {
    /// Backing file could not be read or written
    #[error("Lockout storage unavailable: {0}")]
    Io(#[from] std::io::Error),

    /// Backing storage refused the operation for another reason
    #[error("Lockout storage rejected write: {0}")]
    Backend(String),
}

/// Errors returned by a card record lookup
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LookupError {
    /// No card with this identifier exists
    #[error("Card not found: {0}")]
    NotFound(String),

    /// The card store could not be consulted
    #[error("Card store unavailable: {0}")]
    Unavailable(String),
}

/// Errors from the PIN hasher
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HashError {
    /// Cost parameters were rejected
    #[error("Invalid hasher parameters: {0}")]
    Params(String),

    /// Hash computation failed
    #[error("PIN hashing failed: {0}")]
    Hashing(String),
}

/// Errors delivering an audit event
#[derive(Debug, Error)]
pub enum AuditError {
    /// Audit log could not be written
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Event could not be encoded
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for AuditError {
    fn from(e: serde_json::Error) -> Self {
        AuditError::Serialization(e.to_string())
    }
}

/// Errors returned by administrative operations
#[derive(Debug, Error)]
pub enum AdminError {
    /// Persisting the change failed; the operation was not performed
    #[error("Lockout store write failed, change not applied: {0}")]
    Store(StoreError),

    /// The lock is in effect in memory but is not yet durable.
    /// Persistence is retried on the next store event.
    #[error("Card locked but not yet persisted: {0}")]
    NotPersisted(StoreError),

    /// Reason text cannot be stored in the lockout file
    #[error("Invalid reason: {0}")]
    InvalidReason(String),
}
