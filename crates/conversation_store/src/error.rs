//! Conversation store error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The parent-pointer chain referenced a record that does not exist.
    /// The store must never produce a dangling pointer, so this is an
    /// invariant violation, not a recoverable condition.
    #[error("Data integrity fault: {0}")]
    Integrity(String),

    #[error("Invalid stored value for key {key}: {reason}")]
    InvalidValue { key: String, reason: String },
}

pub type Result<T> = std::result::Result<T, StoreError>;
