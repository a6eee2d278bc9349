//! Error types for the fleet state store.

use thiserror::Error;

/// Result type alias for state store operations.
pub type StateResult<T> = Result<T, StateError>;

/// Storage-level failures. Domain conflicts live in the crates above this one.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to open state database: {0}")]
    Open(String),

    #[error("state transaction failed: {0}")]
    Transaction(String),

    #[error("state table unavailable: {0}")]
    Table(String),

    #[error("state read failed: {0}")]
    Read(String),

    #[error("state write failed: {0}")]
    Write(String),

    #[error("failed to encode value: {0}")]
    Serialize(String),

    #[error("failed to decode stored value: {0}")]
    Deserialize(String),
}
