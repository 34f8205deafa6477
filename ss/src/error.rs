//! Storage error types

use thiserror::Error;

/// Errors from storage operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store directory is locked by another process: {0}")]
    Locked(String),

    #[error("Invalid key: {0:?}")]
    InvalidKey(String),

    #[error("Injected write failure for key {0}")]
    Injected(String),
}

/// Result alias for storage operations
pub type StoreResult<T> = Result<T, StoreError>;
