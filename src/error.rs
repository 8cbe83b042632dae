//! Error types for the document store.

use thiserror::Error;

/// Main error type for store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Missing or non-live item, commit, or document; also raised when a
    /// single-result lookup matched zero or more than one record.
    #[error("not found: {0}")]
    NotFound(String),

    /// Caller content used a reserved-prefix field name.
    #[error("internal field in body: {0}")]
    InternalFields(String),

    /// Backend did not acknowledge an insert.
    #[error("could not insert into '{0}'")]
    CouldNotInsert(&'static str),

    /// Backend did not acknowledge an update.
    #[error("could not update '{0}'")]
    CouldNotUpdate(&'static str),

    /// Invariant violation inside a multi-step operation.
    #[error("runtime error: {0}")]
    Runtime(String),

    /// Database opened before its backing path exists.
    #[error("database not initialized")]
    NotInitialized,

    #[error("database is locked by another process")]
    Locked,

    #[error("invalid database format: {0}")]
    InvalidFormat(String),

    #[error("corruption detected: {0}")]
    Corruption(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("deserialization error: {0}")]
    Deserialization(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::encode::Error> for StoreError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for StoreError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        StoreError::Deserialization(e.to_string())
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
