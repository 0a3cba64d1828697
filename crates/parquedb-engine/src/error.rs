//! Engine error taxonomy
//!
//! Write-path errors abort before any durable write; failures after the
//! durable WAL write (invalidation, tail processing) are logged and
//! swallowed because WAL replay re-signals on recovery.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("entity not found: {ns}/{id}")]
    NotFound { ns: String, id: String },

    #[error("version mismatch: expected {expected}, found {actual}")]
    VersionMismatch { expected: u64, actual: u64 },

    #[error("$type is required and must be a non-empty string")]
    MissingType,

    #[error("name is required and must be a non-empty string")]
    MissingName,

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("a transaction is already active")]
    TransactionActive,

    #[error("no transaction is active")]
    NoTransaction,

    /// Retryable I/O failure from blob storage.
    #[error(transparent)]
    Storage(#[from] parquedb_storage::StorageError),

    #[error(transparent)]
    Columnar(#[from] parquedb_columnar::ColumnarError),

    /// WAL sidecar failure.
    #[error("wal failure: {0}")]
    Wal(#[from] rusqlite::Error),

    /// Internal invariant violated, e.g. a WAL sequence gap.
    #[error("fatal: {0}")]
    Fatal(String),
}

impl EngineError {
    pub fn is_transient(&self) -> bool {
        match self {
            EngineError::Storage(e) => e.is_transient(),
            EngineError::Columnar(e) => e.is_transient(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
