//! Storage error types

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    /// Object absent at the given path.
    #[error("object not found: {path}")]
    NotFound { path: String },

    /// Buffer used before `initialize` established its length.
    #[error("buffer not initialized")]
    NotInitialized,

    /// Requested range falls outside the object.
    #[error("range {start}..{end} out of bounds for {len}-byte object")]
    RangeOutOfBounds { start: u64, end: u64, len: u64 },

    /// Backend I/O failure; retryable.
    #[error("storage I/O failure: {0}")]
    Io(#[from] opendal::Error),

    /// KV backend failure; callers fall back to in-process state.
    #[error("kv failure: {0}")]
    Kv(String),
}

impl StorageError {
    pub fn from_opendal(err: opendal::Error, path: &str) -> Self {
        if err.kind() == opendal::ErrorKind::NotFound {
            StorageError::NotFound {
                path: path.to_string(),
            }
        } else {
            StorageError::Io(err)
        }
    }

    /// True when retrying the operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StorageError::Io(_) | StorageError::Kv(_))
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;
