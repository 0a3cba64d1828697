//! Columnar layer errors

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ColumnarError {
    /// Parquet file absent on the read path. Surfaces as a domain error, not
    /// a generic failure.
    #[error("dataset not found: {path}")]
    DatasetNotFound { path: String },

    /// Footer or page data unreadable.
    #[error("corrupt parquet data: {0}")]
    Corruption(String),

    /// Row or option shape the writer cannot express.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error(transparent)]
    Arrow(#[from] arrow::error::ArrowError),

    #[error(transparent)]
    Storage(#[from] parquedb_storage::StorageError),
}

impl ColumnarError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ColumnarError::Storage(e) if e.is_transient())
    }
}

pub type Result<T> = std::result::Result<T, ColumnarError>;
