//! Ranged byte access for readers
//!
//! The Parquet reader obtains bytes exclusively through this interface so it
//! never has to hold a whole file in memory. `slice` always returns a fresh,
//! non-aliased copy.

use async_trait::async_trait;
use bytes::Bytes;
use once_cell::sync::OnceCell;

use crate::blob::BlobStore;
use crate::error::{Result, StorageError};

#[async_trait]
pub trait AsyncBuffer: Send + Sync {
    /// Total object size. Errors with `NotInitialized` before `initialize`.
    fn byte_length(&self) -> Result<u64>;

    /// Establish the object length; idempotent.
    async fn initialize(&self) -> Result<u64>;

    /// Copy of `[start, end)` (`end = None` reads to the end of the object).
    async fn slice(&self, start: u64, end: Option<u64>) -> Result<Bytes>;
}

/// Buffer over a blob-storage object, fetching ranges on demand.
pub struct BlobBuffer {
    store: BlobStore,
    path: String,
    len: OnceCell<u64>,
}

impl BlobBuffer {
    pub fn new(store: BlobStore, path: impl Into<String>) -> Self {
        Self {
            store,
            path: path.into(),
            len: OnceCell::new(),
        }
    }

    /// Construct and initialize in one step.
    pub async fn open(store: BlobStore, path: impl Into<String>) -> Result<Self> {
        let buffer = Self::new(store, path);
        buffer.initialize().await?;
        Ok(buffer)
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

#[async_trait]
impl AsyncBuffer for BlobBuffer {
    fn byte_length(&self) -> Result<u64> {
        self.len.get().copied().ok_or(StorageError::NotInitialized)
    }

    async fn initialize(&self) -> Result<u64> {
        if let Some(len) = self.len.get() {
            return Ok(*len);
        }
        let meta = self.store.stat(&self.path).await?;
        let _ = self.len.set(meta.size);
        Ok(meta.size)
    }

    async fn slice(&self, start: u64, end: Option<u64>) -> Result<Bytes> {
        let len = self.byte_length()?;
        let end = end.unwrap_or(len);
        if start > end || end > len {
            return Err(StorageError::RangeOutOfBounds { start, end, len });
        }
        if start == end {
            return Ok(Bytes::new());
        }
        self.store.get_range(&self.path, start, Some(end)).await
    }
}

/// Buffer over bytes already in memory. Used in tests and for freshly
/// written artifacts that have not round-tripped through storage.
pub struct MemoryBuffer {
    bytes: Bytes,
}

impl MemoryBuffer {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }
}

#[async_trait]
impl AsyncBuffer for MemoryBuffer {
    fn byte_length(&self) -> Result<u64> {
        Ok(self.bytes.len() as u64)
    }

    async fn initialize(&self) -> Result<u64> {
        Ok(self.bytes.len() as u64)
    }

    async fn slice(&self, start: u64, end: Option<u64>) -> Result<Bytes> {
        let len = self.bytes.len() as u64;
        let end = end.unwrap_or(len);
        if start > end || end > len {
            return Err(StorageError::RangeOutOfBounds { start, end, len });
        }
        // Fresh copy, never an alias into the backing buffer
        Ok(Bytes::copy_from_slice(
            &self.bytes[start as usize..end as usize],
        ))
    }
}
