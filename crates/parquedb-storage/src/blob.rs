//! Blob store over an OpenDAL operator
//!
//! The one hard guarantee required of a backend is atomic replace of a full
//! object by path. Parquet artifacts are immutable once written; compaction
//! writes a new object over the old path.

use bytes::Bytes;

use crate::error::{Result, StorageError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobMeta {
    pub size: u64,
    pub etag: Option<String>,
}

/// Handle to one blob-storage backend.
#[derive(Clone)]
pub struct BlobStore {
    op: opendal::Operator,
}

impl BlobStore {
    pub fn new(op: opendal::Operator) -> Self {
        Self { op }
    }

    /// In-memory backend, used by tests and ephemeral shards.
    pub fn memory() -> Result<Self> {
        let op = opendal::Operator::new(opendal::services::Memory::default())?.finish();
        Ok(Self::new(op))
    }

    /// Filesystem backend rooted at `root`.
    #[cfg(feature = "services-fs")]
    pub fn fs(root: &str) -> Result<Self> {
        let builder = opendal::services::Fs::default().root(root);
        let op = opendal::Operator::new(builder)?.finish();
        Ok(Self::new(op))
    }

    /// S3-compatible backend.
    #[cfg(feature = "services-s3")]
    pub fn s3(bucket: &str, region: &str, endpoint: Option<&str>) -> Result<Self> {
        let mut builder = opendal::services::S3::default().bucket(bucket).region(region);
        if let Some(endpoint) = endpoint {
            builder = builder.endpoint(endpoint);
        }
        let op = opendal::Operator::new(builder)?.finish();
        Ok(Self::new(op))
    }

    pub fn operator(&self) -> &opendal::Operator {
        &self.op
    }

    /// Atomic full-object write. Returns the content ETag (hex blake3 of the
    /// bytes), stable across backends.
    pub async fn put(&self, path: &str, bytes: Bytes) -> Result<String> {
        let etag = hex::encode(blake3::hash(&bytes).as_bytes());
        self.op
            .write(path, bytes)
            .await
            .map_err(|e| StorageError::from_opendal(e, path))?;
        tracing::debug!("wrote blob '{}' (etag {})", path, &etag[..12]);
        Ok(etag)
    }

    pub async fn get(&self, path: &str) -> Result<Bytes> {
        let buffer = self
            .op
            .read(path)
            .await
            .map_err(|e| StorageError::from_opendal(e, path))?;
        Ok(buffer.to_bytes())
    }

    /// Ranged read; `end` is exclusive and `None` reads to the end.
    pub async fn get_range(&self, path: &str, start: u64, end: Option<u64>) -> Result<Bytes> {
        let range = match end {
            Some(end) => start..end,
            None => {
                let meta = self.stat(path).await?;
                start..meta.size
            }
        };
        let buffer = self
            .op
            .read_with(path)
            .range(range)
            .await
            .map_err(|e| StorageError::from_opendal(e, path))?;
        Ok(buffer.to_bytes())
    }

    pub async fn delete(&self, path: &str) -> Result<()> {
        self.op
            .delete(path)
            .await
            .map_err(|e| StorageError::from_opendal(e, path))
    }

    pub async fn exists(&self, path: &str) -> Result<bool> {
        self.op
            .exists(path)
            .await
            .map_err(|e| StorageError::from_opendal(e, path))
    }

    pub async fn stat(&self, path: &str) -> Result<BlobMeta> {
        let meta = self
            .op
            .stat(path)
            .await
            .map_err(|e| StorageError::from_opendal(e, path))?;
        Ok(BlobMeta {
            size: meta.content_length(),
            etag: meta.etag().map(str::to_string),
        })
    }
}
