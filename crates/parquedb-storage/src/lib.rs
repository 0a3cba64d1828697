// parquedb-storage - Blob storage, ranged buffers, shared KV
//
// Wraps an OpenDAL operator behind the two seams the rest of the system
// needs: whole-object atomic writes with content ETags (Parquet artifacts),
// and ranged byte reads (the Parquet reader never assumes a file fits in
// memory). Also carries the shared-KV trait used for token replay nonces.

mod blob;
mod buffer;
mod error;
mod kv;

pub use blob::{BlobMeta, BlobStore};
pub use buffer::{AsyncBuffer, BlobBuffer, MemoryBuffer};
pub use error::{Result, StorageError};
pub use kv::{MemoryKv, SharedKv};
