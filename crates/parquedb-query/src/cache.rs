//! Tiered read cache
//!
//! The read path looks up whole artifacts by versioned key before touching
//! blob storage. Deployments layer tiers (edge, CDN, worker cache storage);
//! the executor only needs to know which tier answered so stats can report
//! hit ratios per tier. A miss everywhere is a primary fetch.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheTier {
    Edge,
    Cdn,
    CacheStorage,
    Primary,
}

#[async_trait]
pub trait TieredCache: Send + Sync {
    async fn get(&self, key: &str) -> Option<(Bytes, CacheTier)>;
    async fn put(&self, key: &str, bytes: &Bytes);
}

/// Single-tier in-process cache; answers as cache-storage.
#[derive(Default)]
pub struct MemoryQueryCache {
    entries: Mutex<HashMap<String, Bytes>>,
}

#[async_trait]
impl TieredCache for MemoryQueryCache {
    async fn get(&self, key: &str) -> Option<(Bytes, CacheTier)> {
        self.entries
            .lock()
            .get(key)
            .cloned()
            .map(|bytes| (bytes, CacheTier::CacheStorage))
    }

    async fn put(&self, key: &str, bytes: &Bytes) {
        self.entries.lock().insert(key.to_string(), bytes.clone());
    }
}
