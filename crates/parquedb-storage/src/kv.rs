//! Shared key-value interface
//!
//! Token replay nonces live in a KV shared across processes. Backends may
//! fail; callers fall back to in-process tracking when they do.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::error::Result;

#[async_trait]
pub trait SharedKv: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn put(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;
    async fn delete(&self, key: &str) -> Result<()>;
}

/// In-process KV with lazy TTL expiry.
#[derive(Default)]
pub struct MemoryKv {
    entries: Mutex<HashMap<String, (String, Option<Instant>)>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    fn sweep(entries: &mut HashMap<String, (String, Option<Instant>)>) {
        let now = Instant::now();
        entries.retain(|_, (_, deadline)| deadline.map_or(true, |d| d > now));
    }
}

#[async_trait]
impl SharedKv for MemoryKv {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut entries = self.entries.lock();
        Self::sweep(&mut entries);
        Ok(entries.get(key).map(|(v, _)| v.clone()))
    }

    async fn put(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let deadline = ttl.map(|ttl| Instant::now() + ttl);
        self.entries
            .lock()
            .insert(key.to_string(), (value.to_string(), deadline));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.lock().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_get_delete() {
        let kv = MemoryKv::new();
        kv.put("a", "1", None).await.unwrap();
        assert_eq!(kv.get("a").await.unwrap().as_deref(), Some("1"));
        kv.delete("a").await.unwrap();
        assert_eq!(kv.get("a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn entries_expire() {
        let kv = MemoryKv::new();
        kv.put("gone", "1", Some(Duration::from_millis(0)))
            .await
            .unwrap();
        kv.put("kept", "2", Some(Duration::from_secs(3600)))
            .await
            .unwrap();
        assert_eq!(kv.get("gone").await.unwrap(), None);
        assert_eq!(kv.get("kept").await.unwrap().as_deref(), Some("2"));
    }
}
