//! Per-namespace invalidation versions and path-scoped purges

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};

/// Pending signals kept per process; overflow drops the oldest.
pub const PENDING_SIGNAL_CAP: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidationType {
    Entity,
    Relationship,
    Full,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOp {
    Create,
    Update,
    Delete,
    Link,
    Unlink,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidationSignal {
    pub ns: String,
    pub kind: InvalidationType,
    /// Wall-clock ms.
    pub ts: i64,
    /// Namespace version after this signal.
    pub version: u64,
    pub entity_id: Option<String>,
}

#[derive(Default)]
struct Inner {
    versions: HashMap<String, u64>,
    pending: VecDeque<InvalidationSignal>,
}

/// Monotonic per-namespace versioning, owned by the shard.
#[derive(Default)]
pub struct CacheInvalidator {
    inner: Mutex<Inner>,
}

impl CacheInvalidator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one successful mutation: bump the namespace version by exactly
    /// one and push a signal. Returns the new version.
    pub fn signal(
        &self,
        ns: &str,
        kind: InvalidationType,
        entity_id: Option<String>,
    ) -> u64 {
        let mut inner = self.inner.lock();
        let version = inner.versions.entry(ns.to_string()).or_insert(0);
        *version += 1;
        let version = *version;

        inner.pending.push_back(InvalidationSignal {
            ns: ns.to_string(),
            kind,
            ts: chrono::Utc::now().timestamp_millis(),
            version,
            entity_id,
        });
        while inner.pending.len() > PENDING_SIGNAL_CAP {
            inner.pending.pop_front();
        }
        version
    }

    pub fn current_version(&self, ns: &str) -> u64 {
        self.inner.lock().versions.get(ns).copied().unwrap_or(0)
    }

    pub fn all_versions(&self) -> HashMap<String, u64> {
        self.inner.lock().versions.clone()
    }

    /// Signals, optionally scoped to one namespace and to versions after
    /// `since_version`.
    pub fn pending(&self, ns: Option<&str>, since_version: Option<u64>) -> Vec<InvalidationSignal> {
        self.inner
            .lock()
            .pending
            .iter()
            .filter(|s| ns.is_none_or(|ns| s.ns == ns))
            .filter(|s| since_version.is_none_or(|v| s.version > v))
            .cloned()
            .collect()
    }

    /// True when a worker that last saw `worker_version` must refetch.
    pub fn should_invalidate(&self, ns: &str, worker_version: u64) -> bool {
        self.current_version(ns) > worker_version
    }

    /// Versioned cache key: upstream caches treat a new version as a miss.
    pub fn versioned_key(&self, path: &str, ns: &str) -> String {
        crate::keys::build_key(path, Some(self.current_version(ns)), None)
    }
}

/// Read-side cache entries, deletable by exact key.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Option<Bytes>;
    async fn put(&self, key: &str, value: Bytes);
    async fn delete(&self, key: &str);
}

/// The fixed set of cache paths a namespace mutation can touch.
pub fn invalidation_paths(ns: &str) -> Vec<String> {
    let data = format!("data/{ns}/data.parquet");
    vec![
        data.clone(),
        format!("indexes/bloom/{ns}.bloom"),
        format!("rels/forward/{ns}.parquet"),
        format!("rels/reverse/{ns}.parquet"),
        format!("{data}#footer"),
        format!("{data}#metadata"),
    ]
}

impl CacheInvalidator {
    /// Delete the cache entries a completed write can have staled.
    /// Link/unlink only touch the relationship artifacts.
    pub async fn invalidate_after_write(
        &self,
        store: &dyn CacheStore,
        ns: &str,
        op: WriteOp,
    ) -> usize {
        let paths: Vec<String> = match op {
            WriteOp::Link | WriteOp::Unlink => vec![
                format!("rels/forward/{ns}.parquet"),
                format!("rels/reverse/{ns}.parquet"),
            ],
            _ => invalidation_paths(ns),
        };

        for path in &paths {
            store.delete(path).await;
        }
        tracing::debug!("invalidated {} cache paths for ns '{}'", paths.len(), ns);
        paths.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct RecordingStore {
        deleted: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl CacheStore for RecordingStore {
        async fn get(&self, _key: &str) -> Option<Bytes> {
            None
        }
        async fn put(&self, _key: &str, _value: Bytes) {}
        async fn delete(&self, key: &str) {
            self.deleted.lock().push(key.to_string());
        }
    }

    #[test]
    fn versions_start_at_zero_and_increment_by_one() {
        let inv = CacheInvalidator::new();
        assert_eq!(inv.current_version("posts"), 0);

        assert_eq!(inv.signal("posts", InvalidationType::Entity, None), 1);
        assert_eq!(inv.signal("posts", InvalidationType::Entity, None), 2);
        assert_eq!(inv.current_version("posts"), 2);
        assert_eq!(inv.current_version("users"), 0);

        let versions = inv.all_versions();
        assert_eq!(versions.get("posts"), Some(&2));
    }

    #[test]
    fn should_invalidate_compares_worker_version() {
        let inv = CacheInvalidator::new();
        inv.signal("posts", InvalidationType::Entity, None);
        assert!(inv.should_invalidate("posts", 0));
        assert!(!inv.should_invalidate("posts", 1));
        assert!(!inv.should_invalidate("users", 0));
    }

    #[test]
    fn pending_is_scoped_and_bounded() {
        let inv = CacheInvalidator::new();
        for i in 0..(PENDING_SIGNAL_CAP + 20) {
            let ns = if i % 2 == 0 { "a" } else { "b" };
            inv.signal(ns, InvalidationType::Entity, Some(format!("id{i}")));
        }

        let all = inv.pending(None, None);
        assert_eq!(all.len(), PENDING_SIGNAL_CAP);

        let only_a = inv.pending(Some("a"), None);
        assert!(only_a.iter().all(|s| s.ns == "a"));

        let since = inv.pending(Some("a"), Some(55));
        assert!(since.iter().all(|s| s.version > 55));
    }

    #[test]
    fn versioned_keys_embed_current_version() {
        let inv = CacheInvalidator::new();
        inv.signal("posts", InvalidationType::Entity, None);
        assert_eq!(
            inv.versioned_key("data/posts/data.parquet", "posts"),
            "data/posts/data.parquet?v=1"
        );
    }

    #[test]
    fn path_set_is_fixed() {
        let paths = invalidation_paths("posts");
        assert_eq!(
            paths,
            vec![
                "data/posts/data.parquet".to_string(),
                "indexes/bloom/posts.bloom".to_string(),
                "rels/forward/posts.parquet".to_string(),
                "rels/reverse/posts.parquet".to_string(),
                "data/posts/data.parquet#footer".to_string(),
                "data/posts/data.parquet#metadata".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn link_ops_only_touch_relationship_paths() {
        let inv = CacheInvalidator::new();
        let store = RecordingStore {
            deleted: Mutex::new(Vec::new()),
        };

        let n = inv
            .invalidate_after_write(&store, "posts", WriteOp::Link)
            .await;
        assert_eq!(n, 2);
        {
            let deleted = store.deleted.lock();
            assert!(deleted.iter().all(|p| p.starts_with("rels/")));
        }

        store.deleted.lock().clear();
        let n = inv
            .invalidate_after_write(&store, "posts", WriteOp::Update)
            .await;
        assert_eq!(n, 6);
    }
}
