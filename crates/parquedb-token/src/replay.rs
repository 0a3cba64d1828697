//! Single-use nonce tracking
//!
//! Nonces live in the shared KV under `USED_TOKENS:<jti>` with the token's
//! remaining lifetime as TTL so replay state expires with the token. The
//! local LRU is consulted first and always written, which keeps single-use
//! holding across KV outages in this process.

use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use parquedb_storage::SharedKv;

pub const DEFAULT_NONCE_CAPACITY: usize = 10_000;

const KEY_PREFIX: &str = "USED_TOKENS:";

pub struct ReplayGuard {
    kv: Option<Arc<dyn SharedKv>>,
    /// jti -> expiry ms; bounded, oldest evicted first.
    local: Mutex<LruCache<String, i64>>,
}

impl ReplayGuard {
    pub fn new(kv: Option<Arc<dyn SharedKv>>, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("non-zero after max(1)");
        Self {
            kv,
            local: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// True exactly once per nonce: records it and reports whether it was
    /// fresh.
    pub async fn check_and_consume(&self, jti: &str, ttl: Duration) -> bool {
        let now = chrono::Utc::now().timestamp_millis();
        let expiry = now + ttl.as_millis() as i64;

        {
            let mut local = self.local.lock();
            if local.contains(jti) {
                return false;
            }
            local.put(jti.to_string(), expiry);
        }

        if let Some(kv) = &self.kv {
            let key = format!("{KEY_PREFIX}{jti}");
            match kv.get(&key).await {
                Ok(Some(_)) => return false,
                Ok(None) => {
                    if let Err(e) = kv.put(&key, "1", Some(ttl)).await {
                        tracing::warn!("nonce KV put failed, tracking locally only: {e}");
                    }
                }
                Err(e) => {
                    tracing::warn!("nonce KV read failed, tracking locally only: {e}");
                }
            }
        }
        true
    }

    /// Drop expired local entries; the KV expires its own.
    pub fn sweep(&self) {
        let now = chrono::Utc::now().timestamp_millis();
        let mut local = self.local.lock();
        let expired: Vec<String> = local
            .iter()
            .filter(|(_, expiry)| **expiry <= now)
            .map(|(jti, _)| jti.clone())
            .collect();
        for jti in expired {
            local.pop(&jti);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn consume_is_single_shot() {
        let guard = ReplayGuard::new(None, 16);
        assert!(guard.check_and_consume("a", Duration::from_secs(60)).await);
        assert!(!guard.check_and_consume("a", Duration::from_secs(60)).await);
        assert!(guard.check_and_consume("b", Duration::from_secs(60)).await);
    }

    #[tokio::test]
    async fn capacity_bounds_local_tracking() {
        let guard = ReplayGuard::new(None, 2);
        assert!(guard.check_and_consume("a", Duration::from_secs(60)).await);
        assert!(guard.check_and_consume("b", Duration::from_secs(60)).await);
        assert!(guard.check_and_consume("c", Duration::from_secs(60)).await);
        // "a" was evicted by the cap; only the newest two are still tracked
        assert!(guard.check_and_consume("a", Duration::from_secs(60)).await);
    }

    #[tokio::test]
    async fn sweep_drops_expired_nonces() {
        let guard = ReplayGuard::new(None, 16);
        assert!(guard.check_and_consume("old", Duration::from_millis(0)).await);
        guard.sweep();
        // Expired entry no longer counts as used
        assert!(guard.check_and_consume("old", Duration::from_secs(60)).await);
    }
}
