//! TTL cache shielding expensive external calls
//!
//! Keys are derived deterministically from (source, query parameters) or a
//! candidate fingerprint, so identical lookups within the TTL window
//! short-circuit to the stored value. Expired entries are evicted lazily on
//! read and by an optional periodic sweep task. Concurrent writes to the same
//! key are last-writer-wins; entries are idempotent recomputations of the
//! same underlying query, so that is acceptable.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// A stored value with its expiry instant
#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    expires_at: DateTime<Utc>,
}

/// Shared TTL cache handle
///
/// Cloning is cheap; all clones observe the same underlying map.
#[derive(Clone)]
pub struct TtlCache<V: Clone + Send + Sync + 'static> {
    entries: Arc<RwLock<HashMap<String, CacheEntry<V>>>>,
    ttl: Duration,
}

impl<V: Clone + Send + Sync + 'static> TtlCache<V> {
    pub fn new(ttl_secs: u64) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            ttl: Duration::seconds(ttl_secs as i64),
        }
    }

    /// Build a cache key from a source identifier and query parameters
    pub fn key(source: &str, params: &[&str]) -> String {
        format!("{}::{}", source, params.join("::"))
    }

    /// Look up a live entry; expired entries are treated as absent and evicted
    pub async fn get(&self, key: &str) -> Option<V> {
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                None => return None,
                Some(entry) if entry.expires_at > Utc::now() => {
                    return Some(entry.value.clone());
                }
                Some(_) => {} // expired, fall through to evict
            }
        }

        let mut entries = self.entries.write().await;
        // Re-check under the write lock; another writer may have refreshed it
        if let Some(entry) = entries.get(key) {
            if entry.expires_at > Utc::now() {
                return Some(entry.value.clone());
            }
            entries.remove(key);
            tracing::trace!(key = %key, "Evicted expired cache entry");
        }
        None
    }

    /// Store a value with the default TTL
    pub async fn insert(&self, key: impl Into<String>, value: V) {
        self.insert_with_expiry(key, value, Utc::now() + self.ttl).await;
    }

    /// Store a value with an explicit expiry instant
    pub async fn insert_with_expiry(
        &self,
        key: impl Into<String>,
        value: V,
        expires_at: DateTime<Utc>,
    ) {
        let mut entries = self.entries.write().await;
        entries.insert(key.into(), CacheEntry { value, expires_at });
    }

    /// Remove all expired entries; returns how many were evicted
    pub async fn sweep(&self) -> usize {
        let now = Utc::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        before - entries.len()
    }

    /// Number of entries currently stored, including not-yet-swept expired ones
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Spawn a background task sweeping expired entries at a fixed interval
    pub fn spawn_sweeper(&self, interval_secs: u64) -> tokio::task::JoinHandle<()> {
        let cache = self.clone();
        tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(std::time::Duration::from_secs(interval_secs.max(1)));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let evicted = cache.sweep().await;
                if evicted > 0 {
                    tracing::debug!(evicted, "Cache sweep evicted expired entries");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_before_expiry_returns_value() {
        let cache: TtlCache<String> = TtlCache::new(60);
        cache.insert("k", "v".to_string()).await;
        assert_eq!(cache.get("k").await, Some("v".to_string()));
    }

    #[tokio::test]
    async fn test_expired_entry_treated_as_absent() {
        let cache: TtlCache<String> = TtlCache::new(60);
        cache
            .insert_with_expiry("k", "v".to_string(), Utc::now() - Duration::seconds(1))
            .await;

        assert_eq!(cache.get("k").await, None);
        // Lazy eviction removed the entry
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_sweep_evicts_only_expired() {
        let cache: TtlCache<u32> = TtlCache::new(60);
        cache.insert("live", 1).await;
        cache
            .insert_with_expiry("stale", 2, Utc::now() - Duration::seconds(5))
            .await;

        let evicted = cache.sweep().await;
        assert_eq!(evicted, 1);
        assert_eq!(cache.get("live").await, Some(1));
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn test_last_writer_wins_on_same_key() {
        let cache: TtlCache<u32> = TtlCache::new(60);
        cache.insert("k", 1).await;
        cache.insert("k", 2).await;
        assert_eq!(cache.get("k").await, Some(2));
    }

    #[test]
    fn test_key_derivation_is_deterministic() {
        let a = TtlCache::<u32>::key("places_search", &["region:lagos", "restaurant"]);
        let b = TtlCache::<u32>::key("places_search", &["region:lagos", "restaurant"]);
        assert_eq!(a, b);
        let c = TtlCache::<u32>::key("places_search", &["region:abuja", "restaurant"]);
        assert_ne!(a, c);
    }
}
