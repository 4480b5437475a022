//! Read-through TTL caches
//!
//! Moka in-memory caches shared by concurrent requests. Entries expire after a
//! fixed time-to-live; there is no other invalidation.

use crate::types::{Canonical, WikiCard};
use moka::sync::Cache;
use std::hash::Hash;
use std::time::Duration;

/// Bounded TTL cache keyed by `K`
#[derive(Clone)]
pub struct TtlCache<K, V>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    inner: Cache<K, V>,
}

impl<K, V> TtlCache<K, V>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Create a cache holding at most `capacity` entries for `ttl` each
    pub fn new(capacity: u64, ttl: Duration) -> Self {
        Self {
            inner: Cache::builder()
                .max_capacity(capacity)
                .time_to_live(ttl)
                .build(),
        }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.inner.get(key)
    }

    pub fn insert(&self, key: K, value: V) {
        self.inner.insert(key, value);
    }

    /// Approximate number of live entries
    pub fn entry_count(&self) -> u64 {
        self.inner.run_pending_tasks();
        self.inner.entry_count()
    }
}

/// Knowledge-Graph results by normalized name; `None` is a confirmed miss
pub type CanonicalCache = TtlCache<String, Option<Canonical>>;

/// Wikipedia cards by title; `None` is a confirmed miss
pub type WikiCache = TtlCache<String, Option<WikiCard>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_then_get() {
        let cache: TtlCache<String, u32> = TtlCache::new(10, Duration::from_secs(60));
        cache.insert("a".to_string(), 1);
        assert_eq!(cache.get(&"a".to_string()), Some(1));
        assert_eq!(cache.get(&"b".to_string()), None);
        assert_eq!(cache.entry_count(), 1);
    }

    #[test]
    fn test_confirmed_miss_is_cached() {
        let cache: CanonicalCache = TtlCache::new(10, Duration::from_secs(60));
        cache.insert("flower".to_string(), None);
        assert_eq!(cache.get(&"flower".to_string()), Some(None));
    }

    #[test]
    fn test_entries_expire() {
        let cache: TtlCache<String, u32> = TtlCache::new(10, Duration::from_millis(20));
        cache.insert("a".to_string(), 1);
        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(cache.get(&"a".to_string()), None);
    }
}
