//! Bounded TTL cache for query results.
//!
//! Owned by the service and invalidated explicitly when a commit changes
//! what a cached answer would be. There is no process-wide cache.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::config::CacheConfig;

struct Entry<V> {
    value: V,
    inserted_at: Instant,
}

/// A key-value cache whose entries expire after a fixed TTL.
pub struct TtlCache<K, V> {
    entries: Mutex<HashMap<K, Entry<V>>>,
    ttl: Duration,
    capacity: usize,
}

impl<K: Eq + Hash + Clone, V: Clone> TtlCache<K, V> {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl: config.ttl,
            capacity: config.capacity,
        }
    }

    /// Look up a live entry. Expired entries are dropped on access.
    pub fn get(&self, key: &K) -> Option<V> {
        let mut entries = self.entries.lock().unwrap();
        let entry = entries.get(key)?;
        if entry.inserted_at.elapsed() < self.ttl {
            return Some(entry.value.clone());
        }
        entries.remove(key);
        None
    }

    /// Insert or refresh an entry.
    ///
    /// When full, expired entries are purged first, then the oldest entry
    /// is evicted.
    pub fn insert(&self, key: K, value: V) {
        if self.capacity == 0 {
            return;
        }
        let mut entries = self.entries.lock().unwrap();
        if !entries.contains_key(&key) && entries.len() >= self.capacity {
            let ttl = self.ttl;
            entries.retain(|_, e| e.inserted_at.elapsed() < ttl);
            if entries.len() >= self.capacity {
                let oldest = entries
                    .iter()
                    .min_by_key(|(_, e)| e.inserted_at)
                    .map(|(k, _)| k.clone());
                if let Some(oldest) = oldest {
                    entries.remove(&oldest);
                }
            }
        }
        entries.insert(
            key,
            Entry {
                value,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Drop one entry. Returns whether it was present.
    pub fn invalidate(&self, key: &K) -> bool {
        self.entries.lock().unwrap().remove(key).is_some()
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap().clear();
    }

    /// Number of stored entries, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(ttl: Duration, capacity: usize) -> TtlCache<u32, &'static str> {
        TtlCache::new(&CacheConfig { ttl, capacity })
    }

    #[test]
    fn test_get_insert_invalidate() {
        let c = cache(Duration::from_secs(60), 8);
        assert_eq!(c.get(&1), None);

        c.insert(1, "one");
        assert_eq!(c.get(&1), Some("one"));

        c.insert(1, "uno");
        assert_eq!(c.get(&1), Some("uno"));
        assert_eq!(c.len(), 1);

        assert!(c.invalidate(&1));
        assert!(!c.invalidate(&1));
        assert_eq!(c.get(&1), None);
    }

    #[test]
    fn test_entries_expire() {
        let c = cache(Duration::from_millis(20), 8);
        c.insert(1, "one");
        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(c.get(&1), None);
        assert!(c.is_empty());
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let c = cache(Duration::from_secs(60), 2);
        c.insert(1, "one");
        std::thread::sleep(Duration::from_millis(2));
        c.insert(2, "two");
        std::thread::sleep(Duration::from_millis(2));
        c.insert(3, "three");

        assert_eq!(c.len(), 2);
        assert_eq!(c.get(&1), None);
        assert_eq!(c.get(&2), Some("two"));
        assert_eq!(c.get(&3), Some("three"));
    }

    #[test]
    fn test_clear() {
        let c = cache(Duration::from_secs(60), 4);
        c.insert(1, "one");
        c.insert(2, "two");
        c.clear();
        assert!(c.is_empty());
    }
}
