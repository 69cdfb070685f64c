use sha2::{Digest, Sha256};
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

pub const DEFAULT_CACHE_TTL_SECONDS: u64 = 300;
pub const DEFAULT_CACHE_MAX_ENTRIES: usize = 128;

/// Normalizing fingerprint of draft text, used as the cache key.
/// Case and whitespace differences collapse so trivial retyping of the
/// same draft reuses a cached rewrite.
pub fn fingerprint(text: &str) -> String {
    let normalized = text
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    let digest = Sha256::digest(normalized.as_bytes());
    hex::encode(digest)
}

struct CacheEntry<V> {
    value: V,
    created: Instant,
}

/// Bounded key/value store with TTL expiry and oldest-first eviction.
/// FIFO rather than LRU: reuse locality is short-lived by construction
/// of the fingerprint, so recency tracking buys nothing here.
pub struct FifoCache<V> {
    ttl: Duration,
    capacity: usize,
    entries: HashMap<String, CacheEntry<V>>,
    order: VecDeque<String>,
}

impl<V: Clone> FifoCache<V> {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        FifoCache {
            ttl,
            capacity: capacity.max(1),
            entries: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    /// A miss (absent or expired) is a normal outcome, never an error.
    pub fn get(&mut self, key: &str) -> Option<V> {
        let expired = match self.entries.get(key) {
            Some(entry) => entry.created.elapsed() >= self.ttl,
            None => return None,
        };
        if expired {
            self.remove(key);
            return None;
        }
        self.entries.get(key).map(|e| e.value.clone())
    }

    pub fn put(&mut self, key: String, value: V) {
        if let Some(entry) = self.entries.get_mut(&key) {
            // Re-inserting refreshes the value but keeps the original
            // queue position, so the entry still ages out FIFO.
            entry.value = value;
            entry.created = Instant::now();
            return;
        }
        while self.entries.len() >= self.capacity {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.entries.remove(&oldest);
                }
                None => break,
            }
        }
        self.order.push_back(key.clone());
        self.entries.insert(
            key,
            CacheEntry {
                value,
                created: Instant::now(),
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn remove(&mut self, key: &str) {
        self.entries.remove(key);
        self.order.retain(|k| k != key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_ignores_case_and_whitespace() {
        assert_eq!(
            fingerprint("Summarize   This Report"),
            fingerprint("summarize this\treport")
        );
        assert_ne!(fingerprint("summarize this"), fingerprint("summarize that"));
    }

    #[test]
    fn fingerprint_preserves_token_order() {
        assert_ne!(fingerprint("alpha beta"), fingerprint("beta alpha"));
    }

    #[test]
    fn get_after_put_returns_value() {
        let mut cache: FifoCache<Vec<String>> =
            FifoCache::new(Duration::from_secs(60), 4);
        cache.put("k1".to_string(), vec!["v".to_string()]);
        assert_eq!(cache.get("k1"), Some(vec!["v".to_string()]));
        assert_eq!(cache.get("missing"), None);
    }

    #[test]
    fn expired_entries_miss() {
        let mut cache: FifoCache<u32> = FifoCache::new(Duration::from_millis(0), 4);
        cache.put("k".to_string(), 7);
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(cache.get("k"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn capacity_evicts_oldest_first() {
        let mut cache: FifoCache<u32> = FifoCache::new(Duration::from_secs(60), 2);
        cache.put("a".to_string(), 1);
        cache.put("b".to_string(), 2);
        cache.put("c".to_string(), 3);

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.get("b"), Some(2));
        assert_eq!(cache.get("c"), Some(3));
    }

    #[test]
    fn reinsert_keeps_original_queue_position() {
        let mut cache: FifoCache<u32> = FifoCache::new(Duration::from_secs(60), 2);
        cache.put("a".to_string(), 1);
        cache.put("b".to_string(), 2);
        cache.put("a".to_string(), 10);
        cache.put("c".to_string(), 3);

        // "a" was refreshed in value only; it is still the oldest and
        // should have been the one evicted.
        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.get("b"), Some(2));
        assert_eq!(cache.get("c"), Some(3));
    }
}
