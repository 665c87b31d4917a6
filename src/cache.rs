//! Bounded in-memory result cache.
//!
//! Plugin mappings can be expensive (they may read a whole signal from an
//! external data source), so their results are memoised in a [`RamCache`].
//! The cache is bounded by `max_items`. When it is full, the `drop_items`
//! oldest entries are evicted together before the new entry is admitted.
//!
//! Entries are never overwritten: inserting an existing key is an error.
//! Reads hand out deep copies so the cache keeps ownership of its buffers.

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::{debug, trace};

use crate::buffer::TypedBuffer;
use crate::error::{Result, TokamapError};

/// Default maximum number of cached results.
pub const DEFAULT_MAX_ITEMS: usize = 100;
/// Default number of entries evicted when the cache is full.
pub const DEFAULT_DROP_ITEMS: usize = 10;

/// Cache handle shared between the engine and the plugin mappings it builds.
pub type SharedCache = Arc<Mutex<RamCache>>;

/// Insertion-ordered key to buffer store with FIFO batch eviction.
#[derive(Debug)]
pub struct RamCache {
    max_items: usize,
    drop_items: usize,
    entries: HashMap<String, TypedBuffer>,
    /// Keys in insertion order, oldest at the front.
    order: VecDeque<String>,
}

impl Default for RamCache {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ITEMS, DEFAULT_DROP_ITEMS)
    }
}

impl RamCache {
    /// Create a cache holding at most `max_items`, evicting `drop_items` at a time.
    ///
    /// Both limits are clamped to at least one.
    pub fn new(max_items: usize, drop_items: usize) -> Self {
        let max_items = max_items.max(1);
        Self {
            max_items,
            drop_items: drop_items.max(1),
            entries: HashMap::with_capacity(max_items),
            order: VecDeque::with_capacity(max_items),
        }
    }

    /// Wrap a new cache for sharing.
    pub fn shared(max_items: usize, drop_items: usize) -> SharedCache {
        Arc::new(Mutex::new(Self::new(max_items, drop_items)))
    }

    /// Insert `value` under `key`.
    ///
    /// Fails without touching the cache if `key` is already present. If the
    /// cache is full, the oldest `drop_items` entries are evicted first.
    pub fn add(&mut self, key: impl Into<String>, value: TypedBuffer) -> Result<()> {
        let key = key.into();
        if self.entries.contains_key(&key) {
            return Err(TokamapError::DuplicateCacheKey(key));
        }
        if self.entries.len() >= self.max_items {
            self.evict();
        }
        self.order.push_back(key.clone());
        self.entries.insert(key.clone(), value);
        debug!(
            key = %key,
            size = self.entries.len(),
            max = self.max_items,
            "Entry added to cache"
        );
        Ok(())
    }

    fn evict(&mut self) {
        let count = self.drop_items.min(self.order.len());
        for key in self.order.drain(..count) {
            self.entries.remove(&key);
            trace!(key = %key, "Evicted cache entry");
        }
        debug!(evicted = count, "Cache full, dropped oldest entries");
    }

    /// Whether `key` is cached.
    pub fn has(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Deep copy of the buffer cached under `key`, or `None` if absent.
    pub fn copy_out(&self, key: &str) -> Option<TypedBuffer> {
        let found = self.entries.get(key).cloned();
        if let Some(buffer) = &found {
            debug!(key = %key, data = %buffer, "Copying result out of cache");
        }
        found
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Maximum number of entries.
    pub fn capacity(&self) -> usize {
        self.max_items
    }

    /// Number of entries evicted per batch.
    pub fn drop_count(&self) -> usize {
        self.drop_items
    }

    /// Keys in insertion order, oldest first.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    /// Remove every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    fn buffer(value: i32) -> TypedBuffer {
        TypedBuffer::scalar(value)
    }

    #[test]
    fn evicts_oldest_first() {
        let mut cache = RamCache::new(3, 1);
        for (i, key) in ["a", "b", "c", "d"].into_iter().enumerate() {
            cache.add(key, buffer(i as i32)).unwrap();
        }
        assert_eq!(cache.keys().collect::<Vec<_>>(), vec!["b", "c", "d"]);
        assert!(!cache.has("a"));
    }

    #[test]
    fn full_cache_drops_a_whole_batch() {
        let mut cache = RamCache::new(5, 3);
        for i in 0..5 {
            cache.add(format!("k{i}"), buffer(i)).unwrap();
        }
        cache.add("k5", buffer(5)).unwrap();
        assert_eq!(cache.len(), 3);
        assert_eq!(cache.keys().collect::<Vec<_>>(), vec!["k3", "k4", "k5"]);
    }

    #[test]
    fn duplicate_key_is_rejected_without_mutation() {
        let mut cache = RamCache::new(2, 1);
        cache.add("a", buffer(1)).unwrap();
        cache.add("b", buffer(2)).unwrap();

        let err = cache.add("a", buffer(99)).unwrap_err();
        assert!(matches!(err, TokamapError::DuplicateCacheKey(ref k) if k == "a"));
        assert_eq!(cache.keys().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(cache.copy_out("a").unwrap().values::<i32>().unwrap(), vec![1]);
    }

    #[test]
    fn copy_out_returns_an_independent_copy() {
        let mut cache = RamCache::default();
        cache.add("signal", TypedBuffer::from_vec(vec![1.0f64, 2.0])).unwrap();

        let mut copy = cache.copy_out("signal").unwrap();
        copy.map_in_place(|v: f64| v * 10.0).unwrap();

        assert_eq!(copy.values::<f64>().unwrap(), vec![10.0, 20.0]);
        assert_eq!(
            cache.copy_out("signal").unwrap().values::<f64>().unwrap(),
            vec![1.0, 2.0]
        );
    }

    #[test]
    fn missing_key_is_none() {
        let cache = RamCache::default();
        assert!(cache.copy_out("nothing").is_none());
        assert!(!cache.has("nothing"));
    }

    #[test]
    fn drop_count_larger_than_contents_empties_cache() {
        let mut cache = RamCache::new(1, 10);
        cache.add("a", buffer(1)).unwrap();
        cache.add("b", buffer(2)).unwrap();
        assert_eq!(cache.keys().collect::<Vec<_>>(), vec!["b"]);
    }

    #[test]
    #[traced_test]
    fn admission_is_logged() {
        let mut cache = RamCache::new(2, 1);
        cache.add("magnetics/flux_loop", buffer(1)).unwrap();
        assert!(logs_contain("Entry added to cache"));
    }
}
