//! # Concurrent Cache
//!
//! A generic key/value store guarded by a single `parking_lot::RwLock`. Readers run in
//! parallel, writers are exclusive, and every operation is linearizable with respect to
//! the others. There is no eviction: entries live until deleted or until the owning
//! process exits.
//!
//! Iteration ([`ConcurrentCache::values`], [`ConcurrentCache::entries`]) follows insertion
//! order. Overwriting a key keeps its original position; deleting and re-inserting a key
//! moves it to the end.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::hash::Hash;

struct Slot<V> {
    seq: u64,
    value: V,
}

struct Inner<K, V> {
    slots: HashMap<K, Slot<V>>,
    next_seq: u64,
}

/// Thread-safe key/value cache shared by the remapper and the tenant caches
pub struct ConcurrentCache<K, V> {
    inner: RwLock<Inner<K, V>>,
}

impl<K, V> ConcurrentCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                slots: HashMap::new(),
                next_seq: 0,
            }),
        }
    }

    /// Insert or overwrite `key`. Readers observe either the old or the new value.
    pub fn set(&self, key: K, value: V) {
        let mut inner = self.inner.write();
        if let Some(slot) = inner.slots.get_mut(&key) {
            slot.value = value;
            return;
        }

        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.slots.insert(key, Slot { seq, value });
    }

    /// Get a copy of the value stored under `key`
    pub fn get(&self, key: &K) -> Option<V> {
        self.inner.read().slots.get(key).map(|slot| slot.value.clone())
    }

    /// Remove `key` if present. Returns whether something was removed.
    pub fn delete(&self, key: &K) -> bool {
        self.inner.write().slots.remove(key).is_some()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.inner.read().slots.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.inner.read().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keys in insertion order
    pub fn keys(&self) -> Vec<K> {
        self.entries().into_iter().map(|(k, _)| k).collect()
    }

    /// Values in insertion order, taken from one consistent snapshot
    pub fn values(&self) -> Vec<V> {
        self.entries().into_iter().map(|(_, v)| v).collect()
    }

    /// Key/value pairs in insertion order, taken from one consistent snapshot
    pub fn entries(&self) -> Vec<(K, V)> {
        let inner = self.inner.read();
        let mut snapshot: Vec<(u64, K, V)> = inner
            .slots
            .iter()
            .map(|(k, slot)| (slot.seq, k.clone(), slot.value.clone()))
            .collect();
        drop(inner);

        snapshot.sort_by_key(|(seq, _, _)| *seq);
        snapshot.into_iter().map(|(_, k, v)| (k, v)).collect()
    }

    pub fn clear(&self) {
        self.inner.write().slots.clear();
    }
}

impl<K, V> Default for ConcurrentCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> std::fmt::Debug for ConcurrentCache<K, V>
where
    K: Eq + Hash + Clone + std::fmt::Debug,
    V: Clone,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConcurrentCache")
            .field("keys", &self.keys())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_basic_operations() {
        let cache: ConcurrentCache<String, u32> = ConcurrentCache::new();

        cache.set("k".to_string(), 7);
        assert_eq!(cache.get(&"k".to_string()), Some(7));

        assert!(cache.delete(&"k".to_string()));
        assert_eq!(cache.get(&"k".to_string()), None);
    }

    #[test]
    fn test_delete_absent_key_is_noop() {
        let cache: ConcurrentCache<String, u32> = ConcurrentCache::new();
        assert!(!cache.delete(&"missing".to_string()));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_overwrite_keeps_position() {
        let cache = ConcurrentCache::new();
        cache.set("a", 1);
        cache.set("b", 2);
        cache.set("a", 10);

        assert_eq!(cache.entries(), vec![("a", 10), ("b", 2)]);
    }

    #[test]
    fn test_reinsert_after_delete_moves_to_end() {
        let cache = ConcurrentCache::new();
        cache.set("a", 1);
        cache.set("b", 2);
        cache.delete(&"a");
        cache.set("a", 3);

        assert_eq!(cache.keys(), vec!["b", "a"]);
    }

    #[test]
    fn test_concurrent_writers() {
        let cache = Arc::new(ConcurrentCache::new());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let cache = cache.clone();
                std::thread::spawn(move || {
                    for i in 0..100 {
                        cache.set(t * 1000 + i, i);
                        if i % 2 == 0 {
                            cache.delete(&(t * 1000 + i));
                        }
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(cache.len(), 8 * 50);
        assert!(cache.get(&0).is_none());
        assert_eq!(cache.get(&1), Some(1));
    }
}
