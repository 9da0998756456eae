//! Open-chaining hash map with pluggable key handling.
//!
//! The map does not require `K: Hash + Eq`. Cloning, comparison and
//! hashing are supplied through a [`KeyOps`] implementation instead,
//! because the entities stored here (reference-counted identity records)
//! define equality per use site: the credential cache compares the
//! identity triple by value while cloning is a cheap reference-count
//! acquire.
//!
//! # Key contract
//!
//! A key passed by reference to [`ChainMap::entry`], [`ChainMap::get`] or
//! [`ChainMap::remove`] is never mutated and never retained beyond what
//! [`KeyOps::clone_key`] produces. Removal invalidates only the removed
//! entry.

/// Pluggable key operations for [`ChainMap`].
pub trait KeyOps<K> {
    /// Produces the owned key stored inside the map when an entry is
    /// inserted.
    fn clone_key(&self, key: &K) -> K;

    /// Returns `true` if the two keys are equal.
    fn eq(&self, lhs: &K, rhs: &K) -> bool;

    /// Hashes a key. Equal keys must hash equally regardless of how they
    /// were constructed.
    fn hash(&self, key: &K) -> u64;
}

/// Initial bucket count.
const DEFAULT_BUCKETS: usize = 64;

/// Open-chaining hash map.
///
/// Entries hang off their bucket in insertion order; lookups walk the
/// chain with [`KeyOps::eq`]. The table doubles once a chain-heavy load is
/// reached, rehashing every entry.
#[derive(Debug)]
pub struct ChainMap<K, V, O: KeyOps<K>> {
    buckets: Vec<Vec<(K, V)>>,
    len: usize,
    ops: O,
}

impl<K, V, O: KeyOps<K>> ChainMap<K, V, O> {
    /// Creates an empty map with the default bucket count.
    #[must_use]
    pub fn new(ops: O) -> Self {
        Self::with_buckets(ops, DEFAULT_BUCKETS)
    }

    /// Creates an empty map with `buckets` chains.
    ///
    /// # Panics
    ///
    /// Panics if `buckets` is zero.
    #[must_use]
    pub fn with_buckets(ops: O, buckets: usize) -> Self {
        assert!(buckets > 0, "bucket count must be non-zero");
        Self {
            buckets: (0..buckets).map(|_| Vec::new()).collect(),
            len: 0,
            ops,
        }
    }

    /// Number of stored entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if the map holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn bucket_of(&self, key: &K) -> usize {
        (self.ops.hash(key) % self.buckets.len() as u64) as usize
    }

    fn grow(&mut self) {
        let next = self.buckets.len() * 2;
        let old = std::mem::replace(&mut self.buckets, (0..next).map(|_| Vec::new()).collect());
        for (key, value) in old.into_iter().flatten() {
            let bucket = self.bucket_of(&key);
            self.buckets[bucket].push((key, value));
        }
    }

    /// Returns the value for `key`, inserting a default entry if absent.
    ///
    /// The returned reference points at the slot inside the map, so the
    /// caller can populate a freshly inserted entry in place.
    pub fn entry(&mut self, key: &K) -> &mut V
    where
        V: Default,
    {
        if self.len >= self.buckets.len() * 2 {
            self.grow();
        }
        let bucket = self.bucket_of(key);
        let chain = &self.buckets[bucket];
        if let Some(pos) = chain.iter().position(|(k, _)| self.ops.eq(k, key)) {
            return &mut self.buckets[bucket][pos].1;
        }
        let owned = self.ops.clone_key(key);
        self.buckets[bucket].push((owned, V::default()));
        self.len += 1;
        let last = self.buckets[bucket].len() - 1;
        &mut self.buckets[bucket][last].1
    }

    /// Returns the value for `key`, if present.
    #[must_use]
    pub fn get(&self, key: &K) -> Option<&V> {
        let chain = &self.buckets[self.bucket_of(key)];
        chain
            .iter()
            .find(|(k, _)| self.ops.eq(k, key))
            .map(|(_, v)| v)
    }

    /// Returns the value for `key` mutably, if present.
    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        let bucket = self.bucket_of(key);
        let chain = &self.buckets[bucket];
        let pos = chain.iter().position(|(k, _)| self.ops.eq(k, key))?;
        Some(&mut self.buckets[bucket][pos].1)
    }

    /// Removes the entry for `key`, returning its value.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        let bucket = self.bucket_of(key);
        let chain = &self.buckets[bucket];
        let pos = chain.iter().position(|(k, _)| self.ops.eq(k, key))?;
        self.len -= 1;
        Some(self.buckets[bucket].remove(pos).1)
    }

    /// Visits every entry in unspecified order.
    pub fn for_each<F: FnMut(&K, &V)>(&self, mut visit: F) {
        for (key, value) in self.buckets.iter().flatten() {
            visit(key, value);
        }
    }

    /// Removes every entry, running key and value destructors.
    pub fn clear(&mut self) {
        for chain in &mut self.buckets {
            chain.clear();
        }
        self.len = 0;
    }
}

#[cfg(test)]
mod tests {
    use std::hash::{Hash, Hasher};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    /// Key ops over plain strings, counting clones to observe the key
    /// contract.
    struct CountingOps {
        clones: Arc<AtomicUsize>,
    }

    impl KeyOps<String> for CountingOps {
        fn clone_key(&self, key: &String) -> String {
            self.clones.fetch_add(1, Ordering::Relaxed);
            key.clone()
        }

        fn eq(&self, lhs: &String, rhs: &String) -> bool {
            lhs == rhs
        }

        fn hash(&self, key: &String) -> u64 {
            let mut hasher = std::collections::hash_map::DefaultHasher::new();
            key.hash(&mut hasher);
            hasher.finish()
        }
    }

    fn counting_map() -> (ChainMap<String, u32, CountingOps>, Arc<AtomicUsize>) {
        let clones = Arc::new(AtomicUsize::new(0));
        let map = ChainMap::new(CountingOps {
            clones: Arc::clone(&clones),
        });
        (map, clones)
    }

    #[test]
    fn test_entry_inserts_default_once() {
        let (mut map, clones) = counting_map();

        let key = "alpha".to_string();
        *map.entry(&key) = 7;
        assert_eq!(*map.entry(&key), 7);
        assert_eq!(map.len(), 1);
        // One insert, one hit: the key was cloned exactly once.
        assert_eq!(clones.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_lookup_does_not_clone_key() {
        let (mut map, clones) = counting_map();
        let key = "beta".to_string();
        *map.entry(&key) = 1;

        assert_eq!(map.get(&key), Some(&1));
        assert_eq!(map.get(&"missing".to_string()), None);
        assert_eq!(clones.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_remove_invalidates_only_that_entry() {
        let (mut map, _) = counting_map();
        for name in ["a", "b", "c"] {
            *map.entry(&name.to_string()) = name.len() as u32;
        }

        assert_eq!(map.remove(&"b".to_string()), Some(1));
        assert_eq!(map.remove(&"b".to_string()), None);
        assert_eq!(map.len(), 2);
        assert!(map.get(&"a".to_string()).is_some());
        assert!(map.get(&"c".to_string()).is_some());
    }

    #[test]
    fn test_traversal_visits_every_entry() {
        let (mut map, _) = counting_map();
        for i in 0..10u32 {
            *map.entry(&format!("key-{i}")) = i;
        }

        let mut sum = 0;
        let mut count = 0;
        map.for_each(|_, v| {
            sum += *v;
            count += 1;
        });
        assert_eq!(count, 10);
        assert_eq!(sum, 45);
    }

    #[test]
    fn test_clear_runs_destructors() {
        struct DropProbe(Arc<AtomicUsize>);
        impl Drop for DropProbe {
            fn drop(&mut self) {
                self.0.fetch_add(1, Ordering::Relaxed);
            }
        }

        let drops = Arc::new(AtomicUsize::new(0));
        let mut map: ChainMap<String, Vec<DropProbe>, CountingOps> = ChainMap::new(CountingOps {
            clones: Arc::new(AtomicUsize::new(0)),
        });
        for i in 0..4 {
            map.entry(&format!("k{i}"))
                .push(DropProbe(Arc::clone(&drops)));
        }
        map.clear();
        assert_eq!(drops.load(Ordering::Relaxed), 4);
        assert!(map.is_empty());
    }

    #[test]
    fn test_growth_preserves_entries() {
        let (mut map, _) = counting_map();
        for i in 0..500u32 {
            *map.entry(&format!("key-{i}")) = i;
        }
        assert_eq!(map.len(), 500);
        for i in 0..500u32 {
            assert_eq!(map.get(&format!("key-{i}")), Some(&i));
        }
    }
}
