use std::collections::hash_map::RandomState;
use std::collections::HashMap;
use std::hash::{BuildHasher, Hash};
use std::thread;

use parking_lot::RwLock;

/// A lock-sharded hash map.
///
/// Keys are spread across independently locked shards so writers to
/// different shards never contend. Reads take a shard read lock. Whole-map
/// operations (`len`, `clear`) walk every shard one at a time and are only
/// advisory while other threads are mutating.
pub struct ShardedMap<K, V, S = RandomState> {
    shards: Box<[RwLock<HashMap<K, V>>]>,
    hasher: S,
}

impl<K: Hash + Eq, V> ShardedMap<K, V> {
    /// A map with one shard per available CPU.
    pub fn new() -> Self {
        let shards = thread::available_parallelism().map_or(1, usize::from);
        Self::with_shards(shards)
    }

    /// A map with `shards` shards; zero is coerced to one.
    pub fn with_shards(shards: usize) -> Self {
        let shards = shards.max(1);
        Self {
            shards: (0..shards).map(|_| RwLock::new(HashMap::new())).collect(),
            hasher: RandomState::new(),
        }
    }
}

impl<K: Hash + Eq, V> Default for ShardedMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, S> ShardedMap<K, V, S>
where
    K: Hash + Eq,
    S: BuildHasher,
{
    fn shard(&self, key: &K) -> &RwLock<HashMap<K, V>> {
        let hash = self.hasher.hash_one(key) as usize;
        &self.shards[hash % self.shards.len()]
    }

    /// Inserts or replaces the mapping, returning the previous value.
    pub fn insert(&self, key: K, value: V) -> Option<V> {
        self.shard(&key).write().insert(key, value)
    }

    /// Returns a clone of the value mapped to `key`.
    pub fn get(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        self.shard(key).read().get(key).cloned()
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.shard(key).read().contains_key(key)
    }

    /// Removes the mapping, returning its value if one existed.
    pub fn remove(&self, key: &K) -> Option<V> {
        self.shard(key).write().remove(key)
    }

    /// Total entry count, summed shard by shard.
    pub fn len(&self) -> usize {
        self.shards.iter().map(|shard| shard.read().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.iter().all(|shard| shard.read().is_empty())
    }

    /// Empties the map, one shard at a time.
    pub fn clear(&self) {
        for shard in self.shards.iter() {
            shard.write().clear();
        }
    }
}
