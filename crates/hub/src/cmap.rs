// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Sharded concurrent map backing the process-wide tables (device registry,
//! event correlator, bridge table, session hubs).
//!
//! Keys are hashed with FNV-1a onto a fixed number of shards; each shard is an
//! independently locked `HashMap`. Iteration callbacks run over a per-shard
//! snapshot so user code never executes under a shard lock.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::RwLock;

const SHARD_COUNT: usize = 32;

pub struct CMap<K, V> {
    shards: Vec<RwLock<HashMap<K, V>>>,
}

impl<K, V> CMap<K, V>
where
    K: Eq + Hash + Clone + AsRef<[u8]>,
    V: Clone,
{
    pub fn new() -> Self {
        let mut shards = Vec::with_capacity(SHARD_COUNT);
        for _ in 0..SHARD_COUNT {
            shards.push(RwLock::new(HashMap::new()));
        }
        Self { shards }
    }

    fn shard(&self, key: &K) -> &RwLock<HashMap<K, V>> {
        &self.shards[fnv1a(key.as_ref()) as usize % SHARD_COUNT]
    }

    /// Set the value under the given key, replacing any previous value.
    pub fn set(&self, key: K, value: V) {
        let mut shard = write_shard(self.shard(&key));
        shard.insert(key, value);
    }

    /// Insert only when the key is absent. Returns whether the value was set.
    pub fn set_if_absent(&self, key: K, value: V) -> bool {
        let mut shard = write_shard(self.shard(&key));
        if shard.contains_key(&key) {
            return false;
        }
        shard.insert(key, value);
        true
    }

    /// Insert or update under the key; the callback sees the current value.
    pub fn upsert<F>(&self, key: K, f: F)
    where
        F: FnOnce(Option<&V>) -> V,
    {
        let mut shard = write_shard(self.shard(&key));
        let next = f(shard.get(&key));
        shard.insert(key, next);
    }

    pub fn get(&self, key: &K) -> Option<V> {
        read_shard(self.shard(key)).get(key).cloned()
    }

    pub fn has(&self, key: &K) -> bool {
        read_shard(self.shard(key)).contains_key(key)
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        write_shard(self.shard(key)).remove(key)
    }

    pub fn remove_many<I>(&self, keys: I)
    where
        I: IntoIterator<Item = K>,
    {
        for key in keys {
            self.remove(&key);
        }
    }

    pub fn count(&self) -> usize {
        self.shards.iter().map(|s| read_shard(s).len()).sum()
    }

    pub fn keys(&self) -> Vec<K> {
        let mut out = Vec::new();
        for shard in &self.shards {
            out.extend(read_shard(shard).keys().cloned());
        }
        out
    }

    /// Snapshot of all entries. Consistent per shard, not across shards.
    pub fn entries(&self) -> Vec<(K, V)> {
        let mut out = Vec::new();
        for shard in &self.shards {
            out.extend(read_shard(shard).iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        out
    }

    /// Iterate entries through a callback; returning `false` stops iteration.
    ///
    /// The callback runs on a snapshot of each shard taken under its read
    /// lock, so it may freely call back into the map.
    pub fn iter_cb<F>(&self, mut f: F)
    where
        F: FnMut(&K, &V) -> bool,
    {
        for shard in &self.shards {
            let snapshot: Vec<(K, V)> = {
                let guard = read_shard(shard);
                guard.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
            };
            for (k, v) in &snapshot {
                if !f(k, v) {
                    return;
                }
            }
        }
    }
}

impl<K, V> Default for CMap<K, V>
where
    K: Eq + Hash + Clone + AsRef<[u8]>,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

fn fnv1a(data: &[u8]) -> u32 {
    let mut hash: u32 = 0x811c_9dc5;
    for b in data {
        hash ^= u32::from(*b);
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}

// A poisoned shard only means a panicking callback elsewhere; the map data
// itself stays coherent, so recover the guard rather than propagate.
fn read_shard<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write_shard<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
#[path = "cmap_tests.rs"]
mod tests;
