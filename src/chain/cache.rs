// Copyright (c) 2026 The Lattica Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use crate::chain::backend::{BatchOp, ColumnFamily, KeyValueStore, KvStoreErr};
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

/// State of a key inside a cache overlay.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheEntry<V> {
    /// Mirrors the persisted value.
    Cached(V),
    /// Written in this overlay, not yet persisted.
    Modified(V),
    /// Deleted in this overlay, not yet persisted.
    Removed,
}

/// Read/write surface shared by `Cache` and `Staging` so stagings can
/// stack (per-transaction staging above per-block staging above the
/// cache). None of the layers are safe under concurrent mutation;
/// callers serialize through their owning task.
pub trait Layer<K, V> {
    fn get(&mut self, key: &K) -> Result<Option<V>, KvStoreErr>;
    fn put(&mut self, key: K, value: V);
    fn remove(&mut self, key: K);
}

/// Write-back cache in front of one column family. `persist` is the only
/// path to disk and flushes all pending mutations in one atomic batch,
/// in first-write order.
pub struct Cache<K, V> {
    store: Arc<dyn KeyValueStore>,
    cf: ColumnFamily,
    entries: HashMap<K, CacheEntry<V>>,
    dirty: Vec<K>,
}

impl<K, V> Cache<K, V>
where
    K: Eq + Hash + Clone + bincode::Encode,
    V: Clone + bincode::Encode + bincode::Decode,
{
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>, cf: ColumnFamily) -> Self {
        Self {
            store,
            cf,
            entries: HashMap::new(),
            dirty: Vec::new(),
        }
    }

    fn mark_dirty(&mut self, key: &K) {
        match self.entries.get(key) {
            Some(CacheEntry::Modified(_) | CacheEntry::Removed) => {}
            _ => self.dirty.push(key.clone()),
        }
    }

    /// Number of pending (unpersisted) mutations.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.dirty.len()
    }

    /// Flushes every `Modified`/`Removed` entry in a single atomic batch,
    /// then downgrades them to `Cached`.
    pub fn persist(&mut self) -> Result<(), KvStoreErr> {
        if self.dirty.is_empty() {
            return Ok(());
        }

        let mut batch = Vec::with_capacity(self.dirty.len());
        for key in &self.dirty {
            let encoded = crate::codec::encode_to_vec(key)?;

            match self.entries.get(key) {
                Some(CacheEntry::Modified(v)) => batch.push(BatchOp::Put {
                    cf: self.cf,
                    key: encoded,
                    value: crate::codec::encode_to_vec(v)?,
                }),

                Some(CacheEntry::Removed) => batch.push(BatchOp::Delete {
                    cf: self.cf,
                    key: encoded,
                }),

                // A dirty key can only hold a dirty entry
                _ => unreachable!(),
            }
        }

        self.store.write_batch(batch)?;

        for key in std::mem::take(&mut self.dirty) {
            match self.entries.get(&key) {
                Some(CacheEntry::Modified(_)) => {
                    let Some(CacheEntry::Modified(v)) = self.entries.remove(&key) else {
                        unreachable!()
                    };
                    self.entries.insert(key, CacheEntry::Cached(v));
                }

                Some(CacheEntry::Removed) => {
                    self.entries.remove(&key);
                }

                _ => unreachable!(),
            }
        }

        Ok(())
    }
}

impl<K, V> Layer<K, V> for Cache<K, V>
where
    K: Eq + Hash + Clone + bincode::Encode,
    V: Clone + bincode::Encode + bincode::Decode,
{
    fn get(&mut self, key: &K) -> Result<Option<V>, KvStoreErr> {
        if let Some(entry) = self.entries.get(key) {
            return Ok(match entry {
                CacheEntry::Cached(v) | CacheEntry::Modified(v) => Some(v.clone()),
                CacheEntry::Removed => None,
            });
        }

        let encoded = crate::codec::encode_to_vec(key)?;
        match self.store.get_raw(self.cf, &encoded)? {
            None => Ok(None),
            Some(bytes) => {
                let value: V = crate::codec::decode(&bytes)?;
                self.entries
                    .insert(key.clone(), CacheEntry::Cached(value.clone()));
                Ok(Some(value))
            }
        }
    }

    fn put(&mut self, key: K, value: V) {
        self.mark_dirty(&key);
        self.entries.insert(key, CacheEntry::Modified(value));
    }

    fn remove(&mut self, key: K) {
        self.mark_dirty(&key);
        self.entries.insert(key, CacheEntry::Removed);
    }
}

/// Transient overlay above a cache (or another staging). Commit merges
/// into the parent in insertion order, abort is simply dropping the
/// value. Never touches disk.
pub struct Staging<'a, K, V, L: Layer<K, V>> {
    parent: &'a mut L,
    entries: HashMap<K, CacheEntry<V>>,
    order: Vec<K>,
}

impl<'a, K, V, L> Staging<'a, K, V, L>
where
    K: Eq + Hash + Clone,
    V: Clone,
    L: Layer<K, V>,
{
    pub fn new(parent: &'a mut L) -> Self {
        Self {
            parent,
            entries: HashMap::new(),
            order: Vec::new(),
        }
    }

    /// Merges all staged mutations into the parent layer.
    pub fn commit(mut self) {
        for key in std::mem::take(&mut self.order) {
            match self.entries.remove(&key) {
                Some(CacheEntry::Modified(v)) => self.parent.put(key, v),
                Some(CacheEntry::Removed) => self.parent.remove(key),
                _ => unreachable!(),
            }
        }
    }

    /// Drops all staged mutations.
    pub fn discard(self) {}

    #[must_use]
    pub fn staged(&self) -> usize {
        self.order.len()
    }
}

impl<K, V, L> Layer<K, V> for Staging<'_, K, V, L>
where
    K: Eq + Hash + Clone,
    V: Clone,
    L: Layer<K, V>,
{
    fn get(&mut self, key: &K) -> Result<Option<V>, KvStoreErr> {
        if let Some(entry) = self.entries.get(key) {
            return Ok(match entry {
                CacheEntry::Cached(v) | CacheEntry::Modified(v) => Some(v.clone()),
                CacheEntry::Removed => None,
            });
        }

        self.parent.get(key)
    }

    fn put(&mut self, key: K, value: V) {
        if !self.entries.contains_key(&key) {
            self.order.push(key.clone());
        }

        self.entries.insert(key, CacheEntry::Modified(value));
    }

    fn remove(&mut self, key: K) {
        if !self.entries.contains_key(&key) {
            self.order.push(key.clone());
        }

        self.entries.insert(key, CacheEntry::Removed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::backend::MemoryBackend;

    fn cache() -> (Arc<MemoryBackend>, Cache<u32, String>) {
        let backend = Arc::new(MemoryBackend::new());
        let cache = Cache::new(backend.clone() as Arc<dyn KeyValueStore>, ColumnFamily::Tips);
        (backend, cache)
    }

    #[test]
    fn get_falls_through_to_the_store() {
        let (backend, mut cache) = cache();
        backend
            .put(ColumnFamily::Tips, &crate::codec::encode_to_vec(&7u32).unwrap(), &"seven".to_owned())
            .unwrap();

        assert_eq!(cache.get(&7).unwrap().as_deref(), Some("seven"));
        assert_eq!(cache.get(&8).unwrap(), None);
    }

    #[test]
    fn mutations_stay_in_the_overlay_until_persist() {
        let (backend, mut cache) = cache();

        cache.put(1, "one".to_owned());
        cache.remove(2);
        assert_eq!(cache.get(&1).unwrap().as_deref(), Some("one"));
        assert!(backend.is_empty(ColumnFamily::Tips));

        cache.persist().unwrap();
        assert_eq!(cache.pending(), 0);
        assert_eq!(backend.len(ColumnFamily::Tips), 1);

        // Persisted entries read back and further persists are no-ops
        assert_eq!(cache.get(&1).unwrap().as_deref(), Some("one"));
        cache.persist().unwrap();
    }

    #[test]
    fn removed_shadows_the_store() {
        let (backend, mut cache) = cache();
        backend
            .put(ColumnFamily::Tips, &crate::codec::encode_to_vec(&1u32).unwrap(), &"one".to_owned())
            .unwrap();

        cache.remove(1);
        assert_eq!(cache.get(&1).unwrap(), None);

        cache.persist().unwrap();
        assert!(backend.is_empty(ColumnFamily::Tips));
        assert_eq!(cache.get(&1).unwrap(), None);
    }

    #[test]
    fn staging_commit_merges_into_the_cache() {
        let (_backend, mut cache) = cache();
        cache.put(1, "one".to_owned());

        let mut staging = Staging::new(&mut cache);
        staging.put(2, "two".to_owned());
        staging.remove(1);
        assert_eq!(staging.get(&1).unwrap(), None);
        assert_eq!(staging.get(&2).unwrap().as_deref(), Some("two"));
        staging.commit();

        assert_eq!(cache.get(&1).unwrap(), None);
        assert_eq!(cache.get(&2).unwrap().as_deref(), Some("two"));
    }

    #[test]
    fn staging_discard_leaves_the_cache_untouched() {
        let (_backend, mut cache) = cache();
        cache.put(1, "one".to_owned());

        let mut staging = Staging::new(&mut cache);
        staging.put(1, "mutated".to_owned());
        staging.put(2, "two".to_owned());
        staging.discard();

        assert_eq!(cache.get(&1).unwrap().as_deref(), Some("one"));
        assert_eq!(cache.get(&2).unwrap(), None);
    }

    #[test]
    fn staging_stacks_above_staging() {
        let (_backend, mut cache) = cache();
        cache.put(1, "block".to_owned());

        let mut block_staging = Staging::new(&mut cache);
        block_staging.put(2, "tx1".to_owned());

        {
            let mut tx_staging = Staging::new(&mut block_staging);
            tx_staging.put(3, "tx2".to_owned());
            assert_eq!(tx_staging.get(&1).unwrap().as_deref(), Some("block"));
            assert_eq!(tx_staging.get(&2).unwrap().as_deref(), Some("tx1"));
            tx_staging.discard();
        }

        {
            let mut tx_staging = Staging::new(&mut block_staging);
            assert_eq!(tx_staging.get(&3).unwrap(), None);
            tx_staging.put(4, "tx3".to_owned());
            tx_staging.commit();
        }

        block_staging.commit();
        assert_eq!(cache.get(&3).unwrap(), None);
        assert_eq!(cache.get(&4).unwrap().as_deref(), Some("tx3"));
    }

    #[test]
    fn persist_writes_in_first_write_order() {
        let backend = Arc::new(MemoryBackend::new());
        let mut cache: Cache<u32, String> =
            Cache::new(backend.clone() as Arc<dyn KeyValueStore>, ColumnFamily::Tips);

        cache.put(3, "c".to_owned());
        cache.put(1, "a".to_owned());
        cache.put(3, "c2".to_owned());
        assert_eq!(cache.pending(), 2);

        cache.persist().unwrap();
        assert_eq!(
            cache.get(&3).unwrap().as_deref(),
            Some("c2"),
            "later write to the same key wins"
        );
    }
}
