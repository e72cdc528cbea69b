// Copyright (c) 2026 The Lattica Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use crate::chain::backend::{BatchOp, ColumnFamily, KeyValueStore, KvStoreErr};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};

/// In-memory store with the same contract as the disk backend. Used by
/// the test suite and by ephemeral nodes that do not persist state.
#[derive(Default)]
pub struct MemoryBackend {
    cfs: RwLock<HashMap<&'static str, BTreeMap<Vec<u8>, Vec<u8>>>>,
}

impl MemoryBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self, cf: ColumnFamily) -> usize {
        self.cfs
            .read()
            .get(cf.name())
            .map_or(0, BTreeMap::len)
    }

    #[must_use]
    pub fn is_empty(&self, cf: ColumnFamily) -> bool {
        self.len(cf) == 0
    }
}

impl KeyValueStore for MemoryBackend {
    fn get_raw(&self, cf: ColumnFamily, key: &[u8]) -> Result<Option<Vec<u8>>, KvStoreErr> {
        Ok(self
            .cfs
            .read()
            .get(cf.name())
            .and_then(|table| table.get(key).cloned()))
    }

    fn put_raw(&self, cf: ColumnFamily, key: Vec<u8>, value: Vec<u8>) -> Result<(), KvStoreErr> {
        self.cfs
            .write()
            .entry(cf.name())
            .or_default()
            .insert(key, value);
        Ok(())
    }

    fn delete_raw(&self, cf: ColumnFamily, key: &[u8]) -> Result<(), KvStoreErr> {
        if let Some(table) = self.cfs.write().get_mut(cf.name()) {
            table.remove(key);
        }

        Ok(())
    }

    fn write_batch(&self, batch: Vec<BatchOp>) -> Result<(), KvStoreErr> {
        let mut cfs = self.cfs.write();

        for op in batch {
            match op {
                BatchOp::Put { cf, key, value } => {
                    cfs.entry(cf.name()).or_default().insert(key, value);
                }

                BatchOp::Delete { cf, key } => {
                    if let Some(table) = cfs.get_mut(cf.name()) {
                        table.remove(&key);
                    }
                }
            }
        }

        Ok(())
    }
}
