// Copyright (c) 2026 The Lattica Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use crate::chain::backend::{BatchOp, ColumnFamily, KeyValueStore, KvStoreErr};
use rocksdb::{
    ColumnFamilyDescriptor, LogLevel, MultiThreaded, Options, TransactionDB, TransactionDBOptions,
};
use std::path::Path;
use triomphe::Arc;

pub type DB = TransactionDB<MultiThreaded>;

/// Rocksdb-backed store. Handles are cheap to clone and safe to share;
/// batch writes go through a rocksdb transaction so a batch commits
/// atomically or not at all.
#[derive(Clone)]
pub struct DiskBackend {
    db: Arc<DB>,
}

impl DiskBackend {
    #[must_use]
    pub fn new(db: Arc<DB>) -> Self {
        Self { db }
    }
}

impl KeyValueStore for DiskBackend {
    fn get_raw(&self, cf: ColumnFamily, key: &[u8]) -> Result<Option<Vec<u8>>, KvStoreErr> {
        let handle = self
            .db
            .cf_handle(cf.name())
            .ok_or(KvStoreErr::Error("missing column family"))?;
        Ok(self.db.get_cf(&handle, key)?)
    }

    fn put_raw(&self, cf: ColumnFamily, key: Vec<u8>, value: Vec<u8>) -> Result<(), KvStoreErr> {
        let handle = self
            .db
            .cf_handle(cf.name())
            .ok_or(KvStoreErr::Error("missing column family"))?;
        Ok(self.db.put_cf(&handle, key, value)?)
    }

    fn delete_raw(&self, cf: ColumnFamily, key: &[u8]) -> Result<(), KvStoreErr> {
        let handle = self
            .db
            .cf_handle(cf.name())
            .ok_or(KvStoreErr::Error("missing column family"))?;
        Ok(self.db.delete_cf(&handle, key)?)
    }

    fn write_batch(&self, batch: Vec<BatchOp>) -> Result<(), KvStoreErr> {
        let tx = self.db.transaction();

        for op in batch {
            match op {
                BatchOp::Put { cf, key, value } => {
                    let handle = self
                        .db
                        .cf_handle(cf.name())
                        .ok_or(KvStoreErr::Error("missing column family"))?;
                    tx.put_cf(&handle, key, value)?;
                }

                BatchOp::Delete { cf, key } => {
                    let handle = self
                        .db
                        .cf_handle(cf.name())
                        .ok_or(KvStoreErr::Error("missing column family"))?;
                    tx.delete_cf(&handle, key)?;
                }
            }
        }

        tx.commit()?;
        Ok(())
    }
}

/// Opens (creating if missing) the node database with every column
/// family declared.
pub fn create_rocksdb_backend<P: AsRef<Path>>(path: P) -> Result<DiskBackend, KvStoreErr> {
    let mut cf_opts = Options::default();
    cf_opts.set_max_write_buffer_number(3);

    let cfs: Vec<ColumnFamilyDescriptor> = ColumnFamily::ALL
        .iter()
        .map(|cf| ColumnFamilyDescriptor::new(cf.name(), cf_opts.clone()))
        .collect();

    let mut db_opts = Options::default();
    db_opts.create_missing_column_families(true);
    db_opts.create_if_missing(true);
    db_opts.set_log_level(LogLevel::Warn);
    db_opts.set_keep_log_file_num(1);

    let db = DB::open_cf_descriptors(&db_opts, &TransactionDBOptions::default(), path, cfs)?;
    Ok(DiskBackend::new(Arc::new(db)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_backend() -> DiskBackend {
        use rand::Rng;
        let mut path = std::env::temp_dir();
        path.push(hex::encode(rand::thread_rng().gen::<[u8; 16]>()));
        path.push("lattica-test");
        create_rocksdb_backend(path).unwrap()
    }

    #[test]
    fn put_get_delete() {
        let backend = temp_backend();

        backend
            .put(ColumnFamily::Blocks, b"k", &"v".to_owned())
            .unwrap();
        let got: Option<String> = backend.get(ColumnFamily::Blocks, b"k").unwrap();
        assert_eq!(got.as_deref(), Some("v"));

        // Column families do not leak into each other
        let other: Option<String> = backend.get(ColumnFamily::Headers, b"k").unwrap();
        assert_eq!(other, None);

        backend.delete_raw(ColumnFamily::Blocks, b"k").unwrap();
        let got: Option<String> = backend.get(ColumnFamily::Blocks, b"k").unwrap();
        assert_eq!(got, None);
    }

    #[test]
    fn batch_writes_apply_in_order() {
        let backend = temp_backend();

        backend
            .write_batch(vec![
                BatchOp::Put {
                    cf: ColumnFamily::Tips,
                    key: b"a".to_vec(),
                    value: vec![1],
                },
                BatchOp::Put {
                    cf: ColumnFamily::Tips,
                    key: b"b".to_vec(),
                    value: vec![2],
                },
                BatchOp::Delete {
                    cf: ColumnFamily::Tips,
                    key: b"a".to_vec(),
                },
            ])
            .unwrap();

        assert_eq!(backend.get_raw(ColumnFamily::Tips, b"a").unwrap(), None);
        assert_eq!(
            backend.get_raw(ColumnFamily::Tips, b"b").unwrap(),
            Some(vec![2])
        );
    }
}
