// Copyright (c) 2026 The Lattica Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use bincode::error::{DecodeError as BincodeDecodeErr, EncodeError as BincodeEncodeErr};
use rocksdb::Error as RocksDbErr;
use std::fmt;

pub mod disk;
pub mod memory_store;

pub use disk::{create_rocksdb_backend, DiskBackend};
pub use memory_store::MemoryBackend;

/// Persisted column families. Keys are fixed width where possible so
/// range scans stay ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnFamily {
    /// `block id -> Block`
    Blocks,
    /// `block id -> BlockHeader`
    Headers,
    /// `chain index -> tip set`
    Tips,
    /// `trie node hash -> node bytes`
    WorldState,
    /// `log states id -> LogStates`
    LogStates,
    /// `tx id -> Transaction`
    Mempool,
    /// `address bytes -> output refs`
    AddressIndex,
}

impl ColumnFamily {
    pub const ALL: [ColumnFamily; 7] = [
        ColumnFamily::Blocks,
        ColumnFamily::Headers,
        ColumnFamily::Tips,
        ColumnFamily::WorldState,
        ColumnFamily::LogStates,
        ColumnFamily::Mempool,
        ColumnFamily::AddressIndex,
    ];

    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Blocks => "blocks",
            Self::Headers => "headers",
            Self::Tips => "tips",
            Self::WorldState => "world_state",
            Self::LogStates => "log_states",
            Self::Mempool => "mempool",
            Self::AddressIndex => "address_index",
        }
    }
}

/// One mutation inside an atomic batch write.
#[derive(Debug, Clone)]
pub enum BatchOp {
    Put {
        cf: ColumnFamily,
        key: Vec<u8>,
        value: Vec<u8>,
    },
    Delete {
        cf: ColumnFamily,
        key: Vec<u8>,
    },
}

/// Interface to the underlying storage engine. Point reads and writes
/// plus an atomic multi-key batch; all values pass through the canonical
/// codec.
pub trait KeyValueStore: Send + Sync {
    fn get_raw(&self, cf: ColumnFamily, key: &[u8]) -> Result<Option<Vec<u8>>, KvStoreErr>;
    fn put_raw(&self, cf: ColumnFamily, key: Vec<u8>, value: Vec<u8>) -> Result<(), KvStoreErr>;
    fn delete_raw(&self, cf: ColumnFamily, key: &[u8]) -> Result<(), KvStoreErr>;

    /// Applies every op or none. The batch is written in order.
    fn write_batch(&self, batch: Vec<BatchOp>) -> Result<(), KvStoreErr>;

    fn get<V: bincode::Decode>(
        &self,
        cf: ColumnFamily,
        key: &[u8],
    ) -> Result<Option<V>, KvStoreErr>
    where
        Self: Sized,
    {
        match self.get_raw(cf, key)? {
            None => Ok(None),
            Some(bytes) => Ok(Some(
                crate::codec::decode(&bytes).map_err(KvStoreErr::from)?,
            )),
        }
    }

    fn put<V: bincode::Encode>(
        &self,
        cf: ColumnFamily,
        key: &[u8],
        value: &V,
    ) -> Result<(), KvStoreErr>
    where
        Self: Sized,
    {
        self.put_raw(cf, key.to_vec(), crate::codec::encode_to_vec(value)?)
    }
}

#[derive(Debug)]
pub enum KvStoreErr {
    /// Rocksdb error
    RocksDb(RocksDbErr),

    /// Stored bytes failed to decode. Disk-side corruption, not peer
    /// input.
    Corrupt(BincodeDecodeErr),

    /// Value failed to encode
    Encode(BincodeEncodeErr),

    /// Generic error
    Error(&'static str),
}

impl fmt::Display for KvStoreErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RocksDb(err) => write!(f, "storage error: {err}"),
            Self::Corrupt(err) => write!(f, "corrupt data: {err}"),
            Self::Encode(err) => write!(f, "encode error: {err}"),
            Self::Error(err) => write!(f, "{err}"),
        }
    }
}

impl From<RocksDbErr> for KvStoreErr {
    fn from(other: RocksDbErr) -> Self {
        Self::RocksDb(other)
    }
}

impl From<BincodeDecodeErr> for KvStoreErr {
    fn from(other: BincodeDecodeErr) -> Self {
        Self::Corrupt(other)
    }
}

impl From<BincodeEncodeErr> for KvStoreErr {
    fn from(other: BincodeEncodeErr) -> Self {
        Self::Encode(other)
    }
}
