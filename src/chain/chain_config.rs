// Copyright (c) 2026 The Lattica Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use crate::consensus::{BLOCK_TARGET_TIME_MS, COINBASE_LOCK_TIME_MS, CONFIRM_DEPTH, GROUPS};
use crate::primitives::ChainIndex;

/// The one explicit configuration value threaded through BlockFlow,
/// validation and the node tasks. No ambient state: everything that
/// depends on the network shape takes this by reference.
#[derive(Debug, Clone)]
pub struct ChainConfig {
    network_name: String,
    pub network_id: u8,

    /// Shard group count `G`; the chain universe is `G x G`.
    pub groups: u32,

    /// Confirmation depth `K`.
    pub confirm_depth: u64,

    /// How many brokers share the clique, and which contiguous slice of
    /// `from` groups this broker serves.
    pub broker_num: u32,
    pub broker_id: u32,

    pub block_target_time_ms: u64,

    /// Coinbase maturity: reward outputs stay locked this long past the
    /// block timestamp.
    pub coinbase_lock_time_ms: u64,

    header_key: String,
    tx_key: String,
    output_key: String,
    contract_key: String,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self::new("testnet", 0, GROUPS, CONFIRM_DEPTH)
    }
}

impl ChainConfig {
    pub fn new(network_name: &str, network_id: u8, groups: u32, confirm_depth: u64) -> Self {
        assert!(groups.is_power_of_two(), "groups must be a power of two");

        Self {
            network_name: network_name.to_owned(),
            network_id,
            groups,
            confirm_depth,
            broker_num: 1,
            broker_id: 0,
            block_target_time_ms: BLOCK_TARGET_TIME_MS,
            coinbase_lock_time_ms: COINBASE_LOCK_TIME_MS,
            header_key: format!("{network_name}.header"),
            tx_key: format!("{network_name}.tx"),
            output_key: format!("{network_name}.output"),
            contract_key: format!("{network_name}.contract"),
        }
    }

    pub fn with_brokers(mut self, broker_num: u32, broker_id: u32) -> Self {
        assert!(broker_num > 0 && broker_id < broker_num);
        assert!(self.groups % broker_num == 0);
        self.broker_num = broker_num;
        self.broker_id = broker_id;
        self
    }

    #[must_use]
    pub fn network_name(&self) -> &str {
        &self.network_name
    }

    /// Total chain count `G^2`.
    #[must_use]
    pub fn chains(&self) -> usize {
        (self.groups * self.groups) as usize
    }

    /// Dependency count per block, `2G - 1`.
    #[must_use]
    pub fn deps_len(&self) -> usize {
        (2 * self.groups - 1) as usize
    }

    /// Whether this broker serves blocks whose `from` group is `group`.
    #[must_use]
    pub fn serves(&self, group: u32) -> bool {
        let span = self.groups / self.broker_num;
        group / span == self.broker_id
    }

    #[must_use]
    pub fn all_indexes(&self) -> Vec<ChainIndex> {
        (0..self.chains())
            .map(|flat| ChainIndex::from_flat(flat, self.groups))
            .collect()
    }

    /// Hash key for block headers. Chain independent, because the chain
    /// index is derived from the header hash itself.
    #[must_use]
    pub fn header_key(&self) -> &str {
        &self.header_key
    }

    /// Hash key for transaction ids.
    #[must_use]
    pub fn tx_key(&self) -> &str {
        &self.tx_key
    }

    /// Hash key for output keys in the world state.
    #[must_use]
    pub fn output_key(&self) -> &str {
        &self.output_key
    }

    /// Hash key for contract id derivation.
    #[must_use]
    pub fn contract_key(&self) -> &str {
        &self.contract_key
    }
}
