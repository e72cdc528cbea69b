// Copyright (c) 2026 The Lattica Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use crate::consensus::{Target, INITIAL_TARGET_COMPACT, TIMESTAMP_DRIFT_TOLERANCE_MS};
use crate::primitives::{Hash256, Transaction, TxVerifyErr, U256};
use bincode::{Decode, Encode};
use std::fmt;

/// Network launch timestamp, the timestamp of every genesis block.
pub const GENESIS_TIMESTAMP: i64 = 1_767_225_600_000; // 2026-01-01T00:00:00Z

/// Nonce width in bytes.
pub const NONCE_BYTES: usize = 24;

/// Which of the `G x G` chains a block belongs to. Derived from the
/// block hash: `from = h mod G`, `to = (h / G) mod G` over the hash's
/// low bits, which is why mining must grind the nonce until the indices
/// land on the chain being mined.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Encode, Decode)]
pub struct ChainIndex {
    pub from: u32,
    pub to: u32,
}

impl ChainIndex {
    #[must_use]
    pub fn new(from: u32, to: u32) -> Self {
        Self { from, to }
    }

    #[must_use]
    pub fn of_hash(hash: &Hash256, groups: u32) -> Self {
        let v = hash.low_u64();
        Self {
            from: (v % u64::from(groups)) as u32,
            to: ((v / u64::from(groups)) % u64::from(groups)) as u32,
        }
    }

    /// Position in `0..G^2`, row-major.
    #[must_use]
    pub fn flat(&self, groups: u32) -> usize {
        (self.from * groups + self.to) as usize
    }

    #[must_use]
    pub fn from_flat(flat: usize, groups: u32) -> Self {
        Self {
            from: flat as u32 / groups,
            to: flat as u32 % groups,
        }
    }

    #[must_use]
    pub fn is_intra_group(&self) -> bool {
        self.from == self.to
    }
}

impl fmt::Debug for ChainIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.from, self.to)
    }
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct BlockHeader {
    /// Header version
    pub version: u8,

    /// `2G - 1` dependency hashes: the diagonal chains of the other
    /// groups first (ascending group, own group skipped), then the
    /// chains `(from, 0..G)`. The in-chain parent sits at `G - 1 + to`.
    pub deps: Vec<Hash256>,

    /// World-state commitment after applying this block on its view
    pub dep_state_hash: Hash256,

    /// Commitment over the block's transaction ids
    pub txs_hash: Hash256,

    /// Milliseconds since epoch
    pub timestamp: i64,

    /// Compact PoW target
    pub target: u32,

    /// PoW nonce
    pub nonce: [u8; NONCE_BYTES],

    /// Cached block hash
    pub hash: Option<Hash256>,
}

impl BlockHeader {
    pub fn compute_hash(&mut self, key: &str) {
        let encoded = crate::codec::encode_to_vec(self).unwrap();
        self.hash = Some(Hash256::hash_from_slice(encoded, key));
    }

    #[must_use]
    pub fn hash(&self) -> Option<&Hash256> {
        self.hash.as_ref()
    }

    /// Block id. Panics when the hash was not computed.
    #[must_use]
    pub fn id(&self) -> Hash256 {
        *self.hash.as_ref().expect("header hash not computed")
    }

    #[must_use]
    pub fn chain_index(&self, groups: u32) -> ChainIndex {
        ChainIndex::of_hash(&self.id(), groups)
    }

    #[must_use]
    pub fn target(&self) -> Target {
        Target::new(self.target)
    }

    /// Expected work of this header's PoW.
    #[must_use]
    pub fn work(&self) -> U256 {
        self.target().work()
    }

    /// In-chain parent: the dep entry for the block's own chain.
    #[must_use]
    pub fn parent(&self, groups: u32) -> Hash256 {
        let index = self.chain_index(groups);
        self.deps[(groups - 1 + index.to) as usize]
    }

    /// Dep entry naming the diagonal chain `(group, group)` of another
    /// group. Panics when `group` is the block's own group.
    #[must_use]
    pub fn group_dep(&self, group: u32, groups: u32) -> Hash256 {
        let from = self.chain_index(groups).from;
        debug_assert_ne!(group, from);

        let pos = if group < from { group } else { group - 1 };
        self.deps[pos as usize]
    }

    /// Dep entry for chain `(from, to)` of the block's own group.
    #[must_use]
    pub fn out_dep(&self, to: u32, groups: u32) -> Hash256 {
        self.deps[(groups - 1 + to) as usize]
    }

    #[must_use]
    pub fn is_genesis(&self) -> bool {
        self.deps.iter().all(Hash256::is_zero)
    }

    /// Stateless header validation: shape, PoW, chain index, clock
    /// drift. The target band against the parent is checked by the
    /// chain layer, which knows the retarget window.
    pub fn validate(
        &self,
        expected: ChainIndex,
        groups: u32,
        now_ms: i64,
    ) -> Result<(), BlockVerifyErr> {
        if self.deps.len() != (2 * groups - 1) as usize {
            return Err(BlockVerifyErr::InvalidDeps);
        }

        // Genesis blocks carry all-zero deps; everything else must name
        // 2G - 1 distinct non-zero parents.
        if !self.is_genesis() {
            if self.deps.iter().any(Hash256::is_zero) {
                return Err(BlockVerifyErr::InvalidDeps);
            }

            let mut sorted = self.deps.clone();
            sorted.sort_unstable();
            if sorted.windows(2).any(|w| w[0] == w[1]) {
                return Err(BlockVerifyErr::InvalidDeps);
            }
        }

        if self.chain_index(groups) != expected {
            return Err(BlockVerifyErr::InvalidChainIndex);
        }

        if self.timestamp > now_ms + TIMESTAMP_DRIFT_TOLERANCE_MS as i64 {
            return Err(BlockVerifyErr::InvalidTimestamp);
        }

        if Target::new(self.target).expand() > Target::max().expand() {
            return Err(BlockVerifyErr::InvalidTarget);
        }

        if !self.target().meets(&self.id().0) {
            return Err(BlockVerifyErr::InvalidPow);
        }

        Ok(())
    }
}

impl Encode for BlockHeader {
    fn encode<E: bincode::enc::Encoder>(
        &self,
        encoder: &mut E,
    ) -> core::result::Result<(), bincode::error::EncodeError> {
        Encode::encode(&self.version, encoder)?;
        Encode::encode(&self.deps, encoder)?;
        Encode::encode(&self.dep_state_hash, encoder)?;
        Encode::encode(&self.txs_hash, encoder)?;
        Encode::encode(&self.timestamp, encoder)?;
        crate::codec::encode_fixed_u32(self.target, encoder)?;
        Encode::encode(&self.nonce, encoder)?;
        Ok(())
    }
}

impl Decode for BlockHeader {
    fn decode<D: bincode::de::Decoder>(
        decoder: &mut D,
    ) -> core::result::Result<Self, bincode::error::DecodeError> {
        Ok(Self {
            version: Decode::decode(decoder)?,
            deps: Decode::decode(decoder)?,
            dep_state_hash: Decode::decode(decoder)?,
            txs_hash: Decode::decode(decoder)?,
            timestamp: Decode::decode(decoder)?,
            target: crate::codec::decode_fixed_u32(decoder)?,
            nonce: Decode::decode(decoder)?,
            hash: None,
        })
    }
}

#[derive(Clone, PartialEq, Debug, Encode, Decode)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// Commitment over the ordered transaction ids. Transaction hashes
    /// must be computed.
    #[must_use]
    pub fn compute_txs_hash(transactions: &[Transaction], key: &str) -> Hash256 {
        let mut bytes = Vec::with_capacity(transactions.len() * 32);
        for tx in transactions {
            bytes.extend_from_slice(tx.id().as_bytes());
        }

        Hash256::hash_from_slice(&bytes, key)
    }

    /// Recomputes every cached hash after decoding.
    pub fn compute_hashes(&mut self, header_key: &str, tx_key: &str) {
        for tx in &mut self.transactions {
            tx.compute_hash(tx_key);
        }

        self.header.compute_hash(header_key);
    }

    #[must_use]
    pub fn id(&self) -> Hash256 {
        self.header.id()
    }

    #[must_use]
    pub fn chain_index(&self, groups: u32) -> ChainIndex {
        self.header.chain_index(groups)
    }

    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        crate::codec::encode_to_vec(self).unwrap()
    }

    /// Sum of transaction fees. `None` on overflow.
    #[must_use]
    pub fn total_fees(&self) -> Option<U256> {
        let mut sum = U256::zero();
        for tx in &self.transactions {
            sum = sum.checked_add(&tx.fee()?)?;
        }
        Some(sum)
    }

    /// Mines the deterministic genesis block of a chain: zero deps,
    /// initial target, nonce ground until the hash lands on `index`.
    #[must_use]
    pub fn genesis(index: ChainIndex, groups: u32, header_key: &str) -> Block {
        let mut header = BlockHeader {
            version: 0,
            deps: vec![Hash256::zero(); (2 * groups - 1) as usize],
            dep_state_hash: Hash256::zero(),
            txs_hash: Hash256::hash_from_slice([0u8; 0], header_key),
            timestamp: GENESIS_TIMESTAMP,
            target: INITIAL_TARGET_COMPACT,
            nonce: [0; NONCE_BYTES],
            hash: None,
        };

        let target = Target::new(INITIAL_TARGET_COMPACT);
        let mut counter: u64 = 0;
        loop {
            header.nonce[..8].copy_from_slice(&counter.to_le_bytes());
            header.compute_hash(header_key);

            let hash = header.id();
            if ChainIndex::of_hash(&hash, groups) == index && target.meets(&hash.0) {
                break;
            }

            counter += 1;
        }

        Block {
            header,
            transactions: vec![],
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BlockVerifyErr {
    /// Hash does not meet the declared target
    InvalidPow,

    /// Target outside the allowed band
    InvalidTarget,

    /// Hash does not land on the declared chain
    InvalidChainIndex,

    /// Timestamp too far ahead of local time, or not after the parent
    InvalidTimestamp,

    /// Wrong dep count or duplicate deps
    InvalidDeps,

    /// `txs_hash` does not commit to the body
    InvalidTxsHash,

    /// Post-state root disagrees with `dep_state_hash`
    InvalidStateCommitment,

    /// Missing, misplaced or misvalued coinbase
    InvalidCoinbase,

    /// Combined tx gas above the block cap
    GasLimitExceeded,

    /// Too many transactions
    TooManyTxs,

    /// A transaction failed validation
    Tx(TxVerifyErr),
}

impl From<TxVerifyErr> for BlockVerifyErr {
    fn from(other: TxVerifyErr) -> Self {
        Self::Tx(other)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "testnet.header";

    #[test]
    fn genesis_lands_on_its_chain() {
        for (from, to) in [(0u32, 0u32), (0, 1), (1, 0), (3, 3)] {
            let index = ChainIndex::new(from, to);
            let block = Block::genesis(index, 4, KEY);

            assert_eq!(block.chain_index(4), index);
            assert!(block.header.is_genesis());
            assert!(block.header.target().meets(&block.id().0));
            assert!(block.transactions.is_empty());
            assert_eq!(block.header.timestamp, GENESIS_TIMESTAMP);
        }
    }

    #[test]
    fn genesis_is_deterministic() {
        let a = Block::genesis(ChainIndex::new(1, 2), 4, KEY);
        let b = Block::genesis(ChainIndex::new(1, 2), 4, KEY);
        assert_eq!(a.id(), b.id());
    }

    #[test]
    fn header_codec_skips_the_cached_hash() {
        let block = Block::genesis(ChainIndex::new(0, 0), 4, KEY);
        let encoded = crate::codec::encode_to_vec(&block.header).unwrap();
        let mut decoded: BlockHeader = crate::codec::decode(&encoded).unwrap();

        assert_eq!(decoded.hash, None);
        decoded.compute_hash(KEY);
        assert_eq!(decoded.id(), block.id());
        assert_eq!(decoded, block.header);
    }

    #[test]
    fn chain_index_of_hash_uses_low_bits() {
        let mut hash = Hash256::zero();
        hash.0[31] = 9; // 9 = 1 + 2*4 => from 1, to 2 for G=4
        let index = ChainIndex::of_hash(&hash, 4);
        assert_eq!(index, ChainIndex::new(1, 2));

        assert_eq!(index.flat(4), 6);
        assert_eq!(ChainIndex::from_flat(6, 4), index);
    }

    #[test]
    fn dep_positions() {
        let groups = 4;
        // Build a genesis on (1, 2) and fake distinct deps to probe the
        // layout helpers.
        let mut block = Block::genesis(ChainIndex::new(1, 2), groups, KEY);
        let deps: Vec<Hash256> = (0u8..7)
            .map(|i| {
                let mut h = [0; 32];
                h[0] = i + 1;
                Hash256(h)
            })
            .collect();
        block.header.deps = deps.clone();

        // Diagonal deps: groups 0, 2, 3 (own group 1 skipped)
        assert_eq!(block.header.group_dep(0, groups), deps[0]);
        assert_eq!(block.header.group_dep(2, groups), deps[1]);
        assert_eq!(block.header.group_dep(3, groups), deps[2]);

        // Out deps: chains (1, 0..4)
        assert_eq!(block.header.out_dep(0, groups), deps[3]);
        assert_eq!(block.header.out_dep(2, groups), deps[5]);
        assert_eq!(block.header.parent(groups), deps[5]);
    }

    #[test]
    fn validation_rejects_drifted_timestamps() {
        let block = Block::genesis(ChainIndex::new(0, 0), 4, KEY);
        let now = GENESIS_TIMESTAMP;

        assert_eq!(block.header.validate(ChainIndex::new(0, 0), 4, now), Ok(()));
        assert_eq!(
            block
                .header
                .validate(ChainIndex::new(0, 0), 4, now - 3_600_000),
            Err(BlockVerifyErr::InvalidTimestamp)
        );
    }

    #[test]
    fn validation_rejects_the_wrong_chain() {
        let block = Block::genesis(ChainIndex::new(0, 0), 4, KEY);
        assert_eq!(
            block
                .header
                .validate(ChainIndex::new(0, 1), 4, GENESIS_TIMESTAMP),
            Err(BlockVerifyErr::InvalidChainIndex)
        );
    }

    #[test]
    fn validation_rejects_dep_shape() {
        let mut block = Block::genesis(ChainIndex::new(0, 0), 4, KEY);
        block.header.deps.pop();
        assert_eq!(
            block
                .header
                .validate(ChainIndex::new(0, 0), 4, GENESIS_TIMESTAMP),
            Err(BlockVerifyErr::InvalidDeps)
        );
    }

    #[test]
    fn txs_hash_commits_to_order() {
        let key = "k";
        let tx1 =
            Transaction::coinbase(0, 0, crate::primitives::Address::random(), U256::one(), 0, 0, key);
        let tx2 =
            Transaction::coinbase(1, 0, crate::primitives::Address::random(), U256::one(), 0, 0, key);

        let a = Block::compute_txs_hash(&[tx1.clone(), tx2.clone()], key);
        let b = Block::compute_txs_hash(&[tx2, tx1], key);
        assert_ne!(a, b);
    }
}
