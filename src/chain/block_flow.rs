// Copyright (c) 2026 The Lattica Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

//! BlockFlow composes the `G x G` fork trees into one coherent view.
//!
//! Every block names `2G - 1` dependencies; resolving them (one hop
//! through the diagonal chains for foreign groups) yields a full
//! `G^2`-vector of chain tips, the block's *view*. The world state of a
//! block is the state reached by applying every block in its view in
//! dependency order; because chains only interact through declared
//! deps, the result is a function of the dep graph, not of arrival
//! order.
//!
//! All mutation is serialized through the owning task; nothing here is
//! safe for concurrent use.

use crate::chain::backend::{ColumnFamily, KeyValueStore, KvStoreErr};
use crate::chain::cache::{Cache, Layer, Staging};
use crate::chain::chain_config::ChainConfig;
use crate::chain::fork_tree::{AddResult, ForkTree};
use crate::chain::world_state::{AssetPool, TxExecutor, WorldState};
use crate::consensus::{
    block_reward, Target, MAX_GAS_PER_BLOCK, MAX_TXS_PER_BLOCK, MINIMAL_GAS, RETARGET_INTERVAL,
};
use crate::primitives::{
    Address, Block, BlockHeader, BlockVerifyErr, ChainIndex, Hash256, OutputRef, Signature,
    TokenId, Transaction, TxInput, TxOutput, TxVerifyErr, UnlockScript, U256, NONCE_BYTES,
};
use crate::vm::{GasMeter, TxEnv, Value};
use chrono::Utc;
use log::{debug, warn};
use std::collections::{HashMap, HashSet};
use std::sync::Arc as StdArc;
use triomphe::Arc;

#[derive(Debug)]
pub enum BlockFlowErr {
    /// Benign, idempotent add
    AlreadyKnown,

    /// Recoverable; the block waits for these hashes
    MissingDeps(Vec<Hash256>),

    /// Permanent rejection
    Invalid(BlockVerifyErr),

    /// Storage failure
    Kv(KvStoreErr),
}

impl From<BlockVerifyErr> for BlockFlowErr {
    fn from(other: BlockVerifyErr) -> Self {
        Self::Invalid(other)
    }
}

impl From<TxVerifyErr> for BlockFlowErr {
    fn from(other: TxVerifyErr) -> Self {
        Self::Invalid(BlockVerifyErr::Tx(other))
    }
}

impl From<KvStoreErr> for BlockFlowErr {
    fn from(other: KvStoreErr) -> Self {
        Self::Kv(other)
    }
}

/// How a block's transactions are driven through the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ApplyMode {
    /// Fill script results while building a template
    Build,
    /// Check recorded results and the state commitment
    Validate,
    /// Re-apply a cross-chain block inside another cone; recorded
    /// results are checked, the commitment is not (it was computed
    /// against the block's own cone)
    Replay,
}

/// Unmined block handed to the mining layer: everything but the nonce.
#[derive(Debug, Clone)]
pub struct BlockTemplate {
    pub index: ChainIndex,
    pub height: u64,
    pub deps: Vec<Hash256>,
    pub dep_state_hash: Hash256,
    pub txs_hash: Hash256,
    pub timestamp: i64,
    pub target: u32,
    pub transactions: Vec<Transaction>,
}

impl BlockTemplate {
    /// Grinds the nonce until the hash meets the target and lands on
    /// the template's chain. The production miner distributes this
    /// search; dev networks and tests run it inline.
    #[must_use]
    pub fn mine(self, config: &ChainConfig) -> Block {
        let mut header = BlockHeader {
            version: 0,
            deps: self.deps,
            dep_state_hash: self.dep_state_hash,
            txs_hash: self.txs_hash,
            timestamp: self.timestamp,
            target: self.target,
            nonce: [0; NONCE_BYTES],
            hash: None,
        };

        let target = Target::new(self.target);
        let mut counter: u64 = 0;
        loop {
            header.nonce[..8].copy_from_slice(&counter.to_le_bytes());
            header.compute_hash(config.header_key());

            let hash = header.id();
            if ChainIndex::of_hash(&hash, config.groups) == self.index && target.meets(&hash.0) {
                break;
            }

            counter += 1;
        }

        Block {
            header,
            transactions: self.transactions,
        }
    }
}

/// What a spent or created output means for the address index.
struct IndexDelta {
    spent: Vec<(Address, OutputRef)>,
    created: Vec<(Address, OutputRef)>,
}

impl IndexDelta {
    fn new() -> Self {
        Self {
            spent: vec![],
            created: vec![],
        }
    }
}

pub struct BlockFlow {
    config: ChainConfig,
    trees: Vec<ForkTree>,
    genesis_hashes: Vec<Hash256>,

    /// Post-state root of every applied block's cone
    states: HashMap<Hash256, Hash256>,

    /// `tx id -> (block hash, index in block)`
    tx_locations: HashMap<Hash256, (Hash256, u32)>,

    node_cache: Cache<Hash256, Vec<u8>>,
    block_cache: Cache<Hash256, Block>,
    tips_cache: Cache<u32, Vec<Hash256>>,
    address_index: Cache<Vec<u8>, Vec<OutputRef>>,
}

impl BlockFlow {
    /// Builds the flow over its `G^2` genesis blocks and persists them.
    pub fn new(
        store: StdArc<dyn KeyValueStore>,
        config: ChainConfig,
    ) -> Result<Self, BlockFlowErr> {
        let mut trees = Vec::with_capacity(config.chains());
        let mut genesis_hashes = Vec::with_capacity(config.chains());
        let mut states = HashMap::new();

        let node_cache = Cache::new(store.clone(), ColumnFamily::WorldState);
        let mut block_cache = Cache::new(store.clone(), ColumnFamily::Blocks);
        let mut tips_cache = Cache::new(store.clone(), ColumnFamily::Tips);
        let address_index = Cache::new(store, ColumnFamily::AddressIndex);

        for index in config.all_indexes() {
            let genesis = Arc::new(Block::genesis(index, config.groups, config.header_key()));
            let hash = genesis.id();

            block_cache.put(hash, (*genesis).clone());
            tips_cache.put(index.flat(config.groups) as u32, vec![hash]);
            states.insert(hash, Hash256::zero());
            genesis_hashes.push(hash);
            trees.push(ForkTree::new(index, genesis, config.confirm_depth));
        }

        block_cache.persist()?;
        tips_cache.persist()?;

        Ok(Self {
            config,
            trees,
            genesis_hashes,
            states,
            tx_locations: HashMap::new(),
            node_cache,
            block_cache,
            tips_cache,
            address_index,
        })
    }

    #[must_use]
    pub fn config(&self) -> &ChainConfig {
        &self.config
    }

    #[must_use]
    pub fn tree(&self, index: ChainIndex) -> &ForkTree {
        &self.trees[index.flat(self.config.groups)]
    }

    fn tree_mut(&mut self, index: ChainIndex) -> &mut ForkTree {
        &mut self.trees[index.flat(self.config.groups)]
    }

    #[must_use]
    pub fn genesis_hash(&self, index: ChainIndex) -> Hash256 {
        self.genesis_hashes[index.flat(self.config.groups)]
    }

    #[must_use]
    pub fn get_best_tip(&self, index: ChainIndex) -> Hash256 {
        self.tree(index).best_tip()
    }

    #[must_use]
    pub fn get_all_tips(&self) -> Vec<(ChainIndex, Vec<Hash256>)> {
        self.config
            .all_indexes()
            .into_iter()
            .map(|i| (i, self.tree(i).all_tips()))
            .collect()
    }

    /// Looks a block up across all chains.
    #[must_use]
    pub fn get_block(&self, hash: &Hash256) -> Option<Arc<Block>> {
        let index = ChainIndex::of_hash(hash, self.config.groups);
        let tree = self.tree(index);

        if tree.contains(hash) {
            Some(tree.get_block(hash))
        } else {
            None
        }
    }

    /// Where a transaction landed, if anywhere.
    #[must_use]
    pub fn tx_location(&self, tx_id: &Hash256) -> Option<(Hash256, u32)> {
        self.tx_locations.get(tx_id).copied()
    }

    /// Confirmation counts of a block: on its own chain, and as seen by
    /// the diagonal chains of its `from` and `to` groups. Zero when the
    /// block is off the canonical line.
    #[must_use]
    pub fn confirmations(&self, hash: &Hash256) -> Option<(u64, u64, u64)> {
        let groups = self.config.groups;
        let index = ChainIndex::of_hash(hash, groups);
        let tree = self.tree(index);

        if !tree.contains(hash) {
            return None;
        }

        let height = tree.get_height(hash);
        let best = tree.best_tip();
        let chain_conf = if tree.is_before(hash, &best) {
            tree.get_height(&best) - height + 1
        } else {
            0
        };

        let group_conf = |group: u32| -> u64 {
            let diagonal = ChainIndex::new(group, group);
            let diagonal_best = self.tree(diagonal).best_tip();
            let Ok(view) = self.block_view(&diagonal_best) else {
                return 0;
            };

            let implied = view[index.flat(groups)];
            if tree.contains(&implied) && tree.is_before(hash, &implied) {
                tree.get_height(&implied) - height + 1
            } else {
                0
            }
        };

        Some((chain_conf, group_conf(index.from), group_conf(index.to)))
    }

    /// Cumulative weight a dep set represents: the sum of the named
    /// blocks' in-chain weights.
    #[must_use]
    pub fn cal_weight(&self, deps: &[Hash256]) -> U256 {
        let mut weight = U256::zero();

        for dep in deps {
            if dep.is_zero() {
                continue;
            }

            let index = ChainIndex::of_hash(dep, self.config.groups);
            let tree = self.tree(index);

            if tree.contains(dep) {
                weight = weight
                    .checked_add(&tree.get_weight(dep))
                    .expect("weight overflow");
            }
        }

        weight
    }

    /// Ancestor-or-equal across chains: same chain consults the tree,
    /// otherwise `b`'s view must include `a`'s chain at or above `a`.
    #[must_use]
    pub fn is_before(&self, a: &Hash256, b: &Hash256) -> bool {
        let index_a = ChainIndex::of_hash(a, self.config.groups);
        let index_b = ChainIndex::of_hash(b, self.config.groups);

        if index_a == index_b {
            return self.tree(index_a).is_before(a, b);
        }

        let tree_b = self.tree(index_b);
        if !tree_b.contains(b) {
            return false;
        }

        match self.resolved_view(&tree_b.get_block(b).header) {
            Ok(view) => {
                let implied = view[index_a.flat(self.config.groups)];
                self.tree(index_a).is_before(a, &implied)
            }
            Err(_) => false,
        }
    }

    /// Resolves a `2G - 1` dep vector for a block on `own` into the
    /// full `G^2` tip vector of the view it builds on. The own-chain
    /// entry is the in-chain parent; foreign groups resolve through one
    /// hop over the named diagonal block. Genesis blocks (all-zero
    /// deps) see every chain at genesis.
    fn view_of_deps(
        &self,
        deps: &[Hash256],
        own: ChainIndex,
    ) -> Result<Vec<Hash256>, BlockFlowErr> {
        let groups = self.config.groups;
        let mut view = vec![Hash256::zero(); self.config.chains()];
        let mut missing = vec![];

        let dep_at = |pos: usize| deps[pos];

        for g in 0..groups {
            if g == own.from {
                for t in 0..groups {
                    let chain = ChainIndex::new(g, t);
                    view[chain.flat(groups)] =
                        self.dep_or_genesis(dep_at((groups - 1 + t) as usize), chain, &mut missing);
                }
            } else {
                let diagonal_chain = ChainIndex::new(g, g);
                let pos = if g < own.from { g } else { g - 1 } as usize;
                let diagonal = self.dep_or_genesis(dep_at(pos), diagonal_chain, &mut missing);

                let diagonal_header = if self.tree(diagonal_chain).contains(&diagonal) {
                    Some(self.tree(diagonal_chain).get_block(&diagonal).header.clone())
                } else {
                    None
                };

                for t in 0..groups {
                    let chain = ChainIndex::new(g, t);
                    view[chain.flat(groups)] = match &diagonal_header {
                        None => Hash256::zero(),
                        Some(h) if h.is_genesis() => self.genesis_hash(chain),
                        Some(_) if t == g => diagonal,
                        Some(h) => {
                            self.dep_or_genesis(h.out_dep(t, groups), chain, &mut missing)
                        }
                    };
                }
            }
        }

        if missing.is_empty() {
            Ok(view)
        } else {
            Err(BlockFlowErr::MissingDeps(missing))
        }
    }

    /// The `G^2` tip vector of a block's cone, the block itself
    /// included on its own chain.
    fn resolved_view(&self, header: &BlockHeader) -> Result<Vec<Hash256>, BlockFlowErr> {
        let groups = self.config.groups;
        let own = header.chain_index(groups);
        let mut view = self.view_of_deps(&header.deps, own)?;
        view[own.flat(groups)] = header.id();
        Ok(view)
    }

    /// Maps a dep hash to the chain's genesis when zero, and records it
    /// as missing when unknown.
    fn dep_or_genesis(
        &self,
        dep: Hash256,
        chain: ChainIndex,
        missing: &mut Vec<Hash256>,
    ) -> Hash256 {
        if dep.is_zero() {
            return self.genesis_hash(chain);
        }

        if !self.tree(chain).contains(&dep) {
            missing.push(dep);
        }

        dep
    }

    /// The view a block builds on: its parent on its own chain plus its
    /// resolved deps everywhere else.
    fn pre_view(&self, header: &BlockHeader) -> Result<Vec<Hash256>, BlockFlowErr> {
        self.view_of_deps(&header.deps, header.chain_index(self.config.groups))
    }

    /// Selects the canonical `2G - 1` deps for the next block on
    /// `index`: the chain's own best tip, best consistent tips of the
    /// sibling chains, and best consistent diagonal tips of the other
    /// groups (greedy, descending weight, falling back to the parent's
    /// implied view).
    pub fn best_deps(&self, index: ChainIndex) -> Result<Vec<Hash256>, BlockFlowErr> {
        let groups = self.config.groups;
        let parent = self.tree(index).best_tip();
        let parent_view = self.block_view(&parent)?;

        let mut deps = Vec::with_capacity(self.config.deps_len());

        // Diagonal deps of the other groups, ascending group order
        for g in 0..groups {
            if g == index.from {
                continue;
            }

            let diagonal_chain = ChainIndex::new(g, g);
            deps.push(self.pick_diagonal(g, &parent_view, diagonal_chain));
        }

        // Out deps: chains (from, 0..G); the block's own slot holds the
        // parent
        for t in 0..groups {
            let chain = ChainIndex::new(index.from, t);

            if t == index.to {
                deps.push(parent);
            } else {
                deps.push(self.pick_tip(chain, &parent_view));
            }
        }

        Ok(deps)
    }

    /// Resolved view of an in-tree block.
    fn block_view(&self, hash: &Hash256) -> Result<Vec<Hash256>, BlockFlowErr> {
        let index = ChainIndex::of_hash(hash, self.config.groups);
        let header = self.tree(index).get_block(hash).header.clone();
        self.resolved_view(&header)
    }

    /// Best tip of `chain` that extends the parent's view, falling back
    /// to the view itself.
    fn pick_tip(&self, chain: ChainIndex, parent_view: &[Hash256]) -> Hash256 {
        let floor = parent_view[chain.flat(self.config.groups)];
        let tree = self.tree(chain);

        let mut candidates: Vec<Hash256> = tree.all_tips();
        candidates.sort_by(|a, b| {
            tree.get_weight(b)
                .cmp(&tree.get_weight(a))
                .then_with(|| b.cmp(a))
        });

        for candidate in candidates {
            if tree.is_before(&floor, &candidate) {
                return candidate;
            }
        }

        floor
    }

    /// Best diagonal tip of group `g` whose own out-view extends the
    /// parent's view of every `(g, t)` chain.
    fn pick_diagonal(&self, g: u32, parent_view: &[Hash256], diagonal_chain: ChainIndex) -> Hash256 {
        let groups = self.config.groups;
        let tree = self.tree(diagonal_chain);

        let mut candidates: Vec<Hash256> = tree.all_tips();
        candidates.sort_by(|a, b| {
            tree.get_weight(b)
                .cmp(&tree.get_weight(a))
                .then_with(|| b.cmp(a))
        });

        'candidates: for candidate in candidates {
            let header = tree.get_block(&candidate).header.clone();

            for t in 0..groups {
                let chain = ChainIndex::new(g, t);
                let floor = parent_view[chain.flat(groups)];
                let implied = if header.is_genesis() {
                    self.genesis_hash(chain)
                } else if t == g {
                    candidate
                } else {
                    header.out_dep(t, groups)
                };

                if !self.tree(chain).is_before(&floor, &implied) {
                    continue 'candidates;
                }
            }

            return candidate;
        }

        parent_view[diagonal_chain.flat(groups)]
    }

    /// Expected compact target for the child of `parent` on `tree`'s
    /// chain. Retargets on schedule, otherwise inherits the parent's.
    fn expected_target(&self, index: ChainIndex, parent: &Hash256) -> u32 {
        let tree = self.tree(index);
        let parent_block = tree.get_block(parent);
        let parent_header = &parent_block.header;
        let parent_height = tree.get_height(parent);
        let height = parent_height + 1;

        if height % RETARGET_INTERVAL != 0 || height < RETARGET_INTERVAL {
            return parent_header.target;
        }

        let slice = tree.get_block_slice(parent);
        let window_start_height = (height - RETARGET_INTERVAL) as usize;
        let window_start = &slice[window_start_height];
        let start_ts = tree.get_block(window_start).header.timestamp;

        let actual = (parent_header.timestamp - start_ts).max(1) as u64;
        let expected = RETARGET_INTERVAL * self.config.block_target_time_ms;

        parent_header
            .target()
            .retarget(actual, expected)
            .to_compact()
    }

    /// Appends a block to its chain, recomputing the affected view and
    /// the cached world state. Persists atomically per column family on
    /// success.
    pub fn add_and_update_view(&mut self, block: Block) -> Result<(), BlockFlowErr> {
        let groups = self.config.groups;
        let hash = block.id();
        let index = block.chain_index(groups);

        if self.tree(index).contains(&hash) {
            return Err(BlockFlowErr::AlreadyKnown);
        }

        block
            .header
            .validate(index, groups, Utc::now().timestamp_millis())?;

        if block.transactions.len() > MAX_TXS_PER_BLOCK {
            return Err(BlockVerifyErr::TooManyTxs.into());
        }

        // Dep presence
        let parent = block.header.parent(groups);
        let pre_view = self.pre_view(&block.header)?;

        let tree = self.tree(index);
        if !tree.contains(&parent) {
            return Err(BlockFlowErr::MissingDeps(vec![parent]));
        }

        // Target schedule and timestamp against the parent
        let parent_header = tree.get_block(&parent).header.clone();
        if block.header.timestamp <= parent_header.timestamp && !parent_header.is_genesis() {
            return Err(BlockVerifyErr::InvalidTimestamp.into());
        }

        if block.header.target != self.expected_target(index, &parent) {
            return Err(BlockVerifyErr::InvalidTarget.into());
        }

        // The view must extend the parent's view on every chain
        let parent_view = self.block_view(&parent)?;
        for (flat, implied) in pre_view.iter().enumerate() {
            let chain = ChainIndex::from_flat(flat, groups);
            if !self.tree(chain).is_before(&parent_view[flat], implied) {
                return Err(BlockVerifyErr::InvalidDeps.into());
            }
        }

        // txs hash commitment
        let txs_hash = Block::compute_txs_hash(&block.transactions, self.config.tx_key());
        if txs_hash != block.header.txs_hash {
            return Err(BlockVerifyErr::InvalidTxsHash.into());
        }

        // Execute the cone delta plus the block itself on the parent's
        // state
        let height = self.tree(index).get_height(&parent) + 1;
        let mut block = block;
        let index_delta = self.compute_state(
            &mut block,
            index,
            &parent,
            &parent_view,
            &pre_view,
            height,
            ApplyMode::Validate,
        )?;

        // Commit to the tree and the persistent caches
        let work = block.header.work();
        let block = Arc::new(block);
        let add_result = self.tree_mut(index).add(block.clone(), parent, work);
        debug_assert_eq!(add_result, AddResult::Added);

        for (i, tx) in block.transactions.iter().enumerate() {
            self.tx_locations.insert(tx.id(), (hash, i as u32));
        }

        self.block_cache.put(hash, (*block).clone());
        self.tips_cache
            .put(index.flat(groups) as u32, self.tree(index).all_tips());
        self.apply_index_delta(index_delta);

        self.node_cache.persist()?;
        self.block_cache.persist()?;
        self.tips_cache.persist()?;
        self.address_index.persist()?;

        debug!(
            "applied block {} on chain {:?} at height {}",
            hash.to_hex(),
            index,
            height
        );

        Ok(())
    }

    /// Applies the cone delta (blocks visible to `block` but not to its
    /// parent) and then the block itself, committing trie nodes into
    /// the node cache. Returns the address-index delta of the new
    /// block.
    #[allow(clippy::too_many_arguments)]
    fn compute_state(
        &mut self,
        block: &mut Block,
        index: ChainIndex,
        parent: &Hash256,
        parent_view: &[Hash256],
        pre_view: &[Hash256],
        height: u64,
        mode: ApplyMode,
    ) -> Result<IndexDelta, BlockFlowErr> {
        let groups = self.config.groups;
        let pre_root = *self
            .states
            .get(parent)
            .ok_or(BlockFlowErr::MissingDeps(vec![*parent]))?;

        // Collect the delta blocks per chain
        let mut delta: HashMap<Hash256, Arc<Block>> = HashMap::new();
        for (flat, new_tip) in pre_view.iter().enumerate() {
            let chain = ChainIndex::from_flat(flat, groups);
            let old_tip = parent_view[flat];

            let mut current = *new_tip;
            while current != old_tip {
                let tree = self.tree(chain);
                let node_block = tree.get_block(&current);
                let node_parent = node_block.header.parent(groups);
                delta.insert(current, node_block.clone());

                if node_block.header.is_genesis() {
                    break;
                }

                current = node_parent;
            }
        }

        // Dependency-ordered application (Kahn over direct deps within
        // the delta, deterministic tie-break on the hash). The replay
        // list is materialized first so the staging can hold the node
        // cache exclusively.
        let replays: Vec<(Block, ChainIndex, u64)> = topo_order(&delta)
            .into_iter()
            .map(|hash| {
                let replay_index = ChainIndex::of_hash(&hash, groups);
                let tree = self.tree(replay_index);
                ((*delta[&hash]).clone(), replay_index, tree.get_height(&hash))
            })
            .collect();

        let mut world = WorldState::new(pre_root);
        let mut staging = Staging::new(&mut self.node_cache);

        for (mut replayed, replay_index, replay_height) in replays {
            apply_block(
                &mut world,
                &mut staging,
                &mut replayed,
                &self.config,
                replay_index,
                replay_height,
                ApplyMode::Replay,
            )
            .map_err(|err| {
                warn!("cone replay diverged: {err:?}");
                BlockFlowErr::Invalid(err)
            })?;
        }

        let index_delta = apply_block(
            &mut world,
            &mut staging,
            block,
            &self.config,
            index,
            height,
            mode,
        )?;

        if mode == ApplyMode::Validate && world.root() != block.header.dep_state_hash {
            return Err(BlockVerifyErr::InvalidStateCommitment.into());
        }

        if mode == ApplyMode::Build {
            block.header.dep_state_hash = world.root();
        }

        staging.commit();

        if mode == ApplyMode::Validate {
            self.states.insert(block.id(), world.root());
        }

        Ok(index_delta)
    }

    fn apply_index_delta(&mut self, delta: IndexDelta) {
        for (address, output_ref) in delta.spent {
            let key = address.to_bytes();
            if let Ok(Some(mut refs)) = self.address_index.get(&key) {
                refs.retain(|r| r != &output_ref);
                self.address_index.put(key, refs);
            }
        }

        for (address, output_ref) in delta.created {
            let key = address.to_bytes();
            let mut refs = match self.address_index.get(&key) {
                Ok(Some(refs)) => refs,
                _ => vec![],
            };

            if !refs.contains(&output_ref) {
                refs.push(output_ref);
            }
            self.address_index.put(key, refs);
        }
    }

    /// Unspent outputs of an address in the current canonical view of
    /// its group, split into spendable and still-locked.
    pub fn get_owned_outputs(
        &mut self,
        address: &Address,
        now_ms: i64,
    ) -> Result<Vec<(OutputRef, TxOutput, bool)>, BlockFlowErr> {
        let group = address.group(self.config.groups);
        let diagonal = ChainIndex::new(group, group);
        let best = self.tree(diagonal).best_tip();
        let root = *self.states.get(&best).expect("best tip has no state");

        let refs = self
            .address_index
            .get(&address.to_bytes())?
            .unwrap_or_default();

        let world = WorldState::new(root);
        let mut out = vec![];

        for output_ref in refs {
            if let Some(output) = world.get_output(&mut self.node_cache, &output_ref)? {
                let locked = output
                    .as_asset()
                    .is_some_and(|asset| asset.is_locked_at(now_ms));
                out.push((output_ref, output, locked));
            }
        }

        Ok(out)
    }

    /// Contract state in the canonical view of the contract's group.
    pub fn get_contract_state(
        &mut self,
        id: &crate::primitives::ContractId,
    ) -> Result<Option<crate::chain::world_state::ContractState>, BlockFlowErr> {
        let group = Address::Contract(*id).group(self.config.groups);
        let diagonal = ChainIndex::new(group, group);
        let best = self.tree(diagonal).best_tip();
        let root = *self.states.get(&best).expect("best tip has no state");

        let world = WorldState::new(root);
        Ok(world.get_contract(&mut self.node_cache, id)?)
    }

    /// Builds a block template on `index`: canonical deps, mempool
    /// transactions by descending gas price under the block gas cap,
    /// and a coinbase paying reward plus fees to `miner`.
    pub fn prepare_block_template(
        &mut self,
        index: ChainIndex,
        miner: Address,
        candidates: Vec<Transaction>,
    ) -> Result<BlockTemplate, BlockFlowErr> {
        let groups = self.config.groups;
        let deps = self.best_deps(index)?;
        let parent = deps[(groups - 1 + index.to) as usize];
        let parent_header = self.tree(index).get_block(&parent).header.clone();
        let height = self.tree(index).get_height(&parent) + 1;
        let timestamp = Utc::now()
            .timestamp_millis()
            .max(parent_header.timestamp + 1);
        let target = self.expected_target(index, &parent);

        // Select group-matching, conflict-free transactions under the
        // gas cap
        let mut selected: Vec<Transaction> = vec![];
        let mut spent: HashSet<OutputRef> = HashSet::new();
        let mut gas_used: u64 = 0;

        for tx in candidates {
            if selected.len() + 1 >= MAX_TXS_PER_BLOCK {
                break;
            }

            if tx_chain(&tx, groups) != Some(index) {
                continue;
            }

            if gas_used + tx.unsigned.gas_amount > MAX_GAS_PER_BLOCK {
                continue;
            }

            if tx
                .unsigned
                .inputs
                .iter()
                .any(|input| spent.contains(&input.output_ref))
            {
                continue;
            }

            for input in &tx.unsigned.inputs {
                spent.insert(input.output_ref);
            }
            gas_used += tx.unsigned.gas_amount;
            selected.push(tx);
        }

        let template_header = BlockHeader {
            version: 0,
            deps: deps.clone(),
            dep_state_hash: Hash256::zero(),
            txs_hash: Hash256::zero(),
            timestamp,
            target,
            nonce: [0; NONCE_BYTES],
            hash: None,
        };

        // First pass: run the non-coinbase transactions to learn the
        // fees, dropping any that fail
        let fees = {
            let mut probe = Block {
                header: template_header.clone(),
                transactions: Vec::with_capacity(selected.len() + 1),
            };
            probe.transactions.push(Transaction::coinbase(
                height,
                timestamp,
                miner.clone(),
                block_reward(height),
                self.config.network_id,
                self.config.coinbase_lock_time_ms,
                self.config.tx_key(),
            ));
            probe.transactions.extend(selected);

            let parent_view = self.block_view(&parent)?;
            let template_view = self.view_of_deps(&deps, index)?;
            self.compute_state(
                &mut probe,
                index,
                &parent,
                &parent_view,
                &template_view,
                height,
                ApplyMode::Build,
            )?;

            // Keep only transactions that survived the probe
            selected = probe.transactions.split_off(1);
            selected
                .iter()
                .map(|tx| tx.fee().unwrap_or_else(U256::zero))
                .fold(U256::zero(), |acc, fee| {
                    acc.checked_add(&fee).expect("fee overflow")
                })
        };

        // Second pass with the exact coinbase value
        let reward = block_reward(height)
            .checked_add(&fees)
            .expect("reward overflow");
        let coinbase = Transaction::coinbase(
            height,
            timestamp,
            miner,
            reward,
            self.config.network_id,
            self.config.coinbase_lock_time_ms,
            self.config.tx_key(),
        );

        let mut transactions = Vec::with_capacity(selected.len() + 1);
        transactions.push(coinbase);
        transactions.extend(selected);

        let mut block = Block {
            header: template_header,
            transactions,
        };

        let parent_view = self.block_view(&parent)?;
        let template_view = self.view_of_deps(&deps, index)?;
        self.compute_state(
            &mut block,
            index,
            &parent,
            &parent_view,
            &template_view,
            height,
            ApplyMode::Build,
        )?;

        let txs_hash = Block::compute_txs_hash(&block.transactions, self.config.tx_key());

        Ok(BlockTemplate {
            index,
            height,
            deps,
            dep_state_hash: block.header.dep_state_hash,
            txs_hash,
            timestamp,
            target,
            transactions: block.transactions,
        })
    }
}

/// Deterministic dependency order over a delta set: Kahn's algorithm on
/// direct deps, smallest hash first among the ready blocks.
fn topo_order(delta: &HashMap<Hash256, Arc<Block>>) -> Vec<Hash256> {
    let mut indegree: HashMap<Hash256, usize> = HashMap::new();
    let mut dependents: HashMap<Hash256, Vec<Hash256>> = HashMap::new();

    for (hash, block) in delta {
        indegree.entry(*hash).or_insert(0);

        for dep in &block.header.deps {
            if delta.contains_key(dep) {
                *indegree.entry(*hash).or_insert(0) += 1;
                dependents.entry(*dep).or_default().push(*hash);
            }
        }
    }

    let mut ready: Vec<Hash256> = indegree
        .iter()
        .filter(|(_, d)| **d == 0)
        .map(|(h, _)| *h)
        .collect();
    ready.sort_unstable();

    let mut order = Vec::with_capacity(delta.len());
    while let Some(hash) = ready.first().copied() {
        ready.remove(0);
        order.push(hash);

        if let Some(deps) = dependents.get(&hash) {
            for dependent in deps.clone() {
                let d = indegree.get_mut(&dependent).unwrap();
                *d -= 1;
                if *d == 0 {
                    ready.push(dependent);
                    ready.sort_unstable();
                }
            }
        }
    }

    debug_assert_eq!(order.len(), delta.len(), "delta contains a cycle");
    order
}

/// The chain a transaction belongs to, derived from its input groups
/// and output groups. `None` when the inputs disagree.
#[must_use]
pub fn tx_chain(tx: &Transaction, groups: u32) -> Option<ChainIndex> {
    let mut from = None;
    for input in &tx.unsigned.inputs {
        let group = input.output_ref.group(groups);
        if from.is_some_and(|f| f != group) {
            return None;
        }
        from = Some(group);
    }

    let from = from?;
    let to = tx
        .unsigned
        .fixed_outputs
        .iter()
        .map(|o| o.lockup.group(groups))
        .find(|g| *g != from)
        .unwrap_or(from);

    Some(ChainIndex::new(from, to))
}

/// Applies one block's transactions onto `world` through `layer`.
/// Transactions run inside their own staging; a failed script discards
/// its staging and settles inputs and fixed outputs only. Returns the
/// address-index delta.
#[allow(clippy::too_many_arguments)]
fn apply_block<L: Layer<Hash256, Vec<u8>>>(
    world: &mut WorldState,
    layer: &mut L,
    block: &mut Block,
    config: &ChainConfig,
    index: ChainIndex,
    height: u64,
    mode: ApplyMode,
) -> Result<IndexDelta, BlockVerifyErr> {
    let timestamp = block.header.timestamp;
    let mut delta = IndexDelta::new();

    if block.header.is_genesis() {
        return Ok(delta);
    }

    if block.transactions.is_empty() || !block.transactions[0].is_coinbase() {
        return Err(BlockVerifyErr::InvalidCoinbase);
    }

    let mut gas_total: u64 = 0;
    let mut fees = U256::zero();
    let mut kept: Vec<Transaction> = Vec::with_capacity(block.transactions.len());
    let mut dropped = 0usize;

    let transactions = std::mem::take(&mut block.transactions);
    let mut txs_iter = transactions.into_iter();
    let coinbase = txs_iter.next().unwrap();

    for mut tx in txs_iter {
        if tx.is_coinbase() {
            return Err(BlockVerifyErr::InvalidCoinbase);
        }

        gas_total += tx.unsigned.gas_amount;
        if gas_total > MAX_GAS_PER_BLOCK {
            return Err(BlockVerifyErr::GasLimitExceeded);
        }

        match apply_tx(world, layer, &mut tx, config, index, height, timestamp, mode) {
            Ok(fee) => {
                fees = fees.checked_add(&fee).ok_or(TxVerifyErr::InvalidAmount)?;
                delta_for_tx(&tx, config, &mut delta);
                kept.push(tx);
            }

            Err(err) if mode == ApplyMode::Build => {
                debug!("dropping tx from template: {err:?}");
                dropped += 1;
            }

            Err(err) => return Err(err.into()),
        }
    }

    if dropped > 0 {
        debug!("dropped {dropped} transactions while building");
    }

    // Coinbase settles last; nothing in the block can spend its locked
    // outputs anyway.
    apply_coinbase(world, layer, &coinbase, config, height, &fees, mode)?;
    delta_for_tx(&coinbase, config, &mut delta);

    let mut transactions = Vec::with_capacity(kept.len() + 1);
    transactions.push(coinbase);
    transactions.extend(kept);
    block.transactions = transactions;

    Ok(delta)
}

fn delta_for_tx(tx: &Transaction, config: &ChainConfig, delta: &mut IndexDelta) {
    let groups = config.groups;

    for input in &tx.unsigned.inputs {
        // The owner is recorded when the output is created; spending
        // removes by ref alone, so the address slot here uses the
        // unlock script's implied address.
        if let Some(address) = unlock_address(&input.unlock, config) {
            delta.spent.push((address, input.output_ref));
        }
    }

    for (i, output) in tx.all_outputs().iter().enumerate() {
        let key = TxOutput::output_key(&tx.id(), i as u32, config.output_key());
        let output_ref = match output {
            TxOutput::Asset(o) => OutputRef::asset(o.lockup.group(groups), key),
            TxOutput::Contract(o) => {
                OutputRef::contract(Address::Contract(o.contract_id).group(groups), key)
            }
        };

        delta.created.push((output.lockup(), output_ref));
    }
}

fn unlock_address(unlock: &UnlockScript, config: &ChainConfig) -> Option<Address> {
    match unlock {
        UnlockScript::PubKey(key) => Some(key.to_address()),
        UnlockScript::MultiSig(_) => None,
        UnlockScript::Script { script, .. } => Some(Address::ScriptHash(
            script.script_hash(config.contract_key()),
        )),
    }
}

fn apply_coinbase<L: Layer<Hash256, Vec<u8>>>(
    world: &mut WorldState,
    layer: &mut L,
    coinbase: &Transaction,
    config: &ChainConfig,
    height: u64,
    fees: &U256,
    mode: ApplyMode,
) -> Result<(), BlockVerifyErr> {
    coinbase
        .verify_structure(config.network_id)
        .map_err(BlockVerifyErr::Tx)?;

    if mode != ApplyMode::Build {
        let expected = block_reward(height)
            .checked_add(fees)
            .ok_or(BlockVerifyErr::InvalidCoinbase)?;

        if coinbase.unsigned.fixed_outputs[0].amount != expected {
            return Err(BlockVerifyErr::InvalidCoinbase);
        }
    }

    let output = TxOutput::Asset(coinbase.unsigned.fixed_outputs[0].clone());
    let key = TxOutput::output_key(&coinbase.id(), 0, config.output_key());
    let output_ref = OutputRef::asset(output.group(config.groups), key);

    world
        .add_output(layer, &output_ref, &output)
        .map_err(|_| BlockVerifyErr::Tx(TxVerifyErr::BackendErr))?;
    Ok(())
}

/// Settles and (when present) executes one transaction, mutating
/// `world` through a per-transaction staging. Returns the fee.
#[allow(clippy::too_many_arguments)]
fn apply_tx<L: Layer<Hash256, Vec<u8>>>(
    world: &mut WorldState,
    layer: &mut L,
    tx: &mut Transaction,
    config: &ChainConfig,
    index: ChainIndex,
    height: u64,
    timestamp: i64,
    mode: ApplyMode,
) -> Result<U256, TxVerifyErr> {
    tx.verify_structure(config.network_id)?;

    let groups = config.groups;
    let fee = tx.fee().ok_or(TxVerifyErr::InvalidAmount)?;

    // Scripts are only allowed on the diagonal chains; their contract
    // interactions stay within one group.
    if tx.unsigned.script.is_some() && !index.is_intra_group() {
        return Err(TxVerifyErr::WrongGroup);
    }

    for output in &tx.unsigned.fixed_outputs {
        let group = output.lockup.group(groups);
        if group != index.from && group != index.to {
            return Err(TxVerifyErr::WrongGroup);
        }
    }

    // First attempt: settle plus script
    let attempt = run_tx_once(world, layer, tx, config, index, height, timestamp, true);

    let (new_world, outcome) = match attempt {
        Ok(done) => done,
        Err(TxRunErr::Hard(err)) => return Err(err),
        Err(TxRunErr::Script(vm_err)) => {
            debug!("script failed, settling without it: {vm_err:?}");
            match run_tx_once(world, layer, tx, config, index, height, timestamp, false) {
                Ok(done) => done,
                Err(TxRunErr::Hard(err)) => return Err(err),
                Err(TxRunErr::Script(_)) => unreachable!("settle-only run cannot fail a script"),
            }
        }
    };

    match mode {
        ApplyMode::Build => {
            tx.script_execution_ok = outcome.ok;
            tx.generated_outputs = outcome.generated_outputs;
            tx.contract_inputs = outcome.contract_inputs;
        }

        ApplyMode::Validate | ApplyMode::Replay => {
            if tx.script_execution_ok != outcome.ok
                || tx.generated_outputs != outcome.generated_outputs
                || tx.contract_inputs != outcome.contract_inputs
            {
                return Err(TxVerifyErr::Error("recorded script outcome diverges"));
            }
        }
    }

    *world = new_world;
    Ok(fee)
}

struct TxOutcome {
    ok: bool,
    generated_outputs: Vec<TxOutput>,
    contract_inputs: Vec<OutputRef>,
}

enum TxRunErr {
    /// The transaction is invalid regardless of its script
    Hard(TxVerifyErr),
    /// Only the script failed; settle without it
    Script(crate::vm::VmErr),
}

impl From<TxVerifyErr> for TxRunErr {
    fn from(other: TxVerifyErr) -> Self {
        Self::Hard(other)
    }
}

/// One settle-and-execute pass inside a fresh staging. On success the
/// staging commits into `layer` and the updated world is returned; any
/// error discards the staging.
#[allow(clippy::too_many_arguments)]
fn run_tx_once<L: Layer<Hash256, Vec<u8>>>(
    world: &WorldState,
    layer: &mut L,
    tx: &Transaction,
    config: &ChainConfig,
    index: ChainIndex,
    height: u64,
    timestamp: i64,
    with_script: bool,
) -> Result<(WorldState, TxOutcome), TxRunErr> {
    let groups = config.groups;
    let mut staging = Staging::new(layer);
    let mut tx_world = *world;
    let tx_id = tx.id();

    // Settle inputs
    let mut available: HashMap<Address, AssetPool> = HashMap::new();
    let mut in_micas = U256::zero();
    let mut in_tokens: HashMap<TokenId, U256> = HashMap::new();
    let mut sig_cursor = 0usize;

    for input in &tx.unsigned.inputs {
        if input.output_ref.is_contract_ref() {
            return Err(TxVerifyErr::MissingInput.into());
        }

        if input.output_ref.group(groups) != index.from {
            return Err(TxVerifyErr::WrongGroup.into());
        }

        let output = tx_world
            .get_output(&mut staging, &input.output_ref)
            .map_err(|_| TxVerifyErr::BackendErr)?
            .ok_or(TxVerifyErr::MissingInput)?;

        let TxOutput::Asset(asset) = &output else {
            return Err(TxVerifyErr::MissingInput.into());
        };

        if asset.is_locked_at(timestamp) {
            return Err(TxVerifyErr::OutputLocked.into());
        }

        verify_unlock(input, asset, &tx_id, &tx.input_signatures, &mut sig_cursor, config)?;

        if !tx_world
            .remove_output(&mut staging, &input.output_ref)
            .map_err(|_| TxVerifyErr::BackendErr)?
        {
            return Err(TxVerifyErr::MissingInput.into());
        }

        in_micas = in_micas
            .checked_add(&asset.amount)
            .ok_or(TxVerifyErr::InvalidAmount)?;
        for (token, amount) in &asset.tokens {
            let entry = in_tokens.entry(*token).or_insert_with(U256::zero);
            *entry = entry
                .checked_add(amount)
                .ok_or(TxVerifyErr::InvalidAmount)?;
        }

        let pool = available.entry(asset.lockup.clone()).or_default();
        pool.micas = pool
            .micas
            .checked_add(&asset.amount)
            .ok_or(TxVerifyErr::InvalidAmount)?;
        for (token, amount) in &asset.tokens {
            let entry = pool.tokens.entry(*token).or_insert_with(U256::zero);
            *entry = entry
                .checked_add(amount)
                .ok_or(TxVerifyErr::InvalidAmount)?;
        }
    }

    if sig_cursor != tx.input_signatures.len() {
        return Err(TxVerifyErr::InvalidSignature.into());
    }

    // Fixed outputs
    let mut out_micas = U256::zero();
    let mut out_tokens: HashMap<TokenId, U256> = HashMap::new();

    for (i, output) in tx.unsigned.fixed_outputs.iter().enumerate() {
        let output = TxOutput::Asset(output.clone());
        output.verify().map_err(TxRunErr::Hard)?;

        let key = TxOutput::output_key(&tx_id, i as u32, config.output_key());
        let output_ref = OutputRef::asset(output.group(groups), key);
        tx_world
            .add_output(&mut staging, &output_ref, &output)
            .map_err(|_| TxVerifyErr::BackendErr)?;

        out_micas = out_micas
            .checked_add(output.amount())
            .ok_or(TxVerifyErr::InvalidAmount)?;
        for (token, amount) in output.tokens() {
            let entry = out_tokens.entry(*token).or_insert_with(U256::zero);
            *entry = entry
                .checked_add(amount)
                .ok_or(TxVerifyErr::InvalidAmount)?;
        }
    }

    // Script execution
    let mut outcome = TxOutcome {
        ok: true,
        generated_outputs: vec![],
        contract_inputs: vec![],
    };
    let mut minted: Vec<(TokenId, U256)> = vec![];
    let mut burned: Vec<(TokenId, U256)> = vec![];
    let mut contract_in_micas = U256::zero();
    let mut contract_in_tokens: Vec<(TokenId, U256)> = vec![];

    if with_script {
        if let Some(script) = &tx.unsigned.script {
            let mut executor = TxExecutor::new(
                tx_world,
                &mut staging,
                tx_id,
                tx.unsigned.fixed_outputs.len() as u32,
                groups,
                config.output_key(),
                config.contract_key(),
                available,
            );

            let env = TxEnv {
                tx_id,
                block_height: height,
                block_timestamp: timestamp,
                signatures: &tx.script_signatures,
            };

            let script_gas = tx.unsigned.gas_amount.saturating_sub(MINIMAL_GAS);
            let mut gas = GasMeter::new(script_gas);

            match script.execute_stateful(&env, &mut executor, vec![], &mut gas) {
                Ok(_) => {
                    let result = executor.finalize().map_err(TxRunErr::Script)?;
                    tx_world = WorldState::new(result.root);

                    // Generated asset outputs get refs past the fixed
                    // ones; contract outputs were placed by the
                    // executor.
                    for (i, output) in result.generated_outputs.iter().enumerate() {
                        output.verify().map_err(TxRunErr::Hard)?;

                        out_micas = out_micas
                            .checked_add(output.amount())
                            .ok_or(TxVerifyErr::InvalidAmount)?;
                        for (token, amount) in output.tokens() {
                            let entry = out_tokens.entry(*token).or_insert_with(U256::zero);
                            *entry = entry
                                .checked_add(amount)
                                .ok_or(TxVerifyErr::InvalidAmount)?;
                        }

                        if let TxOutput::Asset(_) = output {
                            let position = tx.unsigned.fixed_outputs.len() + i;
                            let key = TxOutput::output_key(
                                &tx_id,
                                position as u32,
                                config.output_key(),
                            );
                            let output_ref = OutputRef::asset(output.group(groups), key);
                            tx_world
                                .add_output(&mut staging, &output_ref, output)
                                .map_err(|_| TxVerifyErr::BackendErr)?;
                        }
                    }

                    minted = result.minted;
                    burned = result.burned;
                    contract_in_micas = result.contract_in_micas;
                    contract_in_tokens = result.contract_in_tokens;

                    outcome.generated_outputs = result.generated_outputs;
                    outcome.contract_inputs = result.contract_inputs;
                }

                Err(vm_err) => {
                    staging.discard();
                    return Err(TxRunErr::Script(vm_err));
                }
            }
        }
    } else if tx.unsigned.script.is_some() {
        outcome.ok = false;
    }

    // Conservation: everything that entered (asset inputs plus consumed
    // contract outputs) equals everything that left (all outputs plus
    // the fee); tokens likewise, modulo script mint and burn.
    let in_total = in_micas
        .checked_add(&contract_in_micas)
        .ok_or(TxVerifyErr::InvalidAmount)?;
    let out_checked = out_micas
        .checked_add(&fee_of(tx)?)
        .ok_or(TxVerifyErr::InvalidAmount)?;

    if outcome.ok {
        if in_total != out_checked {
            return Err(TxVerifyErr::InsufficientFunds.into());
        }

        token_conservation(&in_tokens, &contract_in_tokens, &out_tokens, &minted, &burned)?;
    } else {
        if in_total < out_checked {
            return Err(TxVerifyErr::InsufficientFunds.into());
        }

        // Fixed outputs of a failed-script tx cannot conjure tokens
        for (token, amount) in &out_tokens {
            if in_tokens.get(token).map_or(true, |have| have < amount) {
                return Err(TxVerifyErr::TokenImbalance.into());
            }
        }
    }

    staging.commit();
    Ok((tx_world, outcome))
}

fn fee_of(tx: &Transaction) -> Result<U256, TxVerifyErr> {
    tx.fee().ok_or(TxVerifyErr::InvalidAmount)
}

fn token_conservation(
    in_tokens: &HashMap<TokenId, U256>,
    contract_in_tokens: &[(TokenId, U256)],
    out_tokens: &HashMap<TokenId, U256>,
    minted: &[(TokenId, U256)],
    burned: &[(TokenId, U256)],
) -> Result<(), TxRunErr> {
    let mut budget: HashMap<TokenId, U256> = in_tokens.clone();

    for (token, amount) in contract_in_tokens {
        let entry = budget.entry(*token).or_insert_with(U256::zero);
        *entry = entry
            .checked_add(amount)
            .ok_or(TxVerifyErr::InvalidAmount)?;
    }

    for (token, amount) in minted {
        let entry = budget.entry(*token).or_insert_with(U256::zero);
        *entry = entry
            .checked_add(amount)
            .ok_or(TxVerifyErr::InvalidAmount)?;
    }

    for (token, amount) in burned {
        let entry = budget.get_mut(token).ok_or(TxVerifyErr::TokenImbalance)?;
        *entry = entry
            .checked_sub(amount)
            .ok_or(TxVerifyErr::TokenImbalance)?;
    }

    for (token, amount) in out_tokens {
        let entry = budget.get_mut(token).ok_or(TxVerifyErr::TokenImbalance)?;
        *entry = entry
            .checked_sub(amount)
            .ok_or(TxVerifyErr::TokenImbalance)?;
    }

    if budget.values().any(|v| !v.is_zero()) {
        return Err(TxVerifyErr::TokenImbalance.into());
    }

    Ok(())
}

/// Checks an input's unlock witness against the output's lockup.
pub(crate) fn verify_unlock(
    input: &TxInput,
    asset: &crate::primitives::AssetOutput,
    tx_id: &Hash256,
    signatures: &[Signature],
    sig_cursor: &mut usize,
    config: &ChainConfig,
) -> Result<(), TxVerifyErr> {
    match (&asset.lockup, &input.unlock) {
        (Address::PubKeyHash(hash), UnlockScript::PubKey(key)) => {
            if &key.key_hash() != hash {
                return Err(TxVerifyErr::InvalidSignature);
            }

            let signature = signatures
                .get(*sig_cursor)
                .ok_or(TxVerifyErr::InvalidSignature)?;
            *sig_cursor += 1;

            if !key.verify(tx_id.as_bytes(), signature) {
                return Err(TxVerifyErr::InvalidSignature);
            }

            Ok(())
        }

        (
            Address::MultiSig {
                threshold,
                key_hashes,
            },
            UnlockScript::MultiSig(reveals),
        ) => {
            if reveals.len() != *threshold as usize {
                return Err(TxVerifyErr::InvalidSignature);
            }

            let mut last_position: Option<u8> = None;
            for (position, key) in reveals {
                if last_position.is_some_and(|p| p >= *position) {
                    return Err(TxVerifyErr::InvalidSignature);
                }
                last_position = Some(*position);

                let expected = key_hashes
                    .get(*position as usize)
                    .ok_or(TxVerifyErr::InvalidSignature)?;
                if &key.key_hash() != expected {
                    return Err(TxVerifyErr::InvalidSignature);
                }

                let signature = signatures
                    .get(*sig_cursor)
                    .ok_or(TxVerifyErr::InvalidSignature)?;
                *sig_cursor += 1;

                if !key.verify(tx_id.as_bytes(), signature) {
                    return Err(TxVerifyErr::InvalidSignature);
                }
            }

            Ok(())
        }

        (Address::ScriptHash(hash), UnlockScript::Script { script, args }) => {
            if &script.script_hash(config.contract_key()) != hash {
                return Err(TxVerifyErr::InvalidSignature);
            }

            let env = TxEnv {
                tx_id: *tx_id,
                block_height: 0,
                block_timestamp: 0,
                signatures,
            };
            let mut gas = GasMeter::new(MINIMAL_GAS);
            let stack = script
                .execute_stateless(&env, args.clone(), &mut gas)
                .map_err(TxVerifyErr::ScriptExecutionFailed)?;

            match stack.last() {
                Some(Value::Bool(true)) => Ok(()),
                _ => Err(TxVerifyErr::ScriptExecutionFailed(
                    crate::vm::VmErr::AssertionFailed,
                )),
            }
        }

        _ => Err(TxVerifyErr::InvalidSignature),
    }
}
