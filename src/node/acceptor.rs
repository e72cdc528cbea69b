// Copyright (c) 2026 The Lattica Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

//! The block-acceptor task. It owns the BlockFlow, the mempool, the
//! buffer of blocks waiting for missing deps and the peer misbehavior
//! scorer; every mutation of chain state is serialized through its
//! mailbox. The mailbox is bounded: the network layer offers blocks
//! with `try_send` and drops on overflow, to be re-requested later.

use crate::chain::backend::KeyValueStore;
use crate::chain::block_flow::{tx_chain, BlockFlow, BlockFlowErr};
use crate::chain::chain_config::ChainConfig;
use crate::consensus::{min_gas_price, MINIMAL_GAS};
use crate::node::mempool::{Mempool, MempoolErr};
use crate::node::rpc::{
    Balance, ChainInfo, Destination, GasOpts, NodeErr, NodeHandle, PeerMisbehavior, SelfClique,
    TxStatus,
};
use crate::primitives::{
    Address, AssetOutput, Block, ChainIndex, Hash256, PublicKey, Signature, TokenId, Transaction,
    TransactionWithFee, TxInput, UnlockScript, UnsignedTransaction, U256, TX_VERSION,
};
use chrono::Utc;
use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::Arc as StdArc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use triomphe::Arc;

/// Mailbox bound; excess inbound blocks are dropped and re-requested.
pub const MAILBOX_SIZE: usize = 1_024;

/// Max blocks parked while waiting for deps.
pub const PENDING_BLOCKS_CAP: usize = 512;

/// Subscribers this far behind lose blocks.
const BROADCAST_CAPACITY: usize = 256;

/// Demerit points per offence and the ban threshold.
const DEMERIT_INVALID_BLOCK: u32 = 20;
pub const BAN_SCORE: u32 = 100;

/// Score decays by one point per this many milliseconds.
const DECAY_INTERVAL_MS: i64 = 60_000;

pub enum NodeMsg {
    SubmitBlock {
        block: Box<Block>,
        origin: Option<String>,
        reply: Option<oneshot::Sender<Result<(), NodeErr>>>,
    },
    SubmitTx {
        unsigned: Box<UnsignedTransaction>,
        signatures: Vec<Signature>,
        reply: oneshot::Sender<Result<Hash256, NodeErr>>,
    },
    GetBlock {
        hash: Hash256,
        reply: oneshot::Sender<Option<Arc<Block>>>,
    },
    GetBalance {
        address: Address,
        reply: oneshot::Sender<Result<Balance, NodeErr>>,
    },
    BuildTransferTx {
        from: Box<PublicKey>,
        destinations: Vec<Destination>,
        gas: GasOpts,
        reply: oneshot::Sender<Result<UnsignedTransaction, NodeErr>>,
    },
    GetTxStatus {
        tx_id: Hash256,
        from_group: u32,
        to_group: u32,
        reply: oneshot::Sender<TxStatus>,
    },
    GetSelfClique {
        reply: oneshot::Sender<SelfClique>,
    },
    GetChainInfo {
        from: u32,
        to: u32,
        reply: oneshot::Sender<Result<ChainInfo, NodeErr>>,
    },
    GetMisbehaviors {
        reply: oneshot::Sender<Vec<PeerMisbehavior>>,
    },
    PrepareTemplate {
        index: ChainIndex,
        miner: Box<Address>,
        reply: oneshot::Sender<Result<crate::chain::block_flow::BlockTemplate, NodeErr>>,
    },
    Subscribe {
        reply: oneshot::Sender<broadcast::Receiver<Arc<Block>>>,
    },
    GetPooledTx {
        tx_id: Hash256,
        reply: oneshot::Sender<Option<Transaction>>,
    },
}

/// Peer demerit bookkeeping with linear decay.
#[derive(Default)]
pub struct MisbehaviorScorer {
    scores: HashMap<String, (u32, i64)>,
}

impl MisbehaviorScorer {
    pub fn demerit(&mut self, peer: &str, points: u32) {
        let now = Utc::now().timestamp_millis();
        let entry = self.scores.entry(peer.to_owned()).or_insert((0, now));
        let decayed = Self::decayed(entry.0, entry.1, now);
        *entry = (decayed.saturating_add(points), now);

        if entry.0 >= BAN_SCORE {
            warn!("peer {peer} crossed the ban threshold");
        }
    }

    fn decayed(score: u32, last: i64, now: i64) -> u32 {
        let steps = ((now - last) / DECAY_INTERVAL_MS).max(0) as u32;
        score.saturating_sub(steps)
    }

    #[must_use]
    pub fn is_banned(&self, peer: &str) -> bool {
        let now = Utc::now().timestamp_millis();
        self.scores
            .get(peer)
            .map_or(false, |(score, last)| Self::decayed(*score, *last, now) >= BAN_SCORE)
    }

    #[must_use]
    pub fn snapshot(&self) -> Vec<PeerMisbehavior> {
        let now = Utc::now().timestamp_millis();
        let mut out: Vec<PeerMisbehavior> = self
            .scores
            .iter()
            .map(|(peer, (score, last))| {
                let score = Self::decayed(*score, *last, now);
                PeerMisbehavior {
                    peer: peer.clone(),
                    score,
                    banned: score >= BAN_SCORE,
                }
            })
            .filter(|m| m.score > 0)
            .collect();
        out.sort_by(|a, b| b.score.cmp(&a.score));
        out
    }
}

/// Blocks parked until a missing dep arrives.
#[derive(Default)]
struct PendingBlocks {
    by_dep: HashMap<Hash256, Vec<Block>>,
    count: usize,
}

impl PendingBlocks {
    fn park(&mut self, dep: Hash256, block: Block) {
        if self.count >= PENDING_BLOCKS_CAP {
            debug!("pending buffer full, dropping block");
            return;
        }

        self.count += 1;
        self.by_dep.entry(dep).or_default().push(block);
    }

    fn take(&mut self, dep: &Hash256) -> Vec<Block> {
        let blocks = self.by_dep.remove(dep).unwrap_or_default();
        self.count -= blocks.len();
        blocks
    }
}

pub struct Node {
    block_flow: BlockFlow,
    mempool: Mempool,
    pending: PendingBlocks,
    scorer: MisbehaviorScorer,
    new_blocks: broadcast::Sender<Arc<Block>>,
}

/// Builds the node state and spawns its task. The returned handle is
/// the only way in.
pub fn spawn(
    store: StdArc<dyn KeyValueStore>,
    config: ChainConfig,
) -> Result<(NodeHandle, JoinHandle<()>), BlockFlowErr> {
    let block_flow = BlockFlow::new(store, config)?;
    let (new_blocks, _) = broadcast::channel(BROADCAST_CAPACITY);
    let mut node = Node {
        block_flow,
        mempool: Mempool::default(),
        pending: PendingBlocks::default(),
        scorer: MisbehaviorScorer::default(),
        new_blocks,
    };

    let (sender, mut receiver) = mpsc::channel(MAILBOX_SIZE);
    let task = tokio::spawn(async move {
        while let Some(msg) = receiver.recv().await {
            node.handle(msg);
        }

        info!("node mailbox closed, shutting down");
    });

    Ok((NodeHandle { sender }, task))
}

impl Node {
    fn handle(&mut self, msg: NodeMsg) {
        match msg {
            NodeMsg::SubmitBlock {
                block,
                origin,
                reply,
            } => {
                let result = self.submit_block(*block, origin.as_deref());
                if let Some(reply) = reply {
                    let _ = reply.send(result);
                }
            }

            NodeMsg::SubmitTx {
                unsigned,
                signatures,
                reply,
            } => {
                let _ = reply.send(self.submit_tx(*unsigned, signatures));
            }

            NodeMsg::GetBlock { hash, reply } => {
                let _ = reply.send(self.block_flow.get_block(&hash));
            }

            NodeMsg::GetBalance { address, reply } => {
                let _ = reply.send(self.get_balance(&address));
            }

            NodeMsg::BuildTransferTx {
                from,
                destinations,
                gas,
                reply,
            } => {
                let _ = reply.send(self.build_transfer_tx(&from, destinations, gas));
            }

            NodeMsg::GetTxStatus {
                tx_id,
                from_group,
                to_group,
                reply,
            } => {
                let _ = reply.send(self.get_tx_status(&tx_id, from_group, to_group));
            }

            NodeMsg::GetSelfClique { reply } => {
                let config = self.block_flow.config();
                let _ = reply.send(SelfClique {
                    network_name: config.network_name().to_owned(),
                    groups: config.groups,
                    broker_num: config.broker_num,
                    broker_id: config.broker_id,
                });
            }

            NodeMsg::GetChainInfo { from, to, reply } => {
                let _ = reply.send(self.get_chain_info(from, to));
            }

            NodeMsg::GetMisbehaviors { reply } => {
                let _ = reply.send(self.scorer.snapshot());
            }

            NodeMsg::PrepareTemplate {
                index,
                miner,
                reply,
            } => {
                let candidates = self.mempool.collect(crate::consensus::MAX_TXS_PER_BLOCK);
                let result = self
                    .block_flow
                    .prepare_block_template(index, *miner, candidates)
                    .map_err(|err| NodeErr::Internal(format!("{err:?}")));
                let _ = reply.send(result);
            }

            NodeMsg::Subscribe { reply } => {
                let _ = reply.send(self.new_blocks.subscribe());
            }

            NodeMsg::GetPooledTx { tx_id, reply } => {
                let _ = reply.send(self.mempool.get(&tx_id).cloned());
            }
        }
    }

    /// Validates and applies a block, then retries everything that was
    /// waiting for it.
    fn submit_block(&mut self, mut block: Block, origin: Option<&str>) -> Result<(), NodeErr> {
        if let Some(peer) = origin {
            if self.scorer.is_banned(peer) {
                return Err(NodeErr::InvalidBlock("peer is banned".to_owned()));
            }
        }

        let config = self.block_flow.config();
        block.compute_hashes(config.header_key(), config.tx_key());

        let mut applied = match self.try_apply(block, origin) {
            Ok(applied) => applied,
            Err(err) => return Err(err),
        };

        // Unparked blocks apply in waves until no more progress
        while let Some(hash) = applied.pop() {
            for waiting in self.pending.take(&hash) {
                match self.try_apply(waiting, None) {
                    Ok(more) => applied.extend(more),
                    Err(err) => debug!("parked block failed on retry: {err}"),
                }
            }
        }

        Ok(())
    }

    /// Single application attempt; returns the hashes newly applied (at
    /// most one).
    fn try_apply(&mut self, block: Block, origin: Option<&str>) -> Result<Vec<Hash256>, NodeErr> {
        let hash = block.id();

        match self.block_flow.add_and_update_view(block.clone()) {
            Ok(()) => {
                self.on_applied(&block);
                Ok(vec![hash])
            }

            Err(BlockFlowErr::AlreadyKnown) => Ok(vec![]),

            Err(BlockFlowErr::MissingDeps(deps)) => {
                debug!(
                    "parking block {} on {} missing deps",
                    hash.to_hex(),
                    deps.len()
                );
                // The network layer re-requests the missing hashes with
                // backoff; the block waits on the first one.
                self.pending.park(deps[0], block);
                Ok(vec![])
            }

            Err(BlockFlowErr::Invalid(err)) => {
                if let Some(peer) = origin {
                    self.scorer.demerit(peer, DEMERIT_INVALID_BLOCK);
                }
                Err(NodeErr::InvalidBlock(format!("{err:?}")))
            }

            Err(BlockFlowErr::Kv(err)) => Err(NodeErr::Internal(err.to_string())),
        }
    }

    fn on_applied(&mut self, block: &Block) {
        // Included transactions leave the pool, as does anything that
        // now double spends.
        let mut spent = vec![];
        for tx in &block.transactions {
            self.mempool.remove(&tx.id());
            for input in &tx.unsigned.inputs {
                spent.push(input.output_ref);
            }
        }
        self.mempool.remove_spending(&spent);

        let _ = self.new_blocks.send(Arc::new(block.clone()));
    }

    fn submit_tx(
        &mut self,
        unsigned: UnsignedTransaction,
        signatures: Vec<Signature>,
    ) -> Result<Hash256, NodeErr> {
        let config = self.block_flow.config();
        let mut tx = Transaction::from_unsigned(unsigned);
        tx.input_signatures = signatures;
        tx.compute_hash(config.tx_key());
        let id = tx.id();

        tx.verify_structure(config.network_id)
            .map_err(|err| NodeErr::InvalidTx(format!("{err:?}")))?;

        let Some(index) = tx_chain(&tx, config.groups) else {
            return Err(NodeErr::InvalidTx("inputs span multiple groups".to_owned()));
        };

        if !config.serves(index.from) {
            return Err(NodeErr::InvalidTx(format!(
                "chain {index:?} is not served by this broker"
            )));
        }

        let with_fee = TransactionWithFee::from_transaction(tx)
            .map_err(|err| NodeErr::InvalidTx(format!("{err:?}")))?;

        match self.mempool.insert(with_fee) {
            Ok(()) => Ok(id),
            Err(MempoolErr::Conflict(existing)) => Err(NodeErr::InvalidTx(format!(
                "double spend against pooled tx {}",
                existing.to_hex()
            ))),
            Err(MempoolErr::FeeTooLow) => {
                Err(NodeErr::InvalidTx("fee too low for a full pool".to_owned()))
            }
        }
    }

    fn get_balance(&mut self, address: &Address) -> Result<Balance, NodeErr> {
        let now = Utc::now().timestamp_millis();
        let outputs = self
            .block_flow
            .get_owned_outputs(address, now)
            .map_err(|err| NodeErr::Internal(format!("{err:?}")))?;

        let mut balance = Balance {
            total: U256::zero(),
            locked: U256::zero(),
            tokens: vec![],
            locked_tokens: vec![],
            utxo_count: outputs.len() as u32,
        };

        let mut tokens: HashMap<TokenId, U256> = HashMap::new();
        let mut locked_tokens: HashMap<TokenId, U256> = HashMap::new();

        for (_, output, locked) in outputs {
            let (micas_acc, token_acc) = if locked {
                (&mut balance.locked, &mut locked_tokens)
            } else {
                (&mut balance.total, &mut tokens)
            };

            *micas_acc = micas_acc
                .checked_add(output.amount())
                .ok_or_else(|| NodeErr::Internal("balance overflow".to_owned()))?;

            for (token, amount) in output.tokens() {
                let entry = token_acc.entry(*token).or_insert_with(U256::zero);
                *entry = entry
                    .checked_add(amount)
                    .ok_or_else(|| NodeErr::Internal("balance overflow".to_owned()))?;
            }
        }

        balance.tokens = sorted_tokens(tokens);
        balance.locked_tokens = sorted_tokens(locked_tokens);
        Ok(balance)
    }

    fn build_transfer_tx(
        &mut self,
        from: &PublicKey,
        destinations: Vec<Destination>,
        gas: GasOpts,
    ) -> Result<UnsignedTransaction, NodeErr> {
        if destinations.is_empty() {
            return Err(NodeErr::InvalidTx("no destinations".to_owned()));
        }

        let config = self.block_flow.config().clone();
        let sender = from.to_address();
        let from_group = sender.group(config.groups);

        // All foreign destinations must settle in one group, because a
        // transaction lives on a single (from, to) chain.
        let mut to_group = from_group;
        for destination in &destinations {
            let group = destination.address.group(config.groups);
            if group != from_group {
                if to_group != from_group && group != to_group {
                    return Err(NodeErr::InvalidTx(
                        "destinations span multiple groups".to_owned(),
                    ));
                }
                to_group = group;
            }
        }

        let gas_amount = gas.gas_amount.unwrap_or(MINIMAL_GAS);
        let gas_price = gas.gas_price.unwrap_or_else(min_gas_price);
        let fee = U256::from(gas_amount)
            .checked_mul(&gas_price)
            .ok_or_else(|| NodeErr::InvalidTx("fee overflow".to_owned()))?;

        // Required micas and tokens
        let mut need = fee.clone();
        let mut need_tokens: HashMap<TokenId, U256> = HashMap::new();
        for destination in &destinations {
            need = need
                .checked_add(&destination.amount)
                .ok_or_else(|| NodeErr::InvalidTx("amount overflow".to_owned()))?;
            for (token, amount) in &destination.tokens {
                let entry = need_tokens.entry(*token).or_insert_with(U256::zero);
                *entry = entry
                    .checked_add(amount)
                    .ok_or_else(|| NodeErr::InvalidTx("amount overflow".to_owned()))?;
            }
        }

        // Greedy coin selection over spendable outputs
        let now = Utc::now().timestamp_millis();
        let owned = self
            .block_flow
            .get_owned_outputs(&sender, now)
            .map_err(|err| NodeErr::Internal(format!("{err:?}")))?;

        let mut inputs = vec![];
        let mut have = U256::zero();
        let mut have_tokens: HashMap<TokenId, U256> = HashMap::new();

        for (output_ref, output, locked) in owned {
            if locked {
                continue;
            }

            let covered = have >= need
                && need_tokens
                    .iter()
                    .all(|(token, amount)| have_tokens.get(token).map_or(false, |h| h >= amount));
            if covered {
                break;
            }

            have = have
                .checked_add(output.amount())
                .ok_or_else(|| NodeErr::Internal("balance overflow".to_owned()))?;
            for (token, amount) in output.tokens() {
                let entry = have_tokens.entry(*token).or_insert_with(U256::zero);
                *entry = entry
                    .checked_add(amount)
                    .ok_or_else(|| NodeErr::Internal("balance overflow".to_owned()))?;
            }

            inputs.push(TxInput {
                output_ref,
                unlock: UnlockScript::PubKey(from.clone()),
            });
        }

        let covered = have >= need
            && need_tokens
                .iter()
                .all(|(token, amount)| have_tokens.get(token).map_or(false, |h| h >= amount));
        if !covered {
            return Err(NodeErr::InsufficientFunds);
        }

        // Destination outputs plus change back to the sender
        let mut fixed_outputs: Vec<AssetOutput> = destinations
            .into_iter()
            .map(|d| AssetOutput {
                amount: d.amount,
                lockup: d.address,
                tokens: d.tokens,
                lock_time: d.lock_time.unwrap_or(0),
                message: vec![],
            })
            .collect();

        let change = have.checked_sub(&need).expect("covered implies change >= 0");
        let mut change_tokens: Vec<(TokenId, U256)> = vec![];
        for (token, amount) in sorted_tokens(have_tokens) {
            let needed = need_tokens.get(&token).cloned().unwrap_or_else(U256::zero);
            let leftover = amount.checked_sub(&needed).expect("covered implies leftover >= 0");
            if !leftover.is_zero() {
                change_tokens.push((token, leftover));
            }
        }

        if change.is_zero() && !change_tokens.is_empty() {
            // A zero-mica output is invalid; the carrier for the token
            // change is missing.
            return Err(NodeErr::InvalidTx(
                "token change needs a mica carrier".to_owned(),
            ));
        }

        if !change.is_zero() {
            let mut change_output = AssetOutput::plain(change, sender);
            change_output.tokens = change_tokens;
            fixed_outputs.push(change_output);
        }

        Ok(UnsignedTransaction {
            version: TX_VERSION,
            network_id: config.network_id,
            script: None,
            gas_amount,
            gas_price,
            inputs,
            fixed_outputs,
        })
    }

    fn get_tx_status(&self, tx_id: &Hash256, _from: u32, _to: u32) -> TxStatus {
        if self.mempool.contains(tx_id) {
            return TxStatus::MemPooled;
        }

        let Some((block_hash, tx_index)) = self.block_flow.tx_location(tx_id) else {
            return TxStatus::NotFound;
        };

        let Some((chain, from_group, to_group)) = self.block_flow.confirmations(&block_hash)
        else {
            return TxStatus::NotFound;
        };

        TxStatus::Confirmed {
            block_hash,
            tx_index,
            chain_confirmations: chain,
            from_group_confirmations: from_group,
            to_group_confirmations: to_group,
        }
    }

    fn get_chain_info(&self, from: u32, to: u32) -> Result<ChainInfo, NodeErr> {
        let config = self.block_flow.config();

        if from >= config.groups || to >= config.groups {
            return Err(NodeErr::NotFound);
        }

        let index = ChainIndex::new(from, to);
        let tree = self.block_flow.tree(index);
        let best = tree.best_tip();

        Ok(ChainInfo {
            index,
            current_height: tree.get_height(&best),
            current_hash: best,
        })
    }
}

fn sorted_tokens(tokens: HashMap<TokenId, U256>) -> Vec<(TokenId, U256)> {
    let mut out: Vec<(TokenId, U256)> = tokens.into_iter().collect();
    out.sort_by(|a, b| a.0.cmp(&b.0));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::backend::MemoryBackend;
    use crate::node::rpc::TxStatus;
    use crate::primitives::Keypair;

    fn test_config() -> ChainConfig {
        let mut config = ChainConfig::new("testnet", 0, 2, 3);
        config.coinbase_lock_time_ms = 0;
        config
    }

    fn keypair_in_group(groups: u32, group: u32) -> Keypair {
        loop {
            let keypair = Keypair::generate();
            if keypair.public().to_address().group(groups) == group {
                return keypair;
            }
        }
    }

    #[tokio::test]
    async fn blocks_and_transfers_flow_through_the_node() {
        let store: StdArc<dyn KeyValueStore> = StdArc::new(MemoryBackend::new());
        let config = test_config();
        let (handle, _task) = spawn(store, config.clone()).unwrap();

        let sender = keypair_in_group(2, 0);
        let receiver = keypair_in_group(2, 1);
        let index = ChainIndex::new(0, 0);

        let mut new_blocks = handle.subscribe_blocks().await.unwrap();

        // Mine a funding block through the template path
        let template = handle
            .prepare_template(index, sender.public().to_address())
            .await
            .unwrap();
        let block = template.mine(&config);
        handle.submit_block(block.clone(), None).await.unwrap();

        let seen = new_blocks.recv().await.unwrap();
        assert_eq!(seen.id(), block.id());

        let stored = handle.get_block(block.id()).await.unwrap().unwrap();
        assert_eq!(stored.id(), block.id());

        // The miner's balance reflects the coinbase
        let balance = handle
            .get_balance(sender.public().to_address())
            .await
            .unwrap();
        assert_eq!(balance.utxo_count, 1);
        assert!(balance.total > U256::zero());

        // Build, sign and submit a cross-group transfer
        let unsigned = handle
            .build_transfer_tx(
                sender.public(),
                vec![crate::node::rpc::Destination {
                    address: receiver.public().to_address(),
                    amount: U256::from(2_000u64),
                    tokens: vec![],
                    lock_time: None,
                }],
                GasOpts::default(),
            )
            .await
            .unwrap();

        let mut tx = Transaction::from_unsigned(unsigned.clone());
        tx.compute_hash(config.tx_key());
        let signature = sender.sign(tx.id().as_bytes());

        let tx_id = handle
            .submit_tx(unsigned, vec![signature])
            .await
            .unwrap();
        assert_eq!(tx_id, tx.id());
        assert_eq!(
            handle.get_tx_status(tx_id, 0, 1).await.unwrap(),
            TxStatus::MemPooled
        );

        // The transfer gets mined on (0, 1) and confirms
        let miner = keypair_in_group(2, 1).public().to_address();
        let template = handle
            .prepare_template(ChainIndex::new(0, 1), miner)
            .await
            .unwrap();
        assert_eq!(template.transactions.len(), 2);
        let block = template.mine(&config);
        handle.submit_block(block.clone(), None).await.unwrap();

        match handle.get_tx_status(tx_id, 0, 1).await.unwrap() {
            TxStatus::Confirmed {
                block_hash,
                tx_index,
                chain_confirmations,
                ..
            } => {
                assert_eq!(block_hash, block.id());
                assert_eq!(tx_index, 1);
                assert_eq!(chain_confirmations, 1);
            }
            other => panic!("expected confirmation, got {other:?}"),
        }

        let received = handle
            .get_balance(receiver.public().to_address())
            .await
            .unwrap();
        assert_eq!(received.total, U256::from(2_000u64));

        // Surface queries
        let clique = handle.get_self_clique().await.unwrap();
        assert_eq!(clique.groups, 2);

        let info = handle.get_chain_info(0, 1).await.unwrap();
        assert_eq!(info.current_height, 1);
        assert_eq!(info.current_hash, block.id());

        assert!(handle.get_misbehaviors().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn out_of_order_blocks_park_and_recover() {
        let store: StdArc<dyn KeyValueStore> = StdArc::new(MemoryBackend::new());
        let config = test_config();
        let (handle, _task) = spawn(store, config.clone()).unwrap();

        let miner = keypair_in_group(2, 0).public().to_address();
        let index = ChainIndex::new(0, 0);

        // Mine two blocks on a side node
        let side_store: StdArc<dyn KeyValueStore> = StdArc::new(MemoryBackend::new());
        let mut side = BlockFlow::new(side_store, config.clone()).unwrap();
        let t1 = side
            .prepare_block_template(index, miner.clone(), vec![])
            .unwrap();
        let b1 = t1.mine(&config);
        side.add_and_update_view(b1.clone()).unwrap();
        let t2 = side
            .prepare_block_template(index, miner, vec![])
            .unwrap();
        let b2 = t2.mine(&config);

        // The child arrives first, parks, and applies once the parent
        // shows up
        handle.submit_block(b2.clone(), Some("peer-1".to_owned())).await.unwrap();
        assert!(handle.get_block(b2.id()).await.unwrap().is_none());

        handle.submit_block(b1.clone(), Some("peer-1".to_owned())).await.unwrap();
        assert!(handle.get_block(b1.id()).await.unwrap().is_some());
        assert!(handle.get_block(b2.id()).await.unwrap().is_some());

        // Honest relaying earns no demerits
        assert!(handle.get_misbehaviors().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn invalid_blocks_demerit_their_origin() {
        let store: StdArc<dyn KeyValueStore> = StdArc::new(MemoryBackend::new());
        let config = test_config();
        let (handle, _task) = spawn(store, config.clone()).unwrap();

        let miner = keypair_in_group(2, 0).public().to_address();
        let index = ChainIndex::new(0, 0);

        let template = handle.prepare_template(index, miner).await.unwrap();
        let mut tampered = template;
        tampered.dep_state_hash = Hash256([0xcd; 32]);
        let block = tampered.mine(&config);

        let result = handle
            .submit_block(block, Some("rogue".to_owned()))
            .await;
        assert!(matches!(result, Err(NodeErr::InvalidBlock(_))));

        let misbehaviors = handle.get_misbehaviors().await.unwrap();
        assert_eq!(misbehaviors.len(), 1);
        assert_eq!(misbehaviors[0].peer, "rogue");
        assert!(misbehaviors[0].score > 0);
    }
}
