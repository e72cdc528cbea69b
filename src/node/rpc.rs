// Copyright (c) 2026 The Lattica Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

//! The operations the core exports to the REST/WebSocket/JSON-RPC
//! layer. Endpoint definitions live outside the core; this module is
//! the typed boundary they call through.

use crate::chain::block_flow::BlockTemplate;
use crate::consensus::Money;
use crate::node::acceptor::NodeMsg;
use crate::primitives::{
    Address, Block, ChainIndex, Hash256, Signature, TokenId, Transaction, UnsignedTransaction,
    U256,
};
use tokio::sync::{broadcast, mpsc, oneshot};
use triomphe::Arc;

#[derive(Debug, Clone, PartialEq)]
pub struct Balance {
    pub total: Money,
    pub locked: Money,
    pub tokens: Vec<(TokenId, U256)>,
    pub locked_tokens: Vec<(TokenId, U256)>,
    pub utxo_count: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TxStatus {
    MemPooled,
    Confirmed {
        block_hash: Hash256,
        tx_index: u32,
        chain_confirmations: u64,
        from_group_confirmations: u64,
        to_group_confirmations: u64,
    },
    NotFound,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChainInfo {
    pub index: ChainIndex,
    pub current_height: u64,
    pub current_hash: Hash256,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelfClique {
    pub network_name: String,
    pub groups: u32,
    pub broker_num: u32,
    pub broker_id: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PeerMisbehavior {
    pub peer: String,
    pub score: u32,
    pub banned: bool,
}

#[derive(Debug, Clone, Default)]
pub struct GasOpts {
    pub gas_amount: Option<u64>,
    pub gas_price: Option<Money>,
}

#[derive(Debug, Clone)]
pub struct Destination {
    pub address: Address,
    pub amount: Money,
    pub tokens: Vec<(TokenId, U256)>,
    pub lock_time: Option<i64>,
}

/// Errors surfaced to API callers, with stable HTTP status classes.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeErr {
    /// Validation failures: 400 class
    InvalidTx(String),
    InvalidBlock(String),
    InsufficientFunds,

    /// 404 class
    NotFound,

    /// Internal failures: 500 class
    Internal(String),
}

impl NodeErr {
    #[must_use]
    pub fn http_status(&self) -> u16 {
        match self {
            Self::InvalidTx(_) | Self::InvalidBlock(_) | Self::InsufficientFunds => 400,
            Self::NotFound => 404,
            Self::Internal(_) => 500,
        }
    }
}

impl std::fmt::Display for NodeErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidTx(reason) => write!(f, "invalid transaction: {reason}"),
            Self::InvalidBlock(reason) => write!(f, "invalid block: {reason}"),
            Self::InsufficientFunds => write!(f, "insufficient funds"),
            Self::NotFound => write!(f, "not found"),
            Self::Internal(reason) => write!(f, "internal error: {reason}"),
        }
    }
}

/// Cloneable handle to the node task. All calls are messages through
/// the bounded mailbox; replies come back on oneshot channels.
#[derive(Clone)]
pub struct NodeHandle {
    pub(crate) sender: mpsc::Sender<NodeMsg>,
}

impl NodeHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> NodeMsg,
    ) -> Result<T, NodeErr> {
        let (reply, rx) = oneshot::channel();
        self.sender
            .send(build(reply))
            .await
            .map_err(|_| NodeErr::Internal("node task is gone".to_owned()))?;
        rx.await
            .map_err(|_| NodeErr::Internal("node task dropped the request".to_owned()))
    }

    /// Validates and applies a block (miner or peer submission).
    pub async fn submit_block(
        &self,
        block: Block,
        origin: Option<String>,
    ) -> Result<(), NodeErr> {
        self.request(|reply| NodeMsg::SubmitBlock {
            block: Box::new(block),
            origin,
            reply: Some(reply),
        })
        .await?
    }

    /// Backpressured block offer for the network layer: drops the block
    /// when the mailbox is full (it will be re-requested later).
    pub fn offer_block(&self, block: Block, origin: Option<String>) -> bool {
        self.sender
            .try_send(NodeMsg::SubmitBlock {
                block: Box::new(block),
                origin,
                reply: None,
            })
            .is_ok()
    }

    /// Validates a transaction and admits it to the mempool.
    pub async fn submit_tx(
        &self,
        unsigned: UnsignedTransaction,
        signatures: Vec<Signature>,
    ) -> Result<Hash256, NodeErr> {
        self.request(|reply| NodeMsg::SubmitTx {
            unsigned: Box::new(unsigned),
            signatures,
            reply,
        })
        .await?
    }

    pub async fn get_block(&self, hash: Hash256) -> Result<Option<Arc<Block>>, NodeErr> {
        self.request(|reply| NodeMsg::GetBlock { hash, reply }).await
    }

    pub async fn get_balance(&self, address: Address) -> Result<Balance, NodeErr> {
        self.request(|reply| NodeMsg::GetBalance { address, reply })
            .await?
    }

    /// Assembles an unsigned transfer; the wallet signs and submits it.
    pub async fn build_transfer_tx(
        &self,
        from: crate::primitives::PublicKey,
        destinations: Vec<Destination>,
        gas: GasOpts,
    ) -> Result<UnsignedTransaction, NodeErr> {
        self.request(|reply| NodeMsg::BuildTransferTx {
            from: Box::new(from),
            destinations,
            gas,
            reply,
        })
        .await?
    }

    pub async fn get_tx_status(
        &self,
        tx_id: Hash256,
        from_group: u32,
        to_group: u32,
    ) -> Result<TxStatus, NodeErr> {
        self.request(|reply| NodeMsg::GetTxStatus {
            tx_id,
            from_group,
            to_group,
            reply,
        })
        .await
    }

    pub async fn get_self_clique(&self) -> Result<SelfClique, NodeErr> {
        self.request(|reply| NodeMsg::GetSelfClique { reply }).await
    }

    pub async fn get_chain_info(&self, from: u32, to: u32) -> Result<ChainInfo, NodeErr> {
        self.request(|reply| NodeMsg::GetChainInfo { from, to, reply })
            .await?
    }

    pub async fn get_misbehaviors(&self) -> Result<Vec<PeerMisbehavior>, NodeErr> {
        self.request(|reply| NodeMsg::GetMisbehaviors { reply }).await
    }

    /// Block template for the mining layer.
    pub async fn prepare_template(
        &self,
        index: ChainIndex,
        miner: Address,
    ) -> Result<BlockTemplate, NodeErr> {
        self.request(|reply| NodeMsg::PrepareTemplate {
            index,
            miner: Box::new(miner),
            reply,
        })
        .await?
    }

    /// Stream of newly applied blocks, for the WebSocket layer.
    pub async fn subscribe_blocks(&self) -> Result<broadcast::Receiver<Arc<Block>>, NodeErr> {
        self.request(|reply| NodeMsg::Subscribe { reply }).await
    }

    /// Mempool transaction lookup.
    pub async fn get_pooled_tx(&self, tx_id: Hash256) -> Result<Option<Transaction>, NodeErr> {
        self.request(|reply| NodeMsg::GetPooledTx { tx_id, reply })
            .await
    }
}
