// Copyright (c) 2026 The Lattica Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

//! Per-chain fork tree. One tree exists per chain index; it tracks every
//! live branch, the tip set, cumulative weights, the confirmed prefix
//! and prunes branches that fell `K` blocks behind.
//!
//! Nodes live in an arena keyed by block hash; parent and children are
//! hashes, never pointers.

use crate::primitives::{Block, ChainIndex, Hash256, U256};
use std::collections::{BTreeSet, HashMap};
use triomphe::Arc;

#[derive(Clone)]
pub struct ForkTreeNode {
    pub block: Arc<Block>,
    pub parent: Option<Hash256>,
    pub children: Vec<Hash256>,
    pub height: u64,
    pub weight: U256,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddResult {
    Added,
    /// Benign, idempotent add.
    AlreadyKnown,
    /// Parent not in the tree; the block must wait for its deps.
    MissingParent(Hash256),
}

pub struct ForkTree {
    index: ChainIndex,
    confirm_depth: u64,
    root: Hash256,
    nodes: HashMap<Hash256, ForkTreeNode>,
    tips: BTreeSet<Hash256>,
    confirmed: Vec<Hash256>,
}

impl ForkTree {
    /// Builds the tree over its genesis block. The genesis sits at
    /// height 0 with weight 0 and is confirmed from the start.
    #[must_use]
    pub fn new(index: ChainIndex, genesis: Arc<Block>, confirm_depth: u64) -> Self {
        let hash = genesis.id();
        let node = ForkTreeNode {
            block: genesis,
            parent: None,
            children: vec![],
            height: 0,
            weight: U256::zero(),
        };

        let mut nodes = HashMap::new();
        nodes.insert(hash, node);

        let mut tips = BTreeSet::new();
        tips.insert(hash);

        Self {
            index,
            confirm_depth,
            root: hash,
            nodes,
            tips,
            confirmed: vec![hash],
        }
    }

    #[must_use]
    pub fn chain_index(&self) -> ChainIndex {
        self.index
    }

    #[must_use]
    pub fn contains(&self, hash: &Hash256) -> bool {
        self.nodes.contains_key(hash)
    }

    /// Panics when absent; callers check `contains` first.
    #[must_use]
    pub fn get_block(&self, hash: &Hash256) -> Arc<Block> {
        self.nodes[hash].block.clone()
    }

    /// Panics when absent; callers check `contains` first.
    #[must_use]
    pub fn get_height(&self, hash: &Hash256) -> u64 {
        self.nodes[hash].height
    }

    /// Panics when absent; callers check `contains` first.
    #[must_use]
    pub fn get_weight(&self, hash: &Hash256) -> U256 {
        self.nodes[hash].weight.clone()
    }

    #[must_use]
    pub fn num_blocks(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_tip(&self, hash: &Hash256) -> bool {
        self.tips.contains(hash)
    }

    #[must_use]
    pub fn all_tips(&self) -> Vec<Hash256> {
        self.tips.iter().copied().collect()
    }

    #[must_use]
    pub fn max_height(&self) -> u64 {
        self.tips
            .iter()
            .map(|t| self.nodes[t].height)
            .max()
            .unwrap_or(0)
    }

    #[must_use]
    pub fn max_weight(&self) -> U256 {
        self.tips
            .iter()
            .map(|t| self.nodes[t].weight.clone())
            .max()
            .unwrap_or_else(U256::zero)
    }

    fn oldest_tip_height(&self) -> u64 {
        self.tips
            .iter()
            .map(|t| self.nodes[t].height)
            .min()
            .unwrap_or(0)
    }

    /// The canonical head: highest tip, ties broken by weight, then by
    /// lexicographically greatest hash. Deterministic across nodes.
    #[must_use]
    pub fn best_tip(&self) -> Hash256 {
        *self
            .tips
            .iter()
            .max_by(|a, b| {
                let na = &self.nodes[*a];
                let nb = &self.nodes[*b];
                na.height
                    .cmp(&nb.height)
                    .then_with(|| na.weight.cmp(&nb.weight))
                    .then_with(|| a.cmp(b))
            })
            .expect("fork tree has no tips")
    }

    /// Appends `block` under `parent`. `work` is the block's own target
    /// work; the node's cumulative weight is the parent's plus `work`.
    pub fn add(&mut self, block: Arc<Block>, parent: Hash256, work: U256) -> AddResult {
        let hash = block.id();

        if self.nodes.contains_key(&hash) {
            return AddResult::AlreadyKnown;
        }

        let (height, weight) = match self.nodes.get(&parent) {
            None => return AddResult::MissingParent(parent),
            Some(p) => (
                p.height + 1,
                p.weight.checked_add(&work).expect("weight overflow"),
            ),
        };

        self.nodes.insert(
            hash,
            ForkTreeNode {
                block,
                parent: Some(parent),
                children: vec![],
                height,
                weight,
            },
        );
        self.nodes.get_mut(&parent).unwrap().children.push(hash);

        self.tips.remove(&parent);
        self.tips.insert(hash);

        self.prune_due_to(height);
        self.confirm_blocks();

        AddResult::Added
    }

    /// Drops every tip that fell `K` or more blocks behind `height`,
    /// walking each dead branch down to its fork point.
    fn prune_due_to(&mut self, height: u64) {
        let stale: Vec<Hash256> = self
            .tips
            .iter()
            .filter(|t| {
                let tip_height = self.nodes[*t].height;
                height >= tip_height + self.confirm_depth
            })
            .copied()
            .collect();

        for tip in stale {
            self.prune_branch(tip);
        }
    }

    fn prune_branch(&mut self, tip: Hash256) {
        self.tips.remove(&tip);
        let mut current = tip;

        loop {
            let node = self.nodes.remove(&current).expect("pruning absent node");
            let Some(parent_hash) = node.parent else {
                // Never prune the root
                self.nodes.insert(current, node);
                return;
            };

            let parent = self.nodes.get_mut(&parent_hash).unwrap();
            parent.children.retain(|c| c != &current);

            if !parent.children.is_empty() || self.confirmed.contains(&parent_hash) {
                return;
            }

            current = parent_hash;
        }
    }

    /// Extends the confirmed prefix: the single child of the last
    /// confirmed block is confirmed once the oldest tip is at least `K`
    /// above it. The prefix only ever grows.
    fn confirm_blocks(&mut self) {
        loop {
            let last = *self.confirmed.last().expect("confirmed never empty");
            let node = &self.nodes[&last];

            if node.children.len() != 1 {
                return;
            }

            let child = node.children[0];
            let child_height = self.nodes[&child].height;

            if self.oldest_tip_height() >= child_height + self.confirm_depth {
                self.confirmed.push(child);
            } else {
                return;
            }
        }
    }

    /// The confirmed block at `height`, if confirmation reached it.
    #[must_use]
    pub fn get_confirmed_block(&self, height: u64) -> Option<Arc<Block>> {
        self.confirmed
            .get(height as usize)
            .map(|h| self.nodes[h].block.clone())
    }

    #[must_use]
    pub fn confirmed_hashes(&self) -> &[Hash256] {
        &self.confirmed
    }

    /// True iff `a` is `b` or an ancestor of `b`.
    #[must_use]
    pub fn is_before(&self, a: &Hash256, b: &Hash256) -> bool {
        if !self.contains(a) || !self.contains(b) {
            return false;
        }

        let target = self.nodes[a].height;
        let mut current = *b;

        while self.nodes[&current].height > target {
            match self.nodes[&current].parent {
                Some(parent) => current = parent,
                None => return false,
            }
        }

        current == *a
    }

    /// Ancestor chain from the root to `hash`, inclusive.
    #[must_use]
    pub fn get_block_slice(&self, hash: &Hash256) -> Vec<Hash256> {
        let mut slice = vec![];
        let mut current = *hash;

        loop {
            slice.push(current);
            match self.nodes[&current].parent {
                Some(parent) => current = parent,
                None => break,
            }
        }

        slice.reverse();
        slice
    }

    /// All descendants of `hash` in height order; used for catch-up
    /// replies to lagging peers.
    #[must_use]
    pub fn get_blocks_after(&self, hash: &Hash256) -> Vec<Arc<Block>> {
        let mut out = vec![];
        let mut queue = vec![*hash];

        while let Some(current) = queue.pop() {
            for child in &self.nodes[&current].children {
                out.push(self.nodes[child].clone());
                queue.push(*child);
            }
        }

        out.sort_by_key(|n| n.height);
        out.into_iter().map(|n| n.block).collect()
    }
}
