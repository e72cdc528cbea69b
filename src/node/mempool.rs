// Copyright (c) 2026 The Lattica Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use crate::consensus::Money;
use crate::primitives::{Hash256, OutputRef, Transaction, TransactionWithFee};
use std::collections::{BTreeSet, HashMap};

/// Default byte budget for pooled transactions.
pub const MEMPOOL_SIZE_BYTES: u64 = 32 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MempoolErr {
    /// An input is already spent by a pooled transaction
    Conflict(Hash256),

    /// The pool is full and the fee is too low to displace anything
    FeeTooLow,
}

/// Gas-price-ordered transaction pool. Double spends against pooled
/// transactions are rejected; when the byte budget runs out the lowest
/// paying transactions are evicted first.
pub struct Mempool {
    max_size_bytes: u64,
    current_size_bytes: u64,
    txs: HashMap<Hash256, TransactionWithFee>,
    /// `(gas price, id)`, iterated in reverse for best-first
    order: BTreeSet<(Money, Hash256)>,
    by_input: HashMap<OutputRef, Hash256>,
}

impl Default for Mempool {
    fn default() -> Self {
        Self::new(MEMPOOL_SIZE_BYTES)
    }
}

impl Mempool {
    #[must_use]
    pub fn new(max_size_bytes: u64) -> Self {
        Self {
            max_size_bytes,
            current_size_bytes: 0,
            txs: HashMap::new(),
            order: BTreeSet::new(),
            by_input: HashMap::new(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.txs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.txs.is_empty()
    }

    #[must_use]
    pub fn size_bytes(&self) -> u64 {
        self.current_size_bytes
    }

    #[must_use]
    pub fn contains(&self, id: &Hash256) -> bool {
        self.txs.contains_key(id)
    }

    #[must_use]
    pub fn get(&self, id: &Hash256) -> Option<&Transaction> {
        self.txs.get(id).map(|t| &t.tx)
    }

    /// Admits a transaction. Idempotent for known ids.
    pub fn insert(&mut self, tx: TransactionWithFee) -> Result<(), MempoolErr> {
        let id = *tx.hash().expect("pooled tx without hash");

        if self.txs.contains_key(&id) {
            return Ok(());
        }

        for input in &tx.tx.unsigned.inputs {
            if let Some(existing) = self.by_input.get(&input.output_ref) {
                return Err(MempoolErr::Conflict(*existing));
            }
        }

        // Evict from the cheap end until the newcomer fits
        while self.current_size_bytes + u64::from(tx.size()) > self.max_size_bytes {
            let Some((cheapest_price, cheapest_id)) = self.order.iter().next().cloned() else {
                return Err(MempoolErr::FeeTooLow);
            };

            if cheapest_price >= *tx.gas_price() {
                return Err(MempoolErr::FeeTooLow);
            }

            self.evict(&cheapest_id);
        }

        self.order.insert((tx.gas_price().clone(), id));
        for input in &tx.tx.unsigned.inputs {
            self.by_input.insert(input.output_ref, id);
        }
        self.current_size_bytes += u64::from(tx.size());
        self.txs.insert(id, tx);

        Ok(())
    }

    fn evict(&mut self, id: &Hash256) {
        if let Some(tx) = self.txs.remove(id) {
            self.order.remove(&(tx.gas_price().clone(), *id));
            for input in &tx.tx.unsigned.inputs {
                self.by_input.remove(&input.output_ref);
            }
            self.current_size_bytes -= u64::from(tx.size());
        }
    }

    /// Drops a transaction, typically because a block included it.
    pub fn remove(&mut self, id: &Hash256) {
        self.evict(id);
    }

    /// Drops every pooled transaction spending one of `spent`.
    pub fn remove_spending(&mut self, spent: &[OutputRef]) {
        let doomed: Vec<Hash256> = spent
            .iter()
            .filter_map(|r| self.by_input.get(r).copied())
            .collect();

        for id in doomed {
            self.evict(&id);
        }
    }

    /// Transactions by descending gas price, for block building.
    #[must_use]
    pub fn collect(&self, limit: usize) -> Vec<Transaction> {
        self.order
            .iter()
            .rev()
            .take(limit)
            .map(|(_, id)| self.txs[id].tx.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::{min_gas_price, MINIMAL_GAS};
    use crate::primitives::{
        Address, AssetOutput, Keypair, TxInput, UnlockScript, UnsignedTransaction, U256,
        TX_VERSION,
    };

    fn pooled_tx(gas_price_multiplier: u64) -> TransactionWithFee {
        let keypair = Keypair::generate();
        let unsigned = UnsignedTransaction {
            version: TX_VERSION,
            network_id: 0,
            script: None,
            gas_amount: MINIMAL_GAS,
            gas_price: min_gas_price()
                .checked_mul(&U256::from(gas_price_multiplier))
                .unwrap(),
            inputs: vec![TxInput {
                output_ref: OutputRef::asset(0, Hash256::random()),
                unlock: UnlockScript::PubKey(keypair.public()),
            }],
            fixed_outputs: vec![AssetOutput::plain(U256::from(5u64), Address::random())],
        };

        let mut tx = Transaction::from_unsigned(unsigned);
        tx.compute_hash("test.tx");
        TransactionWithFee::from_transaction(tx).unwrap()
    }

    #[test]
    fn insert_is_idempotent() {
        let mut mempool = Mempool::default();
        let tx = pooled_tx(1);

        mempool.insert(tx.clone()).unwrap();
        mempool.insert(tx).unwrap();
        assert_eq!(mempool.len(), 1);
    }

    #[test]
    fn double_spends_are_rejected() {
        let mut mempool = Mempool::default();
        let tx = pooled_tx(1);
        let id = *tx.hash().unwrap();

        let mut rival = pooled_tx(2);
        rival.tx.unsigned.inputs[0].output_ref = tx.tx.unsigned.inputs[0].output_ref;
        rival.tx.compute_hash("test.tx");

        mempool.insert(tx).unwrap();
        assert_eq!(
            mempool.insert(rival),
            Err(MempoolErr::Conflict(id))
        );
    }

    #[test]
    fn collect_returns_best_first() {
        let mut mempool = Mempool::default();
        let low = pooled_tx(1);
        let mid = pooled_tx(5);
        let high = pooled_tx(10);

        mempool.insert(low.clone()).unwrap();
        mempool.insert(high.clone()).unwrap();
        mempool.insert(mid.clone()).unwrap();

        let collected = mempool.collect(10);
        assert_eq!(collected.len(), 3);
        assert_eq!(collected[0].hash, high.tx.hash);
        assert_eq!(collected[1].hash, mid.tx.hash);
        assert_eq!(collected[2].hash, low.tx.hash);

        assert_eq!(mempool.collect(1).len(), 1);
    }

    #[test]
    fn full_pool_evicts_the_cheapest() {
        let seed = pooled_tx(1);
        let tx_size = u64::from(seed.size());

        // Room for two transactions
        let mut mempool = Mempool::new(tx_size * 2 + tx_size / 2);
        let low = pooled_tx(1);
        let mid = pooled_tx(5);
        mempool.insert(low.clone()).unwrap();
        mempool.insert(mid.clone()).unwrap();

        // A cheap newcomer cannot displace anything
        assert_eq!(mempool.insert(seed), Err(MempoolErr::FeeTooLow));

        // An expensive one evicts the cheapest
        let high = pooled_tx(10);
        mempool.insert(high.clone()).unwrap();
        assert_eq!(mempool.len(), 2);
        assert!(!mempool.contains(low.hash().unwrap()));
        assert!(mempool.contains(mid.hash().unwrap()));
        assert!(mempool.contains(high.hash().unwrap()));
    }

    #[test]
    fn remove_spending_clears_conflicts() {
        let mut mempool = Mempool::default();
        let tx = pooled_tx(1);
        let spent = tx.tx.unsigned.inputs[0].output_ref;

        mempool.insert(tx).unwrap();
        mempool.remove_spending(&[spent]);
        assert!(mempool.is_empty());
        assert_eq!(mempool.size_bytes(), 0);
    }
}
