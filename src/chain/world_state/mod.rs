// Copyright (c) 2026 The Lattica Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

//! The authenticated world state: unspent outputs, contract states and
//! event logs, all living in one trie whose root is the block header's
//! `dep_state_hash`. Block execution layers a staging above the node
//! cache; transaction execution layers another staging above that, so a
//! failed script discards exactly its own writes.

use crate::chain::cache::Layer;
use crate::chain::KvStoreErr;
use crate::consensus::DUST_AMOUNT_MICAS;
use crate::primitives::{
    Address, AssetOutput, ContractId, ContractOutput, Hash256, OutputRef, TokenId, TxOutput, U256,
};
use crate::vm::{Script, StateAccess, Value, VmErr};
use bincode::{Decode, Encode};
use std::collections::{HashMap, HashSet};

pub mod trie;

pub type LogStatesId = ContractId;

const UTXO_PREFIX: u8 = 0x00;
const CONTRACT_PREFIX: u8 = 0x01;
const LOG_PREFIX: u8 = 0x02;

/// On-chain state of one contract: its code, mutable fields and the
/// reference of the output holding its asset balance.
#[derive(Clone, PartialEq, Debug, Encode, Decode)]
pub struct ContractState {
    pub code: Script,
    pub fields: Vec<Value>,
    pub output_ref: OutputRef,
}

impl ContractState {
    #[must_use]
    pub fn code_hash(&self, key: &str) -> Hash256 {
        self.code.script_hash(key)
    }
}

#[derive(Clone, PartialEq, Debug, Encode, Decode)]
pub struct LogEntry {
    pub counter: u64,
    pub event_type: u32,
    pub fields: Vec<Value>,
}

/// Append-only event log of one contract.
#[derive(Clone, PartialEq, Debug, Default, Encode, Decode)]
pub struct LogStates {
    pub entries: Vec<LogEntry>,
}

impl LogStates {
    pub fn append(&mut self, event_type: u32, fields: Vec<Value>) {
        self.entries.push(LogEntry {
            counter: self.entries.len() as u64,
            event_type,
            fields,
        });
    }

    /// Entries of one event type with counters in `[from, to)`.
    #[must_use]
    pub fn in_range(&self, event_type: u32, from: u64, to: u64) -> Vec<&LogEntry> {
        self.entries
            .iter()
            .filter(|e| e.event_type == event_type && e.counter >= from && e.counter < to)
            .collect()
    }
}

/// A state snapshot, named by its trie root. Cheap to copy; all node
/// data lives in the layered store.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct WorldState {
    root: Hash256,
}

impl WorldState {
    #[must_use]
    pub fn empty() -> Self {
        Self {
            root: Hash256::zero(),
        }
    }

    #[must_use]
    pub fn new(root: Hash256) -> Self {
        Self { root }
    }

    /// The state commitment (`dep_state_hash`).
    #[must_use]
    pub fn root(&self) -> Hash256 {
        self.root
    }

    fn utxo_key(output_ref: &OutputRef) -> Vec<u8> {
        let mut key = vec![UTXO_PREFIX];
        key.extend_from_slice(&crate::codec::encode_to_vec(output_ref).unwrap());
        key
    }

    fn contract_key(id: &ContractId) -> Vec<u8> {
        let mut key = vec![CONTRACT_PREFIX];
        key.extend_from_slice(id.as_bytes());
        key
    }

    fn log_key(id: &LogStatesId) -> Vec<u8> {
        let mut key = vec![LOG_PREFIX];
        key.extend_from_slice(id.as_bytes());
        key
    }

    pub fn get_output<L: Layer<Hash256, Vec<u8>>>(
        &self,
        store: &mut L,
        output_ref: &OutputRef,
    ) -> Result<Option<TxOutput>, KvStoreErr> {
        match trie::get(store, &self.root, &Self::utxo_key(output_ref))? {
            None => Ok(None),
            Some(bytes) => Ok(Some(crate::codec::decode(&bytes)?)),
        }
    }

    pub fn add_output<L: Layer<Hash256, Vec<u8>>>(
        &mut self,
        store: &mut L,
        output_ref: &OutputRef,
        output: &TxOutput,
    ) -> Result<(), KvStoreErr> {
        self.root = trie::insert(
            store,
            &self.root,
            &Self::utxo_key(output_ref),
            crate::codec::encode_to_vec(output)?,
        )?;
        Ok(())
    }

    /// Removes a spent output. Returns whether it was present.
    pub fn remove_output<L: Layer<Hash256, Vec<u8>>>(
        &mut self,
        store: &mut L,
        output_ref: &OutputRef,
    ) -> Result<bool, KvStoreErr> {
        let key = Self::utxo_key(output_ref);

        if trie::get(store, &self.root, &key)?.is_none() {
            return Ok(false);
        }

        self.root = trie::remove(store, &self.root, &key)?;
        Ok(true)
    }

    pub fn get_contract<L: Layer<Hash256, Vec<u8>>>(
        &self,
        store: &mut L,
        id: &ContractId,
    ) -> Result<Option<ContractState>, KvStoreErr> {
        match trie::get(store, &self.root, &Self::contract_key(id))? {
            None => Ok(None),
            Some(bytes) => Ok(Some(crate::codec::decode(&bytes)?)),
        }
    }

    pub fn put_contract<L: Layer<Hash256, Vec<u8>>>(
        &mut self,
        store: &mut L,
        id: &ContractId,
        state: &ContractState,
    ) -> Result<(), KvStoreErr> {
        self.root = trie::insert(
            store,
            &self.root,
            &Self::contract_key(id),
            crate::codec::encode_to_vec(state)?,
        )?;
        Ok(())
    }

    pub fn remove_contract<L: Layer<Hash256, Vec<u8>>>(
        &mut self,
        store: &mut L,
        id: &ContractId,
    ) -> Result<(), KvStoreErr> {
        self.root = trie::remove(store, &self.root, &Self::contract_key(id))?;
        Ok(())
    }

    pub fn get_log_states<L: Layer<Hash256, Vec<u8>>>(
        &self,
        store: &mut L,
        id: &LogStatesId,
    ) -> Result<Option<LogStates>, KvStoreErr> {
        match trie::get(store, &self.root, &Self::log_key(id))? {
            None => Ok(None),
            Some(bytes) => Ok(Some(crate::codec::decode(&bytes)?)),
        }
    }

    pub fn put_log_states<L: Layer<Hash256, Vec<u8>>>(
        &mut self,
        store: &mut L,
        id: &LogStatesId,
        logs: &LogStates,
    ) -> Result<(), KvStoreErr> {
        self.root = trie::insert(
            store,
            &self.root,
            &Self::log_key(id),
            crate::codec::encode_to_vec(logs)?,
        )?;
        Ok(())
    }
}

/// Assets one address has put on the table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssetPool {
    pub micas: U256,
    pub tokens: HashMap<TokenId, U256>,
}

impl AssetPool {
    fn credit(&mut self, amount: &U256) {
        self.micas = self
            .micas
            .checked_add(amount)
            .expect("asset pool overflow");
    }

    fn credit_token(&mut self, token: &TokenId, amount: &U256) {
        let entry = self.tokens.entry(*token).or_insert_with(U256::zero);
        *entry = entry.checked_add(amount).expect("asset pool overflow");
    }

    fn debit(&mut self, amount: &U256) -> Result<(), VmErr> {
        self.micas = self
            .micas
            .checked_sub(amount)
            .ok_or(VmErr::InsufficientApproval)?;
        Ok(())
    }

    fn debit_token(&mut self, token: &TokenId, amount: &U256) -> Result<(), VmErr> {
        let entry = self
            .tokens
            .get_mut(token)
            .ok_or(VmErr::InsufficientApproval)?;
        *entry = entry
            .checked_sub(amount)
            .ok_or(VmErr::InsufficientApproval)?;

        if entry.is_zero() {
            self.tokens.remove(token);
        }

        Ok(())
    }

    #[must_use]
    fn is_empty(&self) -> bool {
        self.micas.is_zero() && self.tokens.is_empty()
    }

    /// Tokens as a sorted vector, for deterministic output encoding.
    #[must_use]
    fn sorted_tokens(&self) -> Vec<(TokenId, U256)> {
        let mut tokens: Vec<(TokenId, U256)> = self
            .tokens
            .iter()
            .map(|(id, amount)| (*id, amount.clone()))
            .collect();
        tokens.sort_by(|a, b| a.0.cmp(&b.0));
        tokens
    }
}

enum GeneratedOut {
    Asset(AssetOutput),
    Contract(ContractId),
}

/// Result of running one transaction's script against staged state.
#[derive(Debug, Clone, PartialEq)]
pub struct TxExecution {
    pub root: Hash256,
    pub generated_outputs: Vec<TxOutput>,
    pub contract_inputs: Vec<OutputRef>,
    /// Micas and tokens that entered through consumed contract outputs
    pub contract_in_micas: U256,
    pub contract_in_tokens: Vec<(TokenId, U256)>,
    pub minted: Vec<(TokenId, U256)>,
    pub burned: Vec<(TokenId, U256)>,
}

/// World access for one transaction's stateful script run. Holds the
/// asset approval bookkeeping and the contract outputs consumed and
/// recreated along the way; `finalize` materializes generated outputs
/// and rewrites touched contract states.
pub struct TxExecutor<'a, L: Layer<Hash256, Vec<u8>>> {
    world: WorldState,
    store: &'a mut L,
    tx_id: Hash256,
    fixed_output_count: u32,
    groups: u32,
    output_key: &'a str,
    contract_id_key: &'a str,

    available: HashMap<Address, AssetPool>,
    approved: HashMap<Address, AssetPool>,
    touched: Vec<(ContractId, AssetPool)>,
    destroyed: HashSet<ContractId>,
    generated: Vec<GeneratedOut>,
    contract_inputs: Vec<OutputRef>,
    contract_in_micas: U256,
    contract_in_tokens: HashMap<TokenId, U256>,
    minted: Vec<(TokenId, U256)>,
    burned: Vec<(TokenId, U256)>,
    created: u32,
}

impl<'a, L: Layer<Hash256, Vec<u8>>> TxExecutor<'a, L> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        world: WorldState,
        store: &'a mut L,
        tx_id: Hash256,
        fixed_output_count: u32,
        groups: u32,
        output_key: &'a str,
        contract_id_key: &'a str,
        available: HashMap<Address, AssetPool>,
    ) -> Self {
        Self {
            world,
            store,
            tx_id,
            fixed_output_count,
            groups,
            output_key,
            contract_id_key,
            available,
            approved: HashMap::new(),
            touched: Vec::new(),
            destroyed: HashSet::new(),
            generated: Vec::new(),
            contract_inputs: Vec::new(),
            contract_in_micas: U256::zero(),
            contract_in_tokens: HashMap::new(),
            minted: Vec::new(),
            burned: Vec::new(),
            created: 0,
        }
    }

    fn touched_pool(&mut self, id: &ContractId) -> Option<&mut AssetPool> {
        self.touched
            .iter_mut()
            .find(|(tid, _)| tid == id)
            .map(|(_, pool)| pool)
    }

    /// Consumes the contract's live output on first touch, moving its
    /// balance into an in-flight pool that finalize re-emits.
    fn touch_contract(&mut self, id: &ContractId) -> Result<&mut AssetPool, VmErr> {
        if self.destroyed.contains(id) {
            return Err(VmErr::ContractNotFound);
        }

        if self.touched_pool(id).is_some() {
            let pool = self.touched_pool(id).unwrap();
            return Ok(pool);
        }

        let state = self
            .world
            .get_contract(self.store, id)
            .map_err(|_| VmErr::StateErr)?
            .ok_or(VmErr::ContractNotFound)?;

        let output = self
            .world
            .get_output(self.store, &state.output_ref)
            .map_err(|_| VmErr::StateErr)?
            .ok_or(VmErr::StateErr)?;

        if !self
            .world
            .remove_output(self.store, &state.output_ref)
            .map_err(|_| VmErr::StateErr)?
        {
            return Err(VmErr::StateErr);
        }

        self.contract_inputs.push(state.output_ref);
        self.contract_in_micas = self
            .contract_in_micas
            .checked_add(output.amount())
            .ok_or(VmErr::ArithmeticError)?;
        for (token, amount) in output.tokens() {
            let entry = self
                .contract_in_tokens
                .entry(*token)
                .or_insert_with(U256::zero);
            *entry = entry.checked_add(amount).ok_or(VmErr::ArithmeticError)?;
        }

        let mut pool = AssetPool {
            micas: output.amount().clone(),
            tokens: HashMap::new(),
        };
        for (token, amount) in output.tokens() {
            pool.credit_token(token, amount);
        }

        self.touched.push((*id, pool));
        Ok(&mut self.touched.last_mut().unwrap().1)
    }

    fn credit_destination(
        &mut self,
        to: &Address,
        amount: &U256,
        token: Option<(&TokenId, &U256)>,
    ) -> Result<(), VmErr> {
        if let Address::Contract(id) = to {
            let id = *id;
            let pool = self.touch_contract(&id)?;
            pool.credit(amount);
            if let Some((token_id, token_amount)) = token {
                pool.credit_token(token_id, token_amount);
            }
            return Ok(());
        }

        let mut output = AssetOutput::plain(amount.clone(), to.clone());
        if let Some((token_id, token_amount)) = token {
            output.tokens = vec![(*token_id, token_amount.clone())];
        }
        self.generated.push(GeneratedOut::Asset(output));
        Ok(())
    }

    /// Emits the re-created contract outputs, assigns their refs and
    /// rewrites contract states. Returns the final staged state.
    pub fn finalize(mut self) -> Result<TxExecution, VmErr> {
        let touched = std::mem::take(&mut self.touched);
        for (id, pool) in touched {
            if self.destroyed.contains(&id) {
                continue;
            }

            // The pool keeps its id association through the generated
            // list; the concrete output is materialized below once its
            // position (and so its ref) is known.
            self.touched.push((id, pool));
            self.generated.push(GeneratedOut::Contract(id));
        }

        let mut outputs = Vec::with_capacity(self.generated.len());
        let generated = std::mem::take(&mut self.generated);

        for (i, out) in generated.into_iter().enumerate() {
            let index = self.fixed_output_count + i as u32;

            match out {
                GeneratedOut::Asset(output) => outputs.push(TxOutput::Asset(output)),

                GeneratedOut::Contract(id) => {
                    let pool = self
                        .touched_pool(&id)
                        .expect("touched pool missing")
                        .clone();
                    let key = TxOutput::output_key(&self.tx_id, index, self.output_key);
                    let output_ref =
                        OutputRef::contract(Address::Contract(id).group(self.groups), key);
                    let output = TxOutput::Contract(ContractOutput {
                        amount: pool.micas.clone(),
                        contract_id: id,
                        tokens: pool.sorted_tokens(),
                    });

                    self.world
                        .add_output(self.store, &output_ref, &output)
                        .map_err(|_| VmErr::StateErr)?;

                    let mut state = self
                        .world
                        .get_contract(self.store, &id)
                        .map_err(|_| VmErr::StateErr)?
                        .ok_or(VmErr::ContractNotFound)?;
                    state.output_ref = output_ref;
                    self.world
                        .put_contract(self.store, &id, &state)
                        .map_err(|_| VmErr::StateErr)?;

                    outputs.push(output);
                }
            }
        }

        let mut contract_in_tokens: Vec<(TokenId, U256)> = self
            .contract_in_tokens
            .into_iter()
            .collect();
        contract_in_tokens.sort_by(|a, b| a.0.cmp(&b.0));

        Ok(TxExecution {
            root: self.world.root(),
            generated_outputs: outputs,
            contract_inputs: self.contract_inputs,
            contract_in_micas: self.contract_in_micas,
            contract_in_tokens,
            minted: self.minted,
            burned: self.burned,
        })
    }
}

impl<L: Layer<Hash256, Vec<u8>>> StateAccess for TxExecutor<'_, L> {
    fn load_contract(&mut self, id: &ContractId) -> Result<ContractState, VmErr> {
        self.world
            .get_contract(self.store, id)
            .map_err(|_| VmErr::StateErr)?
            .ok_or(VmErr::ContractNotFound)
    }

    fn store_fields(&mut self, id: &ContractId, fields: Vec<Value>) -> Result<(), VmErr> {
        let mut state = self.load_contract(id)?;
        state.fields = fields;
        self.world
            .put_contract(self.store, id, &state)
            .map_err(|_| VmErr::StateErr)
    }

    fn approve_asset(&mut self, from: &Address, amount: &U256) -> Result<(), VmErr> {
        self.available
            .get_mut(from)
            .ok_or(VmErr::InsufficientApproval)?
            .debit(amount)?;
        self.approved.entry(from.clone()).or_default().credit(amount);
        Ok(())
    }

    fn approve_token(
        &mut self,
        from: &Address,
        token: &TokenId,
        amount: &U256,
    ) -> Result<(), VmErr> {
        self.available
            .get_mut(from)
            .ok_or(VmErr::InsufficientApproval)?
            .debit_token(token, amount)?;
        self.approved
            .entry(from.clone())
            .or_default()
            .credit_token(token, amount);
        Ok(())
    }

    fn transfer_approved(
        &mut self,
        from: &Address,
        to: &Address,
        amount: &U256,
    ) -> Result<(), VmErr> {
        self.approved
            .get_mut(from)
            .ok_or(VmErr::InsufficientApproval)?
            .debit(amount)?;
        self.credit_destination(to, amount, None)
    }

    fn transfer_token_approved(
        &mut self,
        from: &Address,
        to: &Address,
        token: &TokenId,
        amount: &U256,
    ) -> Result<(), VmErr> {
        let dust = U256::from(DUST_AMOUNT_MICAS);
        let pool = self
            .approved
            .get_mut(from)
            .ok_or(VmErr::InsufficientApproval)?;
        pool.debit_token(token, amount)?;
        // Token outputs ride on a dust carrier so no output is zero
        pool.debit(&dust)?;
        self.credit_destination(to, &dust, Some((token, amount)))
    }

    fn transfer_from_self(
        &mut self,
        contract: &ContractId,
        to: &Address,
        amount: &U256,
    ) -> Result<(), VmErr> {
        let pool = self.touch_contract(contract)?;
        pool.micas = pool
            .micas
            .checked_sub(amount)
            .ok_or(VmErr::InsufficientBalance)?;
        self.credit_destination(to, amount, None)
    }

    fn mint_token(&mut self, contract: &ContractId, amount: &U256) -> Result<(), VmErr> {
        let token = *contract;
        let pool = self.touch_contract(contract)?;
        pool.credit_token(&token, amount);
        self.minted.push((token, amount.clone()));
        Ok(())
    }

    fn burn_token(
        &mut self,
        from: &Address,
        token: &TokenId,
        amount: &U256,
    ) -> Result<(), VmErr> {
        self.approved
            .get_mut(from)
            .ok_or(VmErr::InsufficientApproval)?
            .debit_token(token, amount)?;
        self.burned.push((*token, amount.clone()));
        Ok(())
    }

    fn create_contract(
        &mut self,
        code: Script,
        fields: Vec<Value>,
        funder: &Address,
        amount: &U256,
    ) -> Result<ContractId, VmErr> {
        self.approved
            .get_mut(funder)
            .ok_or(VmErr::InsufficientApproval)?
            .debit(amount)?;

        let mut id_preimage = Vec::with_capacity(36);
        id_preimage.extend_from_slice(self.tx_id.as_bytes());
        id_preimage.extend_from_slice(&self.created.to_le_bytes());
        let id = Hash256::hash_from_slice(&id_preimage, self.contract_id_key);
        self.created += 1;

        if self
            .world
            .get_contract(self.store, &id)
            .map_err(|_| VmErr::StateErr)?
            .is_some()
        {
            return Err(VmErr::Error("contract id collision"));
        }

        // The real ref is assigned in finalize once the output position
        // is known.
        let state = ContractState {
            code,
            fields,
            output_ref: OutputRef::contract(0, Hash256::zero()),
        };
        self.world
            .put_contract(self.store, &id, &state)
            .map_err(|_| VmErr::StateErr)?;

        self.touched.push((
            id,
            AssetPool {
                micas: amount.clone(),
                tokens: HashMap::new(),
            },
        ));

        Ok(id)
    }

    fn destroy_contract(&mut self, id: &ContractId, beneficiary: &Address) -> Result<(), VmErr> {
        let pool = self.touch_contract(id)?.clone();
        self.destroyed.insert(*id);

        self.world
            .remove_contract(self.store, id)
            .map_err(|_| VmErr::StateErr)?;

        if pool.is_empty() {
            return Ok(());
        }

        if pool.micas.is_zero() {
            return Err(VmErr::InsufficientBalance);
        }

        let mut output = AssetOutput::plain(pool.micas.clone(), beneficiary.clone());
        output.tokens = pool.sorted_tokens();
        self.generated.push(GeneratedOut::Asset(output));
        Ok(())
    }

    fn emit_event(
        &mut self,
        contract: &ContractId,
        event_type: u32,
        fields: Vec<Value>,
    ) -> Result<(), VmErr> {
        let mut logs = self
            .world
            .get_log_states(self.store, contract)
            .map_err(|_| VmErr::StateErr)?
            .unwrap_or_default();
        logs.append(event_type, fields);
        self.world
            .put_log_states(self.store, contract, &logs)
            .map_err(|_| VmErr::StateErr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::backend::{ColumnFamily, KeyValueStore, MemoryBackend};
    use crate::chain::cache::{Cache, Staging};
    use std::sync::Arc;

    fn node_cache() -> Cache<Hash256, Vec<u8>> {
        let backend = Arc::new(MemoryBackend::new());
        Cache::new(backend as Arc<dyn KeyValueStore>, ColumnFamily::WorldState)
    }

    fn asset(amount: u64) -> TxOutput {
        TxOutput::Asset(AssetOutput::plain(U256::from(amount), Address::random()))
    }

    #[test]
    fn outputs_round_trip_through_the_trie() {
        let mut store = node_cache();
        let mut world = WorldState::empty();

        let r1 = OutputRef::asset(0, Hash256::random());
        let r2 = OutputRef::asset(1, Hash256::random());
        let o1 = asset(10);
        let o2 = asset(20);

        world.add_output(&mut store, &r1, &o1).unwrap();
        world.add_output(&mut store, &r2, &o2).unwrap();

        assert_eq!(world.get_output(&mut store, &r1).unwrap(), Some(o1));
        assert_eq!(world.get_output(&mut store, &r2).unwrap(), Some(o2));

        assert!(world.remove_output(&mut store, &r1).unwrap());
        assert!(!world.remove_output(&mut store, &r1).unwrap());
        assert_eq!(world.get_output(&mut store, &r1).unwrap(), None);
    }

    #[test]
    fn state_root_is_deterministic_across_nodes() {
        let refs: Vec<OutputRef> = (0..10)
            .map(|i| OutputRef::asset(i % 4, Hash256::hash_from_slice(i.to_string(), "t")))
            .collect();

        let build = |order: Vec<usize>| {
            let mut store = node_cache();
            let mut world = WorldState::empty();
            for i in order {
                let output =
                    TxOutput::Asset(AssetOutput::plain(U256::from(i as u64 + 1), Address::PubKeyHash(Hash256::zero())));
                world.add_output(&mut store, &refs[i], &output).unwrap();
            }
            world.root()
        };

        let root_a = build((0..10).collect());
        let root_b = build((0..10).rev().collect());
        assert_eq!(root_a, root_b);
        assert_ne!(root_a, Hash256::zero());
    }

    #[test]
    fn contract_and_log_states_live_in_separate_keyspaces() {
        let mut store = node_cache();
        let mut world = WorldState::empty();
        let id = Hash256::random();

        let state = ContractState {
            code: Script::single(0, 0, vec![]),
            fields: vec![Value::U256(U256::from(7u64))],
            output_ref: OutputRef::contract(0, Hash256::random()),
        };
        world.put_contract(&mut store, &id, &state).unwrap();

        let mut logs = LogStates::default();
        logs.append(1, vec![Value::Bool(true)]);
        world.put_log_states(&mut store, &id, &logs).unwrap();

        assert_eq!(world.get_contract(&mut store, &id).unwrap(), Some(state));
        assert_eq!(world.get_log_states(&mut store, &id).unwrap(), Some(logs));

        // Same 32 bytes, different prefix: no aliasing with UTXO keys
        let output_ref = OutputRef::contract(0, id);
        assert_eq!(world.get_output(&mut store, &output_ref).unwrap(), None);
    }

    #[test]
    fn log_ranges_filter_by_type_and_counter() {
        let mut logs = LogStates::default();
        logs.append(1, vec![]);
        logs.append(2, vec![]);
        logs.append(1, vec![]);
        logs.append(1, vec![]);

        let hits = logs.in_range(1, 1, 4);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].counter, 2);
        assert_eq!(hits[1].counter, 3);
    }

    fn executor_fixture<'a, L: Layer<Hash256, Vec<u8>>>(
        store: &'a mut L,
        world: WorldState,
        funder: &Address,
        funds: u64,
    ) -> TxExecutor<'a, L> {
        let mut available = HashMap::new();
        available.insert(
            funder.clone(),
            AssetPool {
                micas: U256::from(funds),
                tokens: HashMap::new(),
            },
        );

        TxExecutor::new(
            world,
            store,
            Hash256::random(),
            1,
            4,
            "t.output",
            "t.contract",
            available,
        )
    }

    #[test]
    fn approvals_gate_transfers() {
        let mut store = node_cache();
        let funder = Address::random();
        let to = Address::random();
        let mut exec = executor_fixture(&mut store, WorldState::empty(), &funder, 100);

        // Transfer without approval fails
        assert_eq!(
            exec.transfer_approved(&funder, &to, &U256::from(10u64)),
            Err(VmErr::InsufficientApproval)
        );

        exec.approve_asset(&funder, &U256::from(50u64)).unwrap();
        assert_eq!(
            exec.approve_asset(&funder, &U256::from(51u64)),
            Err(VmErr::InsufficientApproval)
        );

        exec.transfer_approved(&funder, &to, &U256::from(30u64))
            .unwrap();
        let result = exec.finalize().unwrap();

        assert_eq!(result.generated_outputs.len(), 1);
        assert_eq!(result.generated_outputs[0].amount(), &U256::from(30u64));
        assert_eq!(result.generated_outputs[0].lockup(), to);
        assert!(result.contract_inputs.is_empty());
    }

    #[test]
    fn create_touch_and_destroy_contract() {
        let mut store = node_cache();
        let funder = Address::random();
        let beneficiary = Address::random();

        // Create
        let mut exec = executor_fixture(&mut store, WorldState::empty(), &funder, 1_000);
        exec.approve_asset(&funder, &U256::from(500u64)).unwrap();
        let code = Script::single(0, 0, vec![]);
        let id = exec
            .create_contract(code.clone(), vec![Value::Bool(true)], &funder, &U256::from(400u64))
            .unwrap();
        let result = exec.finalize().unwrap();
        let world = WorldState::new(result.root);

        // The contract output was materialized with a live ref
        let state = world.get_contract(&mut store, &id).unwrap().unwrap();
        assert!(state.output_ref.is_contract_ref());
        let output = world
            .get_output(&mut store, &state.output_ref)
            .unwrap()
            .unwrap();
        assert_eq!(output.amount(), &U256::from(400u64));
        assert_eq!(result.generated_outputs.len(), 1);

        // Mint some tokens, then destroy; balance flows to beneficiary
        let mut exec = executor_fixture(&mut store, world, &funder, 0);
        exec.mint_token(&id, &U256::from(9u64)).unwrap();
        exec.destroy_contract(&id, &beneficiary).unwrap();
        let result = exec.finalize().unwrap();
        let world = WorldState::new(result.root);

        assert_eq!(world.get_contract(&mut store, &id).unwrap(), None);
        assert_eq!(result.contract_inputs.len(), 1);
        assert_eq!(result.minted, vec![(id, U256::from(9u64))]);
        assert_eq!(result.generated_outputs.len(), 1);
        let out = &result.generated_outputs[0];
        assert_eq!(out.amount(), &U256::from(400u64));
        assert_eq!(out.lockup(), beneficiary);
        assert_eq!(out.token_amount(&id), U256::from(9u64));
    }

    #[test]
    fn discarded_staging_preserves_the_pre_script_state() {
        let mut store = node_cache();
        let funder = Address::random();

        // tx1: create a contract (committed)
        let mut block_staging = Staging::new(&mut store);
        let mut exec = executor_fixture(&mut block_staging, WorldState::empty(), &funder, 1_000);
        exec.approve_asset(&funder, &U256::from(500u64)).unwrap();
        let id = exec
            .create_contract(
                Script::single(0, 0, vec![]),
                vec![Value::U256(U256::from(1u64))],
                &funder,
                &U256::from(500u64),
            )
            .unwrap();
        let root_after_tx1 = {
            let result = exec.finalize().unwrap();
            result.root
        };
        block_staging.commit();

        // tx2: mutate fields and mint, then abort (discard the staging)
        {
            let mut tx_staging = Staging::new(&mut store);
            let world = WorldState::new(root_after_tx1);
            let mut exec = executor_fixture(&mut tx_staging, world, &funder, 0);
            exec.store_fields(&id, vec![Value::U256(U256::from(999u64))])
                .unwrap();
            exec.mint_token(&id, &U256::from(5u64)).unwrap();
            let _ = exec.finalize().unwrap();
            tx_staging.discard();
        }

        // The contract still has tx1's fields and balance
        let world = WorldState::new(root_after_tx1);
        let state = world.get_contract(&mut store, &id).unwrap().unwrap();
        assert_eq!(state.fields, vec![Value::U256(U256::from(1u64))]);
        let output = world
            .get_output(&mut store, &state.output_ref)
            .unwrap()
            .unwrap();
        assert_eq!(output.amount(), &U256::from(500u64));
        assert!(output.tokens().is_empty());
    }
}
