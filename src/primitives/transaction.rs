// Copyright (c) 2026 The Lattica Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use crate::consensus::{min_gas_price, Money, MAX_GAS_PER_TX, MAX_TX_BYTES, MINIMAL_GAS};
use crate::primitives::{
    Address, AssetOutput, Hash256, PublicKey, Signature, TxOutput, U256,
};
use crate::vm::{Script, Value, VmErr};
use bincode::{Decode, Encode};
use std::cmp::Ordering;
use std::collections::HashSet;

/// Reference to an unspent output. The hint carries the destination
/// group in its upper bits and a contract flag in bit zero, so inputs
/// route to their shard without a state lookup.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug, Encode, Decode)]
pub struct OutputRef {
    pub hint: i32,
    pub key: Hash256,
}

impl OutputRef {
    #[must_use]
    pub fn new(hint: i32, key: Hash256) -> Self {
        Self { hint, key }
    }

    #[must_use]
    pub fn asset(group: u32, key: Hash256) -> Self {
        Self {
            hint: (group << 1) as i32,
            key,
        }
    }

    #[must_use]
    pub fn contract(group: u32, key: Hash256) -> Self {
        Self {
            hint: ((group << 1) | 1) as i32,
            key,
        }
    }

    #[must_use]
    pub fn group(&self, groups: u32) -> u32 {
        ((self.hint as u32) >> 1) % groups
    }

    #[must_use]
    pub fn is_contract_ref(&self) -> bool {
        self.hint & 1 == 1
    }
}

const UNLOCK_TAG_PUBKEY: u8 = 0;
const UNLOCK_TAG_MULTISIG: u8 = 1;
const UNLOCK_TAG_SCRIPT: u8 = 2;

/// Witness satisfying an output's lockup condition.
#[derive(Clone, PartialEq, Debug)]
pub enum UnlockScript {
    /// Reveals the key whose hash is the P2PKH lockup.
    PubKey(PublicKey),

    /// Reveals `(position, key)` pairs for a threshold of the P2MPKH
    /// key hashes, in ascending position order.
    MultiSig(Vec<(u8, PublicKey)>),

    /// Reveals the P2SH script plus its arguments; the script runs in
    /// the stateless context and must leave true on top of the stack.
    Script { script: Script, args: Vec<Value> },
}

impl Encode for UnlockScript {
    fn encode<E: bincode::enc::Encoder>(
        &self,
        encoder: &mut E,
    ) -> core::result::Result<(), bincode::error::EncodeError> {
        match self {
            Self::PubKey(key) => {
                Encode::encode(&UNLOCK_TAG_PUBKEY, encoder)?;
                Encode::encode(key, encoder)
            }

            Self::MultiSig(keys) => {
                Encode::encode(&UNLOCK_TAG_MULTISIG, encoder)?;
                Encode::encode(keys, encoder)
            }

            Self::Script { script, args } => {
                Encode::encode(&UNLOCK_TAG_SCRIPT, encoder)?;
                Encode::encode(script, encoder)?;
                Encode::encode(args, encoder)
            }
        }
    }
}

impl Decode for UnlockScript {
    fn decode<D: bincode::de::Decoder>(
        decoder: &mut D,
    ) -> core::result::Result<Self, bincode::error::DecodeError> {
        let tag: u8 = Decode::decode(decoder)?;

        match tag {
            UNLOCK_TAG_PUBKEY => Ok(Self::PubKey(Decode::decode(decoder)?)),
            UNLOCK_TAG_MULTISIG => Ok(Self::MultiSig(Decode::decode(decoder)?)),
            UNLOCK_TAG_SCRIPT => Ok(Self::Script {
                script: Decode::decode(decoder)?,
                args: Decode::decode(decoder)?,
            }),
            _ => Err(bincode::error::DecodeError::OtherString(
                "invalid unlock script tag".to_owned(),
            )),
        }
    }
}

#[derive(Clone, PartialEq, Debug, Encode, Decode)]
pub struct TxInput {
    pub output_ref: OutputRef,
    pub unlock: UnlockScript,
}

/// The signed-over portion of a transaction. The transaction id is the
/// keyed hash of this encoding.
#[derive(Clone, PartialEq, Debug, Encode, Decode)]
pub struct UnsignedTransaction {
    pub version: u8,
    pub network_id: u8,
    pub script: Option<Script>,
    pub gas_amount: u64,
    pub gas_price: Money,
    pub inputs: Vec<TxInput>,
    pub fixed_outputs: Vec<AssetOutput>,
}

pub const TX_VERSION: u8 = 1;

#[derive(Clone, PartialEq, Debug)]
pub struct Transaction {
    pub unsigned: UnsignedTransaction,

    /// Result of running `unsigned.script`; set during block execution.
    /// A failed script still settles inputs and pays gas.
    pub script_execution_ok: bool,

    /// Contract outputs consumed by script execution.
    pub contract_inputs: Vec<OutputRef>,

    /// Outputs emitted by script execution.
    pub generated_outputs: Vec<TxOutput>,

    pub input_signatures: Vec<Signature>,
    pub script_signatures: Vec<Signature>,

    /// Cached id
    pub hash: Option<Hash256>,
}

impl Transaction {
    #[must_use]
    pub fn from_unsigned(unsigned: UnsignedTransaction) -> Self {
        Self {
            unsigned,
            script_execution_ok: true,
            contract_inputs: vec![],
            generated_outputs: vec![],
            input_signatures: vec![],
            script_signatures: vec![],
            hash: None,
        }
    }

    /// Builds the miner reward transaction. The reward output is
    /// time-locked `lock_ms` past the block timestamp (coinbase
    /// maturity).
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn coinbase(
        height: u64,
        timestamp: i64,
        miner: Address,
        reward: Money,
        network_id: u8,
        lock_ms: u64,
        key: &str,
    ) -> Self {
        let output = AssetOutput {
            amount: reward,
            lockup: miner,
            tokens: vec![],
            lock_time: timestamp + lock_ms as i64,
            message: height.to_le_bytes().to_vec(),
        };

        let mut tx = Self::from_unsigned(UnsignedTransaction {
            version: TX_VERSION,
            network_id,
            script: None,
            gas_amount: 0,
            gas_price: U256::zero(),
            inputs: vec![],
            fixed_outputs: vec![output],
        });
        tx.compute_hash(key);
        tx
    }

    pub fn compute_hash(&mut self, key: &str) {
        let encoded = crate::codec::encode_to_vec(&self.unsigned).unwrap();
        self.hash = Some(Hash256::hash_from_slice(encoded, key));
    }

    #[must_use]
    pub fn hash(&self) -> Option<&Hash256> {
        self.hash.as_ref()
    }

    /// Transaction id. Panics when the hash was not computed.
    #[must_use]
    pub fn id(&self) -> Hash256 {
        *self.hash.as_ref().expect("tx hash not computed")
    }

    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        crate::codec::encode_to_vec(self).unwrap()
    }

    #[must_use]
    pub fn is_coinbase(&self) -> bool {
        self.unsigned.inputs.is_empty() && self.unsigned.script.is_none()
    }

    /// Total fee: `gas_amount * gas_price`. `None` on overflow.
    #[must_use]
    pub fn fee(&self) -> Option<Money> {
        if self.is_coinbase() {
            return Some(U256::zero());
        }

        U256::from(self.unsigned.gas_amount).checked_mul(&self.unsigned.gas_price)
    }

    /// Every output the transaction settles: fixed outputs first, then
    /// script-generated ones.
    #[must_use]
    pub fn all_outputs(&self) -> Vec<TxOutput> {
        let mut outputs: Vec<TxOutput> = self
            .unsigned
            .fixed_outputs
            .iter()
            .cloned()
            .map(TxOutput::Asset)
            .collect();

        if self.script_execution_ok {
            outputs.extend(self.generated_outputs.iter().cloned());
        }

        outputs
    }

    /// Structural validation; everything that can be checked without
    /// chain state.
    pub fn verify_structure(&self, network_id: u8) -> Result<(), TxVerifyErr> {
        if self.unsigned.version != TX_VERSION {
            return Err(TxVerifyErr::BadVersion);
        }

        if self.unsigned.network_id != network_id {
            return Err(TxVerifyErr::WrongNetwork);
        }

        if self.to_bytes().len() > MAX_TX_BYTES {
            return Err(TxVerifyErr::TooLarge);
        }

        if self.is_coinbase() {
            if self.unsigned.gas_amount != 0
                || !self.unsigned.gas_price.is_zero()
                || !self.input_signatures.is_empty()
                || self.unsigned.fixed_outputs.len() != 1
            {
                return Err(TxVerifyErr::InvalidCoinbase);
            }
        } else {
            if self.unsigned.inputs.is_empty() {
                return Err(TxVerifyErr::MissingInput);
            }

            if self.unsigned.gas_amount < MINIMAL_GAS
                || self.unsigned.gas_amount > MAX_GAS_PER_TX
            {
                return Err(TxVerifyErr::InvalidGas);
            }

            if self.unsigned.gas_price < min_gas_price() {
                return Err(TxVerifyErr::InvalidGas);
            }

            let mut seen = HashSet::with_capacity(self.unsigned.inputs.len());
            for input in &self.unsigned.inputs {
                if !seen.insert(input.output_ref) {
                    return Err(TxVerifyErr::DuplicateInput);
                }
            }
        }

        for output in &self.unsigned.fixed_outputs {
            TxOutput::Asset(output.clone()).verify()?;
        }

        Ok(())
    }

    /// All distinct shard groups the fixed outputs settle in.
    #[must_use]
    pub fn output_groups(&self, groups: u32) -> Vec<u32> {
        let mut out: Vec<u32> = self
            .unsigned
            .fixed_outputs
            .iter()
            .map(|o| o.lockup.group(groups))
            .collect();
        out.sort_unstable();
        out.dedup();
        out
    }
}

impl Encode for Transaction {
    fn encode<E: bincode::enc::Encoder>(
        &self,
        encoder: &mut E,
    ) -> core::result::Result<(), bincode::error::EncodeError> {
        Encode::encode(&self.unsigned, encoder)?;
        Encode::encode(&self.script_execution_ok, encoder)?;
        Encode::encode(&self.contract_inputs, encoder)?;
        Encode::encode(&self.generated_outputs, encoder)?;
        Encode::encode(&self.input_signatures, encoder)?;
        Encode::encode(&self.script_signatures, encoder)?;
        Ok(())
    }
}

impl Decode for Transaction {
    fn decode<D: bincode::de::Decoder>(
        decoder: &mut D,
    ) -> core::result::Result<Self, bincode::error::DecodeError> {
        Ok(Self {
            unsigned: Decode::decode(decoder)?,
            script_execution_ok: Decode::decode(decoder)?,
            contract_inputs: Decode::decode(decoder)?,
            generated_outputs: Decode::decode(decoder)?,
            input_signatures: Decode::decode(decoder)?,
            script_signatures: Decode::decode(decoder)?,
            hash: None,
        })
    }
}

#[derive(PartialEq, Debug, Clone)]
pub enum TxVerifyErr {
    BadVersion,
    WrongNetwork,
    TooLarge,
    InvalidGas,
    InvalidCoinbase,
    InvalidAmount,
    ZeroOutputAmount,
    DuplicateToken,
    InvalidLockup,
    DuplicateInput,
    MissingInput,
    OutputLocked,
    InvalidSignature,
    InsufficientFunds,
    TokenImbalance,
    WrongGroup,
    ScriptExecutionFailed(VmErr),
    OutOfGas,
    BackendErr,
    Error(&'static str),
}

/// Transaction enriched with its fee, as held by the mempool. Ordering
/// is by gas price, ties broken by id, so eviction and block building
/// are deterministic.
#[derive(Clone, Debug)]
pub struct TransactionWithFee {
    pub(crate) tx: Transaction,
    pub(crate) fee: Money,
    pub(crate) tx_size: u32,
}

impl TransactionWithFee {
    pub fn from_transaction(tx: Transaction) -> Result<Self, TxVerifyErr> {
        debug_assert!(tx.hash.is_some());
        let fee = tx.fee().ok_or(TxVerifyErr::InvalidAmount)?;
        let tx_size = tx.to_bytes().len() as u32;

        Ok(Self { tx, fee, tx_size })
    }

    #[must_use]
    pub fn hash(&self) -> Option<&Hash256> {
        self.tx.hash()
    }

    #[must_use]
    pub fn gas_price(&self) -> &Money {
        &self.tx.unsigned.gas_price
    }

    #[must_use]
    pub fn fee(&self) -> &Money {
        &self.fee
    }

    #[must_use]
    pub fn size(&self) -> u32 {
        self.tx_size
    }
}

impl PartialEq for TransactionWithFee {
    fn eq(&self, other: &Self) -> bool {
        self.tx.hash == other.tx.hash
    }
}

impl Eq for TransactionWithFee {}

impl PartialOrd for TransactionWithFee {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TransactionWithFee {
    fn cmp(&self, other: &Self) -> Ordering {
        self.gas_price()
            .cmp(other.gas_price())
            .then_with(|| self.tx.hash.cmp(&other.tx.hash))
    }
}

impl From<TransactionWithFee> for Transaction {
    fn from(other: TransactionWithFee) -> Self {
        other.tx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::{block_reward, COINBASE_LOCK_TIME_MS};
    use crate::primitives::Keypair;

    pub(crate) fn transfer_tx(key: &str) -> Transaction {
        let keypair = Keypair::generate();
        let unsigned = UnsignedTransaction {
            version: TX_VERSION,
            network_id: 0,
            script: None,
            gas_amount: MINIMAL_GAS,
            gas_price: min_gas_price(),
            inputs: vec![TxInput {
                output_ref: OutputRef::asset(0, Hash256::random()),
                unlock: UnlockScript::PubKey(keypair.public()),
            }],
            fixed_outputs: vec![AssetOutput::plain(U256::from(100u64), Address::random())],
        };

        let mut tx = Transaction::from_unsigned(unsigned);
        tx.compute_hash(key);
        let id = tx.id();
        tx.input_signatures = vec![keypair.sign(id.as_bytes())];
        tx
    }

    #[test]
    fn tx_codec_round_trip_recomputes_the_same_id() {
        let tx = transfer_tx("testnet.chain.0");
        let mut decoded: Transaction = crate::codec::decode(&tx.to_bytes()).unwrap();
        assert_eq!(decoded.hash, None);

        decoded.compute_hash("testnet.chain.0");
        assert_eq!(decoded.hash, tx.hash);
        assert_eq!(decoded, tx);
    }

    #[test]
    fn the_id_commits_to_the_unsigned_part_only() {
        let mut tx = transfer_tx("k");
        let id = tx.id();

        tx.script_execution_ok = false;
        tx.input_signatures.clear();
        tx.compute_hash("k");
        assert_eq!(tx.id(), id);

        tx.unsigned.gas_amount += 1;
        tx.compute_hash("k");
        assert_ne!(tx.id(), id);
    }

    #[test]
    fn coinbase_shape() {
        let miner = Address::random();
        let timestamp = 1_700_000_000_000i64;
        let tx = Transaction::coinbase(
            5,
            timestamp,
            miner.clone(),
            block_reward(5),
            0,
            COINBASE_LOCK_TIME_MS,
            "k",
        );

        assert!(tx.is_coinbase());
        assert_eq!(tx.fee(), Some(U256::zero()));
        assert_eq!(tx.verify_structure(0), Ok(()));

        let out = &tx.unsigned.fixed_outputs[0];
        assert_eq!(out.lockup, miner);
        assert_eq!(out.amount, block_reward(5));
        assert!(out.is_locked_at(timestamp));
        assert!(!out.is_locked_at(timestamp + COINBASE_LOCK_TIME_MS as i64));
    }

    #[test]
    fn it_rejects_duplicate_inputs() {
        let mut tx = transfer_tx("k");
        let dup = tx.unsigned.inputs[0].clone();
        tx.unsigned.inputs.push(dup);
        tx.compute_hash("k");
        assert_eq!(tx.verify_structure(0), Err(TxVerifyErr::DuplicateInput));
    }

    #[test]
    fn it_rejects_bad_gas() {
        let mut tx = transfer_tx("k");
        tx.unsigned.gas_amount = MINIMAL_GAS - 1;
        assert_eq!(tx.verify_structure(0), Err(TxVerifyErr::InvalidGas));

        tx.unsigned.gas_amount = MINIMAL_GAS;
        tx.unsigned.gas_price = U256::zero();
        assert_eq!(tx.verify_structure(0), Err(TxVerifyErr::InvalidGas));
    }

    #[test]
    fn it_rejects_wrong_network() {
        let tx = transfer_tx("k");
        assert_eq!(tx.verify_structure(7), Err(TxVerifyErr::WrongNetwork));
    }

    #[test]
    fn fee_is_gas_times_price() {
        let tx = transfer_tx("k");
        assert_eq!(
            tx.fee(),
            U256::from(MINIMAL_GAS).checked_mul(&min_gas_price())
        );
    }

    #[test]
    fn mempool_ordering_prefers_higher_gas_price() {
        let mut a = transfer_tx("k");
        a.unsigned.gas_price = min_gas_price();
        a.compute_hash("k");
        let mut b = transfer_tx("k");
        b.unsigned.gas_price = min_gas_price().checked_mul(&U256::from(2u64)).unwrap();
        b.compute_hash("k");

        let a = TransactionWithFee::from_transaction(a).unwrap();
        let b = TransactionWithFee::from_transaction(b).unwrap();
        assert!(b > a);
    }

    #[test]
    fn output_ref_routing() {
        let asset = OutputRef::asset(3, Hash256::random());
        assert_eq!(asset.group(4), 3);
        assert!(!asset.is_contract_ref());

        let contract = OutputRef::contract(2, Hash256::random());
        assert_eq!(contract.group(4), 2);
        assert!(contract.is_contract_ref());
    }
}
