// Copyright (c) 2026 The Lattica Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use crate::consensus::Money;
use crate::primitives::{Address, ContractId, Hash256, TxVerifyErr, U256};
use bincode::{Decode, Encode};

pub type TokenId = Hash256;

/// Spendable output holding micas and optional token balances, locked by
/// an address until `lock_time` (milliseconds since epoch, 0 = none).
#[derive(Clone, PartialEq, Eq, Debug, Encode, Decode)]
pub struct AssetOutput {
    pub amount: Money,
    pub lockup: Address,
    pub tokens: Vec<(TokenId, U256)>,
    pub lock_time: i64,
    pub message: Vec<u8>,
}

impl AssetOutput {
    #[must_use]
    pub fn plain(amount: Money, lockup: Address) -> Self {
        Self {
            amount,
            lockup,
            tokens: vec![],
            lock_time: 0,
            message: vec![],
        }
    }

    #[must_use]
    pub fn is_locked_at(&self, timestamp: i64) -> bool {
        self.lock_time > timestamp
    }
}

/// Output owned by a contract. Carries the contract's asset balance;
/// there is exactly one live contract output per contract.
#[derive(Clone, PartialEq, Eq, Debug, Encode, Decode)]
pub struct ContractOutput {
    pub amount: Money,
    pub contract_id: ContractId,
    pub tokens: Vec<(TokenId, U256)>,
}

const TAG_ASSET: u8 = 0;
const TAG_CONTRACT: u8 = 1;

#[derive(Clone, PartialEq, Eq, Debug)]
pub enum TxOutput {
    Asset(AssetOutput),
    Contract(ContractOutput),
}

impl TxOutput {
    #[must_use]
    pub fn amount(&self) -> &Money {
        match self {
            Self::Asset(o) => &o.amount,
            Self::Contract(o) => &o.amount,
        }
    }

    #[must_use]
    pub fn tokens(&self) -> &[(TokenId, U256)] {
        match self {
            Self::Asset(o) => &o.tokens,
            Self::Contract(o) => &o.tokens,
        }
    }

    /// The address this output is locked to. For contract outputs that is
    /// the contract address itself.
    #[must_use]
    pub fn lockup(&self) -> Address {
        match self {
            Self::Asset(o) => o.lockup.clone(),
            Self::Contract(o) => Address::Contract(o.contract_id),
        }
    }

    /// Shard group the output settles in.
    #[must_use]
    pub fn group(&self, groups: u32) -> u32 {
        self.lockup().group(groups)
    }

    #[must_use]
    pub fn is_asset(&self) -> bool {
        matches!(self, Self::Asset(_))
    }

    #[must_use]
    pub fn is_contract(&self) -> bool {
        matches!(self, Self::Contract(_))
    }

    #[must_use]
    pub fn as_asset(&self) -> Option<&AssetOutput> {
        match self {
            Self::Asset(o) => Some(o),
            Self::Contract(_) => None,
        }
    }

    #[must_use]
    pub fn token_amount(&self, id: &TokenId) -> U256 {
        self.tokens()
            .iter()
            .find(|(tid, _)| tid == id)
            .map_or_else(U256::zero, |(_, amount)| amount.clone())
    }

    /// Structural checks shared by fixed and generated outputs.
    pub fn verify(&self) -> Result<(), TxVerifyErr> {
        if self.amount().is_zero() {
            return Err(TxVerifyErr::ZeroOutputAmount);
        }

        let tokens = self.tokens();
        for (i, (id, amount)) in tokens.iter().enumerate() {
            if amount.is_zero() {
                return Err(TxVerifyErr::ZeroOutputAmount);
            }

            if tokens[..i].iter().any(|(other, _)| other == id) {
                return Err(TxVerifyErr::DuplicateToken);
            }
        }

        if let Self::Asset(o) = self {
            if o.lockup.is_contract() {
                return Err(TxVerifyErr::InvalidLockup);
            }
        }

        Ok(())
    }

    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        crate::codec::encode_to_vec(self).unwrap()
    }

    /// Key of this output in the world state, derived from the spending
    /// transaction and the output's position.
    #[must_use]
    pub fn output_key(tx_id: &Hash256, index: u32, key: &str) -> Hash256 {
        let mut bytes = Vec::with_capacity(36);
        bytes.extend_from_slice(tx_id.as_bytes());
        bytes.extend_from_slice(&index.to_le_bytes());
        Hash256::hash_from_slice(&bytes, key)
    }
}

impl bincode::Encode for TxOutput {
    fn encode<E: bincode::enc::Encoder>(
        &self,
        encoder: &mut E,
    ) -> core::result::Result<(), bincode::error::EncodeError> {
        match self {
            Self::Asset(o) => {
                bincode::Encode::encode(&TAG_ASSET, encoder)?;
                bincode::Encode::encode(&o.amount, encoder)?;
                bincode::Encode::encode(&o.lockup, encoder)?;
                bincode::Encode::encode(&o.tokens, encoder)?;
                bincode::Encode::encode(&o.lock_time, encoder)?;
                bincode::Encode::encode(&o.message, encoder)
            }

            Self::Contract(o) => {
                bincode::Encode::encode(&TAG_CONTRACT, encoder)?;
                bincode::Encode::encode(&o.amount, encoder)?;
                bincode::Encode::encode(&o.contract_id, encoder)?;
                bincode::Encode::encode(&o.tokens, encoder)
            }
        }
    }
}

impl bincode::Decode for TxOutput {
    fn decode<D: bincode::de::Decoder>(
        decoder: &mut D,
    ) -> core::result::Result<Self, bincode::error::DecodeError> {
        let tag: u8 = bincode::Decode::decode(decoder)?;

        match tag {
            TAG_ASSET => Ok(Self::Asset(AssetOutput {
                amount: bincode::Decode::decode(decoder)?,
                lockup: bincode::Decode::decode(decoder)?,
                tokens: bincode::Decode::decode(decoder)?,
                lock_time: bincode::Decode::decode(decoder)?,
                message: bincode::Decode::decode(decoder)?,
            })),

            TAG_CONTRACT => Ok(Self::Contract(ContractOutput {
                amount: bincode::Decode::decode(decoder)?,
                contract_id: bincode::Decode::decode(decoder)?,
                tokens: bincode::Decode::decode(decoder)?,
            })),

            _ => Err(bincode::error::DecodeError::OtherString(
                "invalid output tag".to_owned(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn asset_output() -> TxOutput {
        TxOutput::Asset(AssetOutput {
            amount: U256::from(100u64),
            lockup: Address::random(),
            tokens: vec![(Hash256::random(), U256::from(5u64))],
            lock_time: 1_700_000_000_000,
            message: b"memo".to_vec(),
        })
    }

    #[test]
    fn output_encode_decode() {
        let output = asset_output();
        let decoded: TxOutput =
            crate::codec::decode(&crate::codec::encode_to_vec(&output).unwrap()).unwrap();
        assert_eq!(decoded, output);

        let output = TxOutput::Contract(ContractOutput {
            amount: U256::from(7u64),
            contract_id: Hash256::random(),
            tokens: vec![],
        });
        let decoded: TxOutput =
            crate::codec::decode(&crate::codec::encode_to_vec(&output).unwrap()).unwrap();
        assert_eq!(decoded, output);
    }

    #[test]
    fn it_fails_to_verify_output_with_zero_amount() {
        let output = TxOutput::Asset(AssetOutput::plain(U256::zero(), Address::random()));
        assert_eq!(output.verify(), Err(TxVerifyErr::ZeroOutputAmount));
    }

    #[test]
    fn it_fails_to_verify_duplicate_tokens() {
        let token = Hash256::random();
        let mut inner = AssetOutput::plain(U256::one(), Address::random());
        inner.tokens = vec![(token, U256::one()), (token, U256::from(2u64))];
        assert_eq!(
            TxOutput::Asset(inner).verify(),
            Err(TxVerifyErr::DuplicateToken)
        );
    }

    #[test]
    fn it_fails_to_verify_asset_locked_to_contract() {
        let output = TxOutput::Asset(AssetOutput::plain(
            U256::one(),
            Address::Contract(Hash256::random()),
        ));
        assert_eq!(output.verify(), Err(TxVerifyErr::InvalidLockup));
    }

    #[test]
    fn lock_time_gates_spending() {
        let mut inner = AssetOutput::plain(U256::one(), Address::random());
        inner.lock_time = 1_000;
        assert!(inner.is_locked_at(999));
        assert!(!inner.is_locked_at(1_000));
    }

    #[test]
    fn output_keys_are_position_dependent() {
        let tx_id = Hash256::random();
        let a = TxOutput::output_key(&tx_id, 0, "k");
        let b = TxOutput::output_key(&tx_id, 1, "k");
        assert_ne!(a, b);
        assert_eq!(TxOutput::output_key(&tx_id, 0, "k"), a);
    }
}
