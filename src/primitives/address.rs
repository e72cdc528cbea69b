// Copyright (c) 2026 The Lattica Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use crate::primitives::Hash256;
use schnorrkel::{
    signing_context, Keypair as SchnorrKeypair, PublicKey as SchnorrPubKey,
    Signature as SchnorrSig,
};
use std::fmt;

/// Domain separation for transaction signatures.
pub const SIGNING_CTX: &[u8] = b"lattica-tx";

/// Key used when hashing public keys into addresses. Address bytes are
/// network independent, unlike block and transaction ids.
const ADDRESS_HASH_KEY: &str = "address";

/// Maximum number of keys in a multisig address.
pub const MULTISIG_MAX_KEYS: usize = 16;

pub type ContractId = Hash256;

const TAG_P2PKH: u8 = 0;
const TAG_P2MPKH: u8 = 1;
const TAG_P2SH: u8 = 2;
const TAG_P2C: u8 = 3;

/// Destination of an output. The text form is
/// `base58check(tag_byte || payload)`.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Address {
    /// Pay to the blake3 hash of a single public key.
    PubKeyHash(Hash256),

    /// Pay to `threshold`-of-n public key hashes.
    MultiSig { threshold: u8, key_hashes: Vec<Hash256> },

    /// Pay to the hash of an unlock script revealed at spend time.
    ScriptHash(Hash256),

    /// Output owned by a contract.
    Contract(ContractId),
}

impl Address {
    #[must_use]
    pub fn from_public_key(public_key: &PublicKey) -> Self {
        Self::PubKeyHash(public_key.key_hash())
    }

    pub fn multisig(threshold: u8, key_hashes: Vec<Hash256>) -> Result<Self, &'static str> {
        if key_hashes.is_empty() || key_hashes.len() > MULTISIG_MAX_KEYS {
            return Err("invalid multisig key count");
        }

        if threshold == 0 || threshold as usize > key_hashes.len() {
            return Err("invalid multisig threshold");
        }

        Ok(Self::MultiSig {
            threshold,
            key_hashes,
        })
    }

    #[must_use]
    pub fn tag(&self) -> u8 {
        match self {
            Self::PubKeyHash(_) => TAG_P2PKH,
            Self::MultiSig { .. } => TAG_P2MPKH,
            Self::ScriptHash(_) => TAG_P2SH,
            Self::Contract(_) => TAG_P2C,
        }
    }

    /// The hash that routes this address to a shard group.
    #[must_use]
    pub fn primary_hash(&self) -> &Hash256 {
        match self {
            Self::PubKeyHash(h) | Self::ScriptHash(h) | Self::Contract(h) => h,
            Self::MultiSig { key_hashes, .. } => &key_hashes[0],
        }
    }

    /// Shard group this address settles in.
    #[must_use]
    pub fn group(&self, groups: u32) -> u32 {
        (self.primary_hash().low_u64() % u64::from(groups)) as u32
    }

    #[must_use]
    pub fn is_contract(&self) -> bool {
        matches!(self, Self::Contract(_))
    }

    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        crate::codec::encode_to_vec(self).unwrap()
    }

    #[must_use]
    pub fn to_base58(&self) -> String {
        bs58::encode(self.to_bytes()).with_check().into_string()
    }

    pub fn from_base58(encoded: &str) -> Result<Self, &'static str> {
        let bytes = bs58::decode(encoded)
            .with_check(None)
            .into_vec()
            .map_err(|_| "invalid address")?;
        crate::codec::decode(&bytes).map_err(|_| "invalid address")
    }

    #[cfg(test)]
    #[must_use]
    pub fn random() -> Self {
        Self::PubKeyHash(Hash256::random())
    }
}

impl bincode::Encode for Address {
    fn encode<E: bincode::enc::Encoder>(
        &self,
        encoder: &mut E,
    ) -> core::result::Result<(), bincode::error::EncodeError> {
        bincode::Encode::encode(&self.tag(), encoder)?;

        match self {
            Self::PubKeyHash(h) | Self::ScriptHash(h) | Self::Contract(h) => {
                bincode::Encode::encode(h, encoder)
            }

            Self::MultiSig {
                threshold,
                key_hashes,
            } => {
                bincode::Encode::encode(threshold, encoder)?;
                bincode::Encode::encode(key_hashes, encoder)
            }
        }
    }
}

impl bincode::Decode for Address {
    fn decode<D: bincode::de::Decoder>(
        decoder: &mut D,
    ) -> core::result::Result<Self, bincode::error::DecodeError> {
        let tag: u8 = bincode::Decode::decode(decoder)?;

        match tag {
            TAG_P2PKH => Ok(Self::PubKeyHash(bincode::Decode::decode(decoder)?)),

            TAG_P2MPKH => {
                let threshold: u8 = bincode::Decode::decode(decoder)?;
                let key_hashes: Vec<Hash256> = bincode::Decode::decode(decoder)?;
                Self::multisig(threshold, key_hashes).map_err(|err| {
                    bincode::error::DecodeError::OtherString(err.to_owned())
                })
            }

            TAG_P2SH => Ok(Self::ScriptHash(bincode::Decode::decode(decoder)?)),

            TAG_P2C => Ok(Self::Contract(bincode::Decode::decode(decoder)?)),

            _ => Err(bincode::error::DecodeError::OtherString(
                "invalid address tag".to_owned(),
            )),
        }
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Address").field(&self.to_base58()).finish()
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_base58())
    }
}

#[derive(Clone, PartialEq)]
pub struct PublicKey(pub SchnorrPubKey);

impl PublicKey {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, &'static str> {
        if bytes.len() != 32 {
            return Err("invalid slice length! expected 32");
        }

        Ok(Self(
            SchnorrPubKey::from_bytes(bytes).map_err(|_| "could not decode public key")?,
        ))
    }

    #[must_use]
    pub fn to_bytes(&self) -> [u8; 32] {
        self.0.to_bytes()
    }

    #[must_use]
    pub fn key_hash(&self) -> Hash256 {
        Hash256::hash_from_slice(self.0.to_bytes(), ADDRESS_HASH_KEY)
    }

    #[must_use]
    pub fn to_address(&self) -> Address {
        Address::from_public_key(self)
    }

    /// Verifies a detached transaction signature over `msg`.
    #[must_use]
    pub fn verify(&self, msg: &[u8], signature: &Signature) -> bool {
        let Ok(sig) = SchnorrSig::from_bytes(&signature.0) else {
            return false;
        };

        let ctx = signing_context(SIGNING_CTX);
        self.0.verify(ctx.bytes(msg), &sig).is_ok()
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PublicKey")
            .field(&hex::encode(self.0.to_bytes()))
            .finish()
    }
}

impl bincode::Encode for PublicKey {
    fn encode<E: bincode::enc::Encoder>(
        &self,
        encoder: &mut E,
    ) -> core::result::Result<(), bincode::error::EncodeError> {
        bincode::Encode::encode(&self.0.to_bytes(), encoder)
    }
}

impl bincode::Decode for PublicKey {
    fn decode<D: bincode::de::Decoder>(
        decoder: &mut D,
    ) -> core::result::Result<Self, bincode::error::DecodeError> {
        let bytes: [u8; 32] = bincode::Decode::decode(decoder)?;
        Self::from_bytes(&bytes)
            .map_err(|err| bincode::error::DecodeError::OtherString(err.to_owned()))
    }
}

/// Detached 64-byte signature.
#[derive(Clone, PartialEq, Eq)]
pub struct Signature(pub [u8; 64]);

impl Signature {
    #[must_use]
    pub fn zero() -> Self {
        Self([0; 64])
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, &'static str> {
        if bytes.len() != 64 {
            return Err("invalid slice length! expected 64");
        }

        let mut out = [0; 64];
        out.copy_from_slice(bytes);
        Ok(Self(out))
    }

    #[must_use]
    pub fn to_bytes(&self) -> [u8; 64] {
        self.0
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Signature")
            .field(&hex::encode(self.0))
            .finish()
    }
}

impl bincode::Encode for Signature {
    fn encode<E: bincode::enc::Encoder>(
        &self,
        encoder: &mut E,
    ) -> core::result::Result<(), bincode::error::EncodeError> {
        bincode::Encode::encode(&self.0, encoder)
    }
}

impl bincode::Decode for Signature {
    fn decode<D: bincode::de::Decoder>(
        decoder: &mut D,
    ) -> core::result::Result<Self, bincode::error::DecodeError> {
        let bytes: [u8; 64] = bincode::Decode::decode(decoder)?;
        Ok(Self(bytes))
    }
}

/// Signing key pair. Lives in the wallet layer in production; here it
/// backs transaction building and the test fixtures.
pub struct Keypair(pub SchnorrKeypair);

impl Keypair {
    #[must_use]
    pub fn generate() -> Self {
        Self(SchnorrKeypair::generate())
    }

    #[must_use]
    pub fn public(&self) -> PublicKey {
        PublicKey(self.0.public)
    }

    #[must_use]
    pub fn sign(&self, msg: &[u8]) -> Signature {
        let ctx = signing_context(SIGNING_CTX);
        Signature(self.0.sign(ctx.bytes(msg)).to_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_base58_round_trip() {
        let addresses = vec![
            Address::PubKeyHash(Hash256::random()),
            Address::multisig(2, vec![Hash256::random(), Hash256::random(), Hash256::random()])
                .unwrap(),
            Address::ScriptHash(Hash256::random()),
            Address::Contract(Hash256::random()),
        ];

        for address in addresses {
            let encoded = address.to_base58();
            assert_eq!(Address::from_base58(&encoded).unwrap(), address);
        }
    }

    #[test]
    fn address_bytes_carry_the_tag() {
        assert_eq!(Address::PubKeyHash(Hash256::zero()).to_bytes()[0], 0);
        assert_eq!(
            Address::multisig(1, vec![Hash256::zero()]).unwrap().to_bytes()[0],
            1
        );
        assert_eq!(Address::ScriptHash(Hash256::zero()).to_bytes()[0], 2);
        assert_eq!(Address::Contract(Hash256::zero()).to_bytes()[0], 3);
    }

    #[test]
    fn it_rejects_mangled_base58() {
        let address = Address::random();
        let mut encoded = address.to_base58();
        encoded.pop();
        encoded.push('1');
        assert!(Address::from_base58(&encoded).is_err());
    }

    #[test]
    fn it_rejects_invalid_multisig() {
        assert!(Address::multisig(0, vec![Hash256::zero()]).is_err());
        assert!(Address::multisig(2, vec![Hash256::zero()]).is_err());
        assert!(Address::multisig(1, vec![]).is_err());
        assert!(Address::multisig(1, vec![Hash256::zero(); MULTISIG_MAX_KEYS + 1]).is_err());
    }

    #[test]
    fn group_routing_is_stable() {
        let address = Address::random();
        assert_eq!(address.group(4), address.group(4));
        assert!(address.group(4) < 4);
        assert_eq!(Address::PubKeyHash(Hash256::zero()).group(4), 0);
    }

    #[test]
    fn sign_and_verify() {
        let keypair = Keypair::generate();
        let msg = b"spend one latt";
        let sig = keypair.sign(msg);

        assert!(keypair.public().verify(msg, &sig));
        assert!(!keypair.public().verify(b"spend two latts", &sig));

        let other = Keypair::generate();
        assert!(!other.public().verify(msg, &sig));
    }

    #[test]
    fn public_key_codec_round_trip() {
        let keypair = Keypair::generate();
        let encoded = crate::codec::encode_to_vec(&keypair.public()).unwrap();
        assert_eq!(encoded.len(), 32);
        let decoded: PublicKey = crate::codec::decode(&encoded).unwrap();
        assert_eq!(decoded, keypair.public());
    }
}
