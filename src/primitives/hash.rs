// Copyright (c) 2026 The Lattica Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use bincode::{Decode, Encode};
use sha3::{Digest, Keccak256};
use std::fmt;

const HASH_KEY_PREFIX: &str = "lattica.hash.";

/// 32-byte content hash. Content addressing uses keyed blake3 where the
/// key carries the network name and chain, so hashes from different
/// networks never collide. The canonical serialized form is the raw bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Encode, Decode)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    #[must_use]
    pub fn zero() -> Self {
        Self([0; 32])
    }

    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0 == [0; 32]
    }

    /// Keyed blake3 over `bytes`. The effective derive key is
    /// `"lattica.hash." + key`.
    #[must_use]
    pub fn hash_from_slice<T: AsRef<[u8]>>(bytes: T, key: &str) -> Self {
        let derive_key = format!("{HASH_KEY_PREFIX}{key}");
        let mut hasher = blake3::Hasher::new_derive_key(&derive_key);
        hasher.update(bytes.as_ref());
        let mut out = [0; 32];
        let mut reader = hasher.finalize_xof();
        reader.fill(&mut out);
        Self(out)
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(hexstr: &str) -> Result<Self, &'static str> {
        let bytes = hex::decode(hexstr).map_err(|_| "invalid hexstr")?;

        if bytes.len() != 32 {
            return Err("invalid hash length! expected 32");
        }

        let mut out = Self::zero();
        out.0.copy_from_slice(&bytes);
        Ok(out)
    }

    /// Interprets the low 64 bits of the hash as an integer. Used for
    /// chain index assignment and address group routing.
    #[must_use]
    pub fn low_u64(&self) -> u64 {
        let mut tail = [0; 8];
        tail.copy_from_slice(&self.0[24..]);
        u64::from_be_bytes(tail)
    }

    #[cfg(test)]
    #[must_use]
    pub fn random() -> Self {
        use rand::Rng;
        Self(rand::thread_rng().gen())
    }
}

impl fmt::Debug for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Hash256").field(&self.to_hex()).finish()
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl AsRef<[u8]> for Hash256 {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Unkeyed Keccak-256. World-state trie nodes hash with this family,
/// block and transaction ids with keyed blake3.
#[must_use]
pub fn keccak256(bytes: &[u8]) -> Hash256 {
    let mut hasher = Keccak256::new();
    hasher.update(bytes);
    let out: [u8; 32] = hasher.finalize().into();
    Hash256(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_deterministic() {
        let a = Hash256::hash_from_slice(b"hello", "testnet.chain.0");
        let b = Hash256::hash_from_slice(b"hello", "testnet.chain.0");
        assert_eq!(a, b);
    }

    #[test]
    fn hash_differs_per_key() {
        let a = Hash256::hash_from_slice(b"hello", "testnet.chain.0");
        let b = Hash256::hash_from_slice(b"hello", "testnet.chain.1");
        let c = Hash256::hash_from_slice(b"hello!", "testnet.chain.0");
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn keccak_differs_from_blake(){
        let a = Hash256::hash_from_slice(b"node", "k");
        let b = keccak256(b"node");
        assert_ne!(a, b);
        assert_eq!(keccak256(b"node"), b);
    }

    #[test]
    fn hex_round_trip() {
        let h = Hash256::hash_from_slice(b"x", "k");
        assert_eq!(Hash256::from_hex(&h.to_hex()).unwrap(), h);
        assert!(Hash256::from_hex("zz").is_err());
        assert!(Hash256::from_hex("00ff").is_err());
    }

    #[test]
    fn codec_round_trip_is_raw_bytes() {
        let h = Hash256::hash_from_slice(b"x", "k");
        let encoded = crate::codec::encode_to_vec(&h).unwrap();
        assert_eq!(encoded.len(), 32);
        assert_eq!(encoded.as_slice(), h.as_bytes());
        let decoded: Hash256 = crate::codec::decode(&encoded).unwrap();
        assert_eq!(decoded, h);
    }

    #[test]
    fn low_u64_reads_tail_bytes() {
        let mut h = Hash256::zero();
        h.0[31] = 7;
        assert_eq!(h.low_u64(), 7);
        h.0[24] = 1;
        assert_eq!(h.low_u64(), (1 << 56) | 7);
    }
}
