// Copyright (c) 2026 The Lattica Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use crate::primitives::{Address, Hash256, I256, U256};
use crate::vm::VmErr;
use std::fmt;

const WORD_SIZE: usize = 8; // 8 bytes on 64bit machines
pub const EMPTY_VEC_HEAP_SIZE: usize = 3 * WORD_SIZE; // 3 words

const TAG_BOOL: u8 = 0;
const TAG_I256: u8 = 1;
const TAG_U256: u8 = 2;
const TAG_BYTES: u8 = 3;
const TAG_ADDR: u8 = 4;

/// A value on the VM stack. Fixed-size arrays in the surface language
/// are flattened onto the stack by the compiler, so the runtime only
/// ever sees these five shapes.
#[derive(Clone, PartialEq, Eq)]
pub enum Value {
    Bool(bool),
    I256(I256),
    U256(U256),
    Bytes(Vec<u8>),
    Addr(Address),
}

impl Value {
    /// Approximate in-memory footprint, charged against the VM memory
    /// limit.
    #[must_use]
    pub fn size(&self) -> usize {
        match self {
            Self::Bool(_) => 1,
            Self::I256(_) | Self::U256(_) => 32,
            Self::Bytes(b) => EMPTY_VEC_HEAP_SIZE + b.len(),
            Self::Addr(_) => 40,
        }
    }

    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Bool(_) => "Bool",
            Self::I256(_) => "I256",
            Self::U256(_) => "U256",
            Self::Bytes(_) => "Bytes",
            Self::Addr(_) => "Addr",
        }
    }

    pub fn into_bool(self) -> Result<bool, VmErr> {
        match self {
            Self::Bool(v) => Ok(v),
            _ => Err(VmErr::TypeMismatch),
        }
    }

    pub fn into_u256(self) -> Result<U256, VmErr> {
        match self {
            Self::U256(v) => Ok(v),
            _ => Err(VmErr::TypeMismatch),
        }
    }

    pub fn into_i256(self) -> Result<I256, VmErr> {
        match self {
            Self::I256(v) => Ok(v),
            _ => Err(VmErr::TypeMismatch),
        }
    }

    pub fn into_bytes(self) -> Result<Vec<u8>, VmErr> {
        match self {
            Self::Bytes(v) => Ok(v),
            _ => Err(VmErr::TypeMismatch),
        }
    }

    pub fn into_addr(self) -> Result<Address, VmErr> {
        match self {
            Self::Addr(v) => Ok(v),
            _ => Err(VmErr::TypeMismatch),
        }
    }

    /// 32-byte values double as hashes (contract and token ids).
    pub fn into_hash(self) -> Result<Hash256, VmErr> {
        let bytes = self.into_bytes()?;

        if bytes.len() != 32 {
            return Err(VmErr::TypeMismatch);
        }

        let mut out = [0; 32];
        out.copy_from_slice(&bytes);
        Ok(Hash256(out))
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => f.debug_tuple("Bool").field(v).finish(),
            Self::I256(v) => f.debug_tuple("I256").field(&v.to_string()).finish(),
            Self::U256(v) => f.debug_tuple("U256").field(&v.to_string()).finish(),
            Self::Bytes(v) => f.debug_tuple("Bytes").field(&hex::encode(v)).finish(),
            Self::Addr(v) => f.debug_tuple("Addr").field(&v.to_base58()).finish(),
        }
    }
}

impl bincode::Encode for Value {
    fn encode<E: bincode::enc::Encoder>(
        &self,
        encoder: &mut E,
    ) -> core::result::Result<(), bincode::error::EncodeError> {
        match self {
            Self::Bool(v) => {
                bincode::Encode::encode(&TAG_BOOL, encoder)?;
                bincode::Encode::encode(v, encoder)
            }

            Self::I256(v) => {
                bincode::Encode::encode(&TAG_I256, encoder)?;
                bincode::Encode::encode(v, encoder)
            }

            Self::U256(v) => {
                bincode::Encode::encode(&TAG_U256, encoder)?;
                bincode::Encode::encode(v, encoder)
            }

            Self::Bytes(v) => {
                bincode::Encode::encode(&TAG_BYTES, encoder)?;
                bincode::Encode::encode(v, encoder)
            }

            Self::Addr(v) => {
                bincode::Encode::encode(&TAG_ADDR, encoder)?;
                bincode::Encode::encode(v, encoder)
            }
        }
    }
}

impl bincode::Decode for Value {
    fn decode<D: bincode::de::Decoder>(
        decoder: &mut D,
    ) -> core::result::Result<Self, bincode::error::DecodeError> {
        let tag: u8 = bincode::Decode::decode(decoder)?;

        match tag {
            TAG_BOOL => Ok(Self::Bool(bincode::Decode::decode(decoder)?)),
            TAG_I256 => Ok(Self::I256(bincode::Decode::decode(decoder)?)),
            TAG_U256 => Ok(Self::U256(bincode::Decode::decode(decoder)?)),
            TAG_BYTES => Ok(Self::Bytes(bincode::Decode::decode(decoder)?)),
            TAG_ADDR => Ok(Self::Addr(bincode::Decode::decode(decoder)?)),
            _ => Err(bincode::error::DecodeError::OtherString(
                "invalid value tag".to_owned(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_codec_round_trip() {
        let values = vec![
            Value::Bool(true),
            Value::I256(I256::from(-42i64)),
            Value::U256(U256::from(42u64)),
            Value::Bytes(b"payload".to_vec()),
            Value::Addr(Address::random()),
        ];

        for value in values {
            let encoded = crate::codec::encode_to_vec(&value).unwrap();
            let decoded: Value = crate::codec::decode(&encoded).unwrap();
            assert_eq!(decoded, value);
        }
    }

    #[test]
    fn conversions_enforce_types() {
        assert_eq!(Value::Bool(true).into_bool(), Ok(true));
        assert_eq!(Value::Bool(true).into_u256(), Err(VmErr::TypeMismatch));
        assert_eq!(
            Value::Bytes(vec![0; 31]).into_hash(),
            Err(VmErr::TypeMismatch)
        );
        assert_eq!(
            Value::Bytes(vec![7; 32]).into_hash(),
            Ok(Hash256([7; 32]))
        );
    }

    #[test]
    fn sizes_track_payloads() {
        assert_eq!(Value::Bool(true).size(), 1);
        assert_eq!(Value::U256(U256::zero()).size(), 32);
        assert_eq!(
            Value::Bytes(vec![0; 100]).size(),
            EMPTY_VEC_HEAP_SIZE + 100
        );
    }
}
