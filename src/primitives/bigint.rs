// Copyright (c) 2026 The Lattica Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use ibig::ops::UnsignedAbs;
use ibig::{ibig, ubig, IBig, UBig};
use lazy_static::lazy_static;
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

lazy_static! {
    static ref U256_CEIL: UBig = ubig!(1) << 256;
    static ref U256_MAX_INNER: UBig = (ubig!(1) << 256) - ubig!(1);
    static ref I256_MIN_INNER: IBig = -(ibig!(1) << 255);
    static ref I256_MAX_INNER: IBig = (ibig!(1) << 255) - ibig!(1);
}

/// Unsigned 256-bit integer. All arithmetic is checked; the modular
/// variants reduce mod 2^256. The canonical byte form is 32 big-endian
/// bytes.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct U256(UBig);

impl U256 {
    #[must_use]
    pub fn zero() -> Self {
        Self(ubig!(0))
    }

    #[must_use]
    pub fn one() -> Self {
        Self(ubig!(1))
    }

    #[must_use]
    pub fn max_value() -> Self {
        Self(U256_MAX_INNER.clone())
    }

    /// Builds from an arbitrary `UBig`. Returns `None` when the value does
    /// not fit into 256 bits.
    #[must_use]
    pub fn from_ubig(v: UBig) -> Option<Self> {
        if v > *U256_MAX_INNER {
            return None;
        }

        Some(Self(v))
    }

    #[must_use]
    pub fn from_be_bytes(bytes: [u8; 32]) -> Self {
        Self(UBig::from_be_bytes(&bytes))
    }

    #[must_use]
    pub fn to_be_bytes(&self) -> [u8; 32] {
        let raw = self.0.to_be_bytes();
        let mut out = [0u8; 32];
        out[32 - raw.len()..].copy_from_slice(&raw);
        out
    }

    #[must_use]
    pub fn as_ubig(&self) -> &UBig {
        &self.0
    }

    #[must_use]
    pub fn into_ubig(self) -> UBig {
        self.0
    }

    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0 == ubig!(0)
    }

    #[must_use]
    pub fn to_u64(&self) -> Option<u64> {
        u64::try_from(&self.0).ok()
    }

    #[must_use]
    pub fn checked_add(&self, other: &Self) -> Option<Self> {
        Self::from_ubig(&self.0 + &other.0)
    }

    #[must_use]
    pub fn checked_sub(&self, other: &Self) -> Option<Self> {
        if self.0 < other.0 {
            return None;
        }

        Some(Self(&self.0 - &other.0))
    }

    #[must_use]
    pub fn checked_mul(&self, other: &Self) -> Option<Self> {
        Self::from_ubig(&self.0 * &other.0)
    }

    #[must_use]
    pub fn checked_div(&self, other: &Self) -> Option<Self> {
        if other.is_zero() {
            return None;
        }

        Some(Self(&self.0 / &other.0))
    }

    #[must_use]
    pub fn checked_rem(&self, other: &Self) -> Option<Self> {
        if other.is_zero() {
            return None;
        }

        Some(Self(&self.0 % &other.0))
    }

    #[must_use]
    pub fn wrapping_add(&self, other: &Self) -> Self {
        Self((&self.0 + &other.0) & &*U256_MAX_INNER)
    }

    #[must_use]
    pub fn wrapping_sub(&self, other: &Self) -> Self {
        if self.0 >= other.0 {
            Self(&self.0 - &other.0)
        } else {
            Self(&*U256_CEIL - (&other.0 - &self.0))
        }
    }

    #[must_use]
    pub fn wrapping_mul(&self, other: &Self) -> Self {
        Self((&self.0 * &other.0) & &*U256_MAX_INNER)
    }

    #[must_use]
    pub fn shl(&self, shift: u32) -> Self {
        if shift >= 256 {
            return Self::zero();
        }

        Self((&self.0 << shift as usize) & &*U256_MAX_INNER)
    }

    #[must_use]
    pub fn shr(&self, shift: u32) -> Self {
        if shift >= 256 {
            return Self::zero();
        }

        Self(&self.0 >> shift as usize)
    }

    #[must_use]
    pub fn bitand(&self, other: &Self) -> Self {
        Self(&self.0 & &other.0)
    }

    #[must_use]
    pub fn bitor(&self, other: &Self) -> Self {
        Self(&self.0 | &other.0)
    }

    #[must_use]
    pub fn bitxor(&self, other: &Self) -> Self {
        Self(&self.0 ^ &other.0)
    }
}

impl Default for U256 {
    fn default() -> Self {
        Self::zero()
    }
}

impl From<u64> for U256 {
    fn from(v: u64) -> Self {
        Self(UBig::from(v))
    }
}

impl From<u128> for U256 {
    fn from(v: u128) -> Self {
        Self(UBig::from(v))
    }
}

impl PartialOrd for U256 {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for U256 {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl fmt::Debug for U256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("U256").field(&self.0.to_string()).finish()
    }
}

impl fmt::Display for U256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for U256 {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let v = UBig::from_str(s).map_err(|_| "invalid unsigned integer")?;
        Self::from_ubig(v).ok_or("value does not fit into 256 bits")
    }
}

impl bincode::Encode for U256 {
    fn encode<E: bincode::enc::Encoder>(
        &self,
        encoder: &mut E,
    ) -> core::result::Result<(), bincode::error::EncodeError> {
        bincode::Encode::encode(&self.to_be_bytes(), encoder)
    }
}

impl bincode::Decode for U256 {
    fn decode<D: bincode::de::Decoder>(
        decoder: &mut D,
    ) -> core::result::Result<Self, bincode::error::DecodeError> {
        let bytes: [u8; 32] = bincode::Decode::decode(decoder)?;
        Ok(Self::from_be_bytes(bytes))
    }
}

/// Signed 256-bit integer in the two's complement range
/// `[-2^255, 2^255 - 1]`. Division truncates toward zero.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct I256(IBig);

impl I256 {
    #[must_use]
    pub fn zero() -> Self {
        Self(ibig!(0))
    }

    #[must_use]
    pub fn one() -> Self {
        Self(ibig!(1))
    }

    #[must_use]
    pub fn min_value() -> Self {
        Self(I256_MIN_INNER.clone())
    }

    #[must_use]
    pub fn max_value() -> Self {
        Self(I256_MAX_INNER.clone())
    }

    #[must_use]
    pub fn from_ibig(v: IBig) -> Option<Self> {
        if v < *I256_MIN_INNER || v > *I256_MAX_INNER {
            return None;
        }

        Some(Self(v))
    }

    /// Decodes from 32 big-endian two's complement bytes.
    #[must_use]
    pub fn from_be_bytes(bytes: [u8; 32]) -> Self {
        let unsigned = UBig::from_be_bytes(&bytes);

        if bytes[0] & 0x80 == 0 {
            Self(IBig::from(unsigned))
        } else {
            Self(IBig::from(unsigned) - IBig::from(U256_CEIL.clone()))
        }
    }

    #[must_use]
    pub fn to_be_bytes(&self) -> [u8; 32] {
        let unsigned = if self.0 >= ibig!(0) {
            self.0.clone().unsigned_abs()
        } else {
            (IBig::from(U256_CEIL.clone()) + &self.0).unsigned_abs()
        };
        let raw = unsigned.to_be_bytes();
        let mut out = [0u8; 32];
        out[32 - raw.len()..].copy_from_slice(&raw);
        out
    }

    #[must_use]
    pub fn as_ibig(&self) -> &IBig {
        &self.0
    }

    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0 == ibig!(0)
    }

    #[must_use]
    pub fn is_negative(&self) -> bool {
        self.0 < ibig!(0)
    }

    #[must_use]
    pub fn to_i64(&self) -> Option<i64> {
        i64::try_from(&self.0).ok()
    }

    #[must_use]
    pub fn checked_add(&self, other: &Self) -> Option<Self> {
        Self::from_ibig(&self.0 + &other.0)
    }

    #[must_use]
    pub fn checked_sub(&self, other: &Self) -> Option<Self> {
        Self::from_ibig(&self.0 - &other.0)
    }

    #[must_use]
    pub fn checked_mul(&self, other: &Self) -> Option<Self> {
        Self::from_ibig(&self.0 * &other.0)
    }

    #[must_use]
    pub fn checked_div(&self, other: &Self) -> Option<Self> {
        if other.is_zero() {
            return None;
        }

        Self::from_ibig(&self.0 / &other.0)
    }

    #[must_use]
    pub fn checked_rem(&self, other: &Self) -> Option<Self> {
        if other.is_zero() {
            return None;
        }

        Self::from_ibig(&self.0 % &other.0)
    }

    #[must_use]
    pub fn checked_neg(&self) -> Option<Self> {
        Self::from_ibig(-self.0.clone())
    }
}

impl Default for I256 {
    fn default() -> Self {
        Self::zero()
    }
}

impl From<i64> for I256 {
    fn from(v: i64) -> Self {
        Self(IBig::from(v))
    }
}

impl From<i128> for I256 {
    fn from(v: i128) -> Self {
        Self(IBig::from(v))
    }
}

impl PartialOrd for I256 {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for I256 {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl fmt::Debug for I256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("I256").field(&self.0.to_string()).finish()
    }
}

impl fmt::Display for I256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for I256 {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let v = IBig::from_str(s).map_err(|_| "invalid signed integer")?;
        Self::from_ibig(v).ok_or("value does not fit into 256 bits")
    }
}

impl bincode::Encode for I256 {
    fn encode<E: bincode::enc::Encoder>(
        &self,
        encoder: &mut E,
    ) -> core::result::Result<(), bincode::error::EncodeError> {
        bincode::Encode::encode(&self.to_be_bytes(), encoder)
    }
}

impl bincode::Decode for I256 {
    fn decode<D: bincode::de::Decoder>(
        decoder: &mut D,
    ) -> core::result::Result<Self, bincode::error::DecodeError> {
        let bytes: [u8; 32] = bincode::Decode::decode(decoder)?;
        Ok(Self::from_be_bytes(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn u256_checked_add_overflows_at_max() {
        let max = U256::max_value();
        assert_eq!(max.checked_add(&U256::one()), None);
        assert_eq!(
            U256::from(1u64).checked_add(&U256::from(2u64)),
            Some(U256::from(3u64))
        );
    }

    #[test]
    fn u256_checked_sub_underflows_below_zero() {
        assert_eq!(U256::zero().checked_sub(&U256::one()), None);
        assert_eq!(
            U256::from(3u64).checked_sub(&U256::from(2u64)),
            Some(U256::one())
        );
    }

    #[test]
    fn u256_div_rem_by_zero() {
        assert_eq!(U256::one().checked_div(&U256::zero()), None);
        assert_eq!(U256::one().checked_rem(&U256::zero()), None);
    }

    #[test]
    fn u256_wrapping_ops_reduce_mod_2_256() {
        let max = U256::max_value();
        assert_eq!(max.wrapping_add(&U256::one()), U256::zero());
        assert_eq!(U256::zero().wrapping_sub(&U256::one()), U256::max_value());
        assert_eq!(max.wrapping_mul(&U256::from(2u64)), max.wrapping_sub(&U256::one()));
    }

    #[test]
    fn u256_byte_round_trip() {
        let v = U256::from(0xdead_beef_u64);
        assert_eq!(U256::from_be_bytes(v.to_be_bytes()), v);

        let max = U256::max_value();
        assert_eq!(U256::from_be_bytes(max.to_be_bytes()), max);
        assert_eq!(max.to_be_bytes(), [0xff; 32]);

        assert_eq!(U256::zero().to_be_bytes(), [0; 32]);
    }

    #[test]
    fn u256_shifts() {
        assert_eq!(U256::one().shl(8), U256::from(256u64));
        assert_eq!(U256::from(256u64).shr(8), U256::one());
        assert_eq!(U256::one().shl(256), U256::zero());
        assert_eq!(U256::max_value().shl(255).shr(255), U256::one());
    }

    #[test]
    fn u256_codec_round_trip() {
        let v = U256::from(123_456_789_u64);
        let encoded = crate::codec::encode_to_vec(&v).unwrap();
        assert_eq!(encoded.len(), 32);
        let decoded: U256 = crate::codec::decode(&encoded).unwrap();
        assert_eq!(decoded, v);
    }

    #[test]
    fn i256_range_checks() {
        let min = I256::min_value();
        let max = I256::max_value();
        assert_eq!(min.checked_sub(&I256::one()), None);
        assert_eq!(max.checked_add(&I256::one()), None);
        assert_eq!(min.checked_neg(), None);
        assert_eq!(max.checked_neg(), Some(I256::from_ibig(-max.as_ibig().clone()).unwrap()));
    }

    #[test]
    fn i256_division_truncates_toward_zero() {
        let a = I256::from(-7i64);
        let b = I256::from(2i64);
        assert_eq!(a.checked_div(&b), Some(I256::from(-3i64)));
        assert_eq!(a.checked_rem(&b), Some(I256::from(-1i64)));
        assert_eq!(a.checked_div(&I256::zero()), None);
    }

    #[test]
    fn i256_twos_complement_bytes() {
        let minus_one = I256::from(-1i64);
        assert_eq!(minus_one.to_be_bytes(), [0xff; 32]);
        assert_eq!(I256::from_be_bytes([0xff; 32]), minus_one);

        let v = I256::from(-123_456i64);
        assert_eq!(I256::from_be_bytes(v.to_be_bytes()), v);

        let min = I256::min_value();
        assert_eq!(I256::from_be_bytes(min.to_be_bytes()), min);
    }

    #[test]
    fn display_and_parse() {
        let v: U256 = "340282366920938463463374607431768211455".parse().unwrap();
        assert_eq!(v, U256::from(u128::MAX));
        assert_eq!(v.to_string(), "340282366920938463463374607431768211455");

        let s: I256 = "-42".parse().unwrap();
        assert_eq!(s, I256::from(-42i64));

        let too_big = "1".repeat(100).parse::<U256>();
        assert!(too_big.is_err());
    }
}
