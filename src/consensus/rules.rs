// Copyright (c) 2026 The Lattica Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use crate::primitives::U256;
use ibig::{ubig, UBig};
use lazy_static::lazy_static;
use static_assertions::const_assert;
use std::cmp;

/// Money type. Amounts are unsigned 256-bit integers of micas.
pub type Money = U256;

/// Micas per latt.
pub const COIN_MICAS: u128 = 1_000_000_000_000_000_000;

/// Number of shard groups `G` on the default network. The chain universe
/// is the `G x G` lattice; every block carries `2G - 1` dependencies.
pub const GROUPS: u32 = 4;

/// Difficulty will be adjusted so that blocks on a single chain are added
/// every `n` milliseconds.
pub const BLOCK_TARGET_TIME_MS: u64 = 64_000;

/// New blocks with timestamps more than `n` milliseconds ahead of local
/// time are rejected.
pub const TIMESTAMP_DRIFT_TOLERANCE_MS: u64 = 15_000;

/// A block is confirmed once the oldest tip of its chain is at least `n`
/// blocks above it.
pub const CONFIRM_DEPTH: u64 = 8;

/// Difficulty retargets every `n` blocks per chain.
pub const RETARGET_INTERVAL: u64 = 64;

/// A single retarget step may change the target bound by at most a
/// factor of `n` in either direction.
pub const MAX_RETARGET_FACTOR: u64 = 4;

/// Compact encoding of the easiest allowed target. Genesis blocks are
/// mined against this bound.
pub const INITIAL_TARGET_COMPACT: u32 = 0x20FF_FFFF;

/// Initial per-block miner reward, halved every `HALVING_INTERVAL`.
pub const INITIAL_BLOCK_REWARD_MICAS: u128 = 3 * COIN_MICAS;

/// Reward is halved after `n` blocks of a chain.
pub const HALVING_INTERVAL: u64 = 2_000_000;

/// Only `n` halvings will happen, after which the block reward remains
/// constant.
pub const MAX_HALVINGS: u64 = 16;

/// Coinbase outputs stay time-locked for `n` milliseconds past the block
/// timestamp.
pub const COINBASE_LOCK_TIME_MS: u64 = 500_000;

/// Gas cap for a single transaction.
pub const MAX_GAS_PER_TX: u64 = 625_000;

/// Gas cap for all transactions of a block combined.
pub const MAX_GAS_PER_BLOCK: u64 = 2_500_000;

/// Smallest gas amount a transaction may declare; covers input and
/// output bookkeeping before any script runs.
pub const MINIMAL_GAS: u64 = 20_000;

/// Micas per gas unit below which a transaction is not relayed.
pub const MIN_GAS_PRICE_MICAS: u128 = 100_000_000_000;

/// Max transactions per block, coinbase included.
pub const MAX_TXS_PER_BLOCK: usize = 2_000;

/// Max bytes per serialized transaction.
pub const MAX_TX_BYTES: usize = 64_000;

/// Micas that must ride along with a pure token transfer so the carrier
/// output stays above zero.
pub const DUST_AMOUNT_MICAS: u128 = 1_000_000_000_000_000;

lazy_static! {
    static ref U256_CEIL: UBig = ubig!(1) << 256;
    static ref MAX_TARGET_BOUND: U256 = Target::new(INITIAL_TARGET_COMPACT).expand();
}

const_assert!(GROUPS.is_power_of_two());
const_assert!(GROUPS <= 16);
const_assert!(CONFIRM_DEPTH >= 2);
const_assert!(RETARGET_INTERVAL > 1);
const_assert!(MAX_RETARGET_FACTOR >= 2);
const_assert!(MINIMAL_GAS <= MAX_GAS_PER_TX);
const_assert!(MAX_GAS_PER_TX <= MAX_GAS_PER_BLOCK);
const_assert!(HALVING_INTERVAL % RETARGET_INTERVAL == 0);

/// Block reward at `height`, before fees.
#[must_use]
pub fn block_reward(height: u64) -> Money {
    let halvings = cmp::min(height / HALVING_INTERVAL, MAX_HALVINGS);
    U256::from(INITIAL_BLOCK_REWARD_MICAS).shr(halvings as u32)
}

/// Minimum relayed gas price.
#[must_use]
pub fn min_gas_price() -> Money {
    U256::from(MIN_GAS_PRICE_MICAS)
}

/// Compact proof-of-work target: one exponent byte and a three-byte
/// mantissa, `bound = mantissa * 256^(exponent - 3)`. A block hash,
/// read as a 256-bit big-endian integer, must be strictly below the
/// expanded bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Target(u32);

impl Target {
    #[must_use]
    pub fn new(compact: u32) -> Self {
        Self(compact)
    }

    #[must_use]
    pub fn max() -> Self {
        Self(INITIAL_TARGET_COMPACT)
    }

    #[must_use]
    pub fn to_compact(&self) -> u32 {
        self.0
    }

    #[must_use]
    pub fn exponent(&self) -> u32 {
        self.0 >> 24
    }

    #[must_use]
    pub fn mantissa(&self) -> u32 {
        self.0 & 0x00ff_ffff
    }

    /// Expands the compact form into the full 256-bit bound.
    #[must_use]
    pub fn expand(&self) -> U256 {
        let mantissa = U256::from(u64::from(self.mantissa()));
        let exponent = self.exponent();

        if exponent <= 3 {
            mantissa.shr(8 * (3 - exponent))
        } else {
            mantissa.shl(8 * (exponent - 3))
        }
    }

    /// Re-encodes a full bound into compact form, rounding down. The
    /// canonical form keeps the top mantissa byte non-zero.
    #[must_use]
    pub fn from_bound(bound: &U256) -> Self {
        let bytes = bound.to_be_bytes();
        let size = 32 - bytes.iter().take_while(|b| **b == 0).count();

        if size == 0 {
            return Self(0);
        }

        let mut mantissa: u32 = 0;
        for i in 0..3 {
            mantissa <<= 8;
            if i < size {
                mantissa |= u32::from(bytes[32 - size + i]);
            }
        }

        Self(((size as u32) << 24) | mantissa)
    }

    /// Whether `hash`, read big-endian, meets this target.
    #[must_use]
    pub fn meets(&self, hash: &[u8; 32]) -> bool {
        U256::from_be_bytes(*hash) < self.expand()
    }

    /// Expected work for a block mined against this target:
    /// `(2^256 - 1) / (bound + 1) + 1`.
    #[must_use]
    pub fn work(&self) -> U256 {
        let bound = self.expand().into_ubig();

        if bound == ubig!(0) {
            return U256::max_value();
        }

        let work = (&*U256_CEIL - ubig!(1)) / (bound + ubig!(1)) + ubig!(1);
        U256::from_ubig(work).unwrap()
    }

    /// Target for the next retarget window, scaled by observed blocktime
    /// and clamped to the adjustment band and the network maximum.
    #[must_use]
    pub fn retarget(&self, actual_timespan_ms: u64, expected_timespan_ms: u64) -> Self {
        let old = self.expand().into_ubig();
        let lo = &old / UBig::from(MAX_RETARGET_FACTOR);
        let hi = &old * UBig::from(MAX_RETARGET_FACTOR);

        let scaled =
            &old * UBig::from(cmp::max(actual_timespan_ms, 1)) / UBig::from(expected_timespan_ms);
        let clamped = cmp::min(cmp::max(scaled, lo), hi);
        let bound = match U256::from_ubig(clamped) {
            Some(b) => cmp::min(b, MAX_TARGET_BOUND.clone()),
            None => MAX_TARGET_BOUND.clone(),
        };

        Self::from_bound(&bound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_halves_the_block_reward() {
        assert_eq!(block_reward(0), U256::from(INITIAL_BLOCK_REWARD_MICAS));
        assert_eq!(
            block_reward(HALVING_INTERVAL - 1),
            U256::from(INITIAL_BLOCK_REWARD_MICAS)
        );
        assert_eq!(
            block_reward(HALVING_INTERVAL),
            U256::from(INITIAL_BLOCK_REWARD_MICAS / 2)
        );
        assert_eq!(
            block_reward(HALVING_INTERVAL * (MAX_HALVINGS + 10)),
            block_reward(HALVING_INTERVAL * MAX_HALVINGS)
        );
    }

    #[test]
    fn target_expands_the_initial_compact() {
        let target = Target::max();
        assert_eq!(target.exponent(), 0x20);
        assert_eq!(target.mantissa(), 0x00ff_ffff);

        let bound = target.expand();
        // 0xffffff followed by 29 zero bytes
        let bytes = bound.to_be_bytes();
        assert_eq!(&bytes[..3], &[0xff, 0xff, 0xff]);
        assert!(bytes[3..].iter().all(|b| *b == 0));
    }

    #[test]
    fn target_compact_round_trip() {
        // Canonical compacts (non-zero top mantissa byte) re-encode to
        // themselves.
        for compact in [0x20ff_ffff_u32, 0x1b04_04cb, 0x04ab_cdef] {
            let target = Target::new(compact);
            assert_eq!(Target::from_bound(&target.expand()).to_compact(), compact);
        }

        // Non-canonical compacts re-encode to the same bound.
        for compact in [0x1d00_ffff_u32, 0x0500_1234] {
            let target = Target::new(compact);
            let reencoded = Target::from_bound(&target.expand());
            assert_eq!(reencoded.expand(), target.expand());
        }
    }

    #[test]
    fn target_meets_is_a_strict_bound() {
        let target = Target::max();
        let bound = target.expand();

        let below = bound.checked_sub(&U256::one()).unwrap().to_be_bytes();
        assert!(target.meets(&below));

        assert!(!target.meets(&bound.to_be_bytes()));
        assert!(!target.meets(&[0xff; 32]));
        assert!(target.meets(&[0; 32]));
    }

    #[test]
    fn harder_targets_carry_more_work() {
        let easy = Target::max();
        let hard = Target::new(0x1d00_ffff);
        assert!(hard.work() > easy.work());
    }

    #[test]
    fn retarget_is_clamped() {
        let target = Target::new(0x1b04_04cb);
        let expected = RETARGET_INTERVAL * BLOCK_TARGET_TIME_MS;

        // Stable blocktime keeps the target (up to compact rounding).
        let stable = target.retarget(expected, expected);
        assert_eq!(stable.to_compact(), target.to_compact());

        // A huge slowdown is capped at the adjustment factor.
        let slow = target.retarget(expected * 100, expected);
        assert!(slow.expand() <= target.expand().checked_mul(&U256::from(MAX_RETARGET_FACTOR)).unwrap());
        assert!(slow.expand() > target.expand());

        // A huge speedup likewise.
        let fast = target.retarget(1, expected);
        assert!(fast.expand() >= target.expand().checked_div(&U256::from(MAX_RETARGET_FACTOR * 2)).unwrap());
        assert!(fast.expand() < target.expand());
    }

    #[test]
    fn retarget_never_exceeds_network_maximum() {
        let target = Target::max();
        let next = target.retarget(u64::MAX / 2, 1);
        assert!(next.expand() <= Target::max().expand());
    }
}
