// Copyright (c) 2026 The Lattica Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

//! # Lattica
//! Official implementation of Lattica, a sharded proof-of-work
//! cryptocurrency whose blocks form a directed acyclic graph over a
//! `G x G` lattice of chains.
//!
//! ## Architecture
//! * **Primitives**: 256-bit checked integers, keyed blake3 content
//!   hashes, schnorrkel signatures, a canonical binary codec.
//! * **Storage**: rocksdb behind typed column families, with a
//!   write-back cache and stackable staging overlays for atomic block
//!   and transaction application.
//! * **ForkTree**: one arena-backed tree per chain tracking branches,
//!   tips, cumulative work, confirmation and pruning.
//! * **BlockFlow**: the `G^2` composition; selects each chain's best
//!   dependencies, maintains the per-view world state and validates and
//!   executes blocks.
//! * **World state**: a Keccak-hashed radix trie of unspent outputs,
//!   contract states and event logs; the root is the header's state
//!   commitment.
//! * **VM**: a deterministic stack machine with gas metering, stateless
//!   unlock-script and stateful contract contexts.
//! * **Node**: message-passing tasks over bounded channels; a block
//!   acceptor owning all chain state, a gas-price-ordered mempool and
//!   the typed RPC boundary the HTTP layer calls through.

pub mod chain;
pub mod codec;
pub mod consensus;
pub mod node;
pub mod primitives;
pub mod settings;
pub mod vm;

/// Process exit codes of the node binary.
pub const EXIT_OK: i32 = 0;
pub const EXIT_CONFIG_ERROR: i32 = 1;
pub const EXIT_STORAGE_ERROR: i32 = 2;
pub const EXIT_STATE_DIVERGENCE: i32 = 3;
