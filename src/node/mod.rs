// Copyright (c) 2026 The Lattica Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

pub mod acceptor;
pub mod mempool;
pub mod rpc;

pub use acceptor::*;
pub use mempool::*;
pub use rpc::*;
