// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Types shared between the LRO engine, the rate limiter, and the
//! administrative tooling that drives them.

#![deny(unreachable_patterns)]
#![deny(unused_must_use)]

pub mod cfg;
pub mod dump;
pub mod error;
pub mod flow;
pub mod pacing;

pub use cfg::*;
pub use dump::*;
pub use error::*;
pub use flow::*;
pub use pacing::*;

/// The overall version of the API. Anytime a type in this crate is
/// added, removed, or modified in a way that changes its serialized
/// form, this number should increment.
pub const API_VERSION: u64 = 3;
