// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! TCP large receive offload, ACK compression, and hardware pacing
//! rate selection.
//!
//! The [`engine`] runs one instance per receive queue and is never
//! shared between threads. The [`ratelimit`] tables are per interface
//! and shared by every CPU transmitting on it.

#![allow(clippy::len_without_is_empty)]
#![deny(unreachable_patterns)]
#![deny(unused_must_use)]

extern crate alloc;

// This is needed so that the kstat-macro (`#[derive(KStatProvider)]`)
// can use fully-qualified type paths.
extern crate self as lro;

pub use lro_api as api;

pub mod ddi;
pub mod engine;
#[cfg(feature = "std")]
pub mod print;
pub mod ratelimit;
