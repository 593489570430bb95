// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Common routines for testing the LRO engine and rate limiter.
//!
//! [`frames`] deals only in bytes and `lro-api` types, so the engine's
//! own unit tests can use it. [`mock`] implements the engine's traits
//! and is for integration tests.

pub mod frames;
pub mod mock;
pub mod verify;

pub use frames::FlowSpec;
pub use frames::TcpSeg;
pub use frames::build_frame;

/// A logger which throws everything away.
pub fn test_logger() -> slog::Logger {
    slog::Logger::root(slog::Discard, slog::o!())
}
