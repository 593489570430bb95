// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! The runtime surface the engine is written against: packet
//! buffers, locks, clocks, deferred reclamation, and named counters.
pub mod epoch;
pub mod kstat;
pub mod mbuf;
pub mod sync;
pub mod time;
