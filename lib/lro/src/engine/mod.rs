// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! The TCP large receive offload engine.
//!
//! Received frames are parsed, matched to a flow entry, and appended
//! to it. Nothing is merged on the receive path: the entry's packets
//! are condensed into as few as possible only when the entry is
//! flushed, after which the result is handed to the network stack, or
//! queued straight onto the receiving TCP connection with pure ACKs
//! compressed into batches.
pub mod ack_compress;
pub mod checksum;
mod condense;
pub mod csum_update;
mod ctrl;
pub mod entry;
pub mod ether;
pub mod flow_table;
mod flush;
pub mod ip4;
pub mod ip6;
pub mod parse;
pub mod sort;
pub mod stack;
pub mod stat;
pub mod tcp;
pub mod udp;

pub use ctrl::LroCtrl;
pub use ctrl::RxRejected;
