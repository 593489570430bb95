// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

use crate::FlowKey;
use serde::Deserialize;
use serde::Serialize;

/// A point-in-time view of one active LRO entry.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct LroEntryDump {
    pub outer: FlowKey,
    pub inner: Option<FlowKey>,
    pub pkts: u32,
    pub next_seq: u32,
    pub ack_seq: u32,
    pub window: u16,
    pub timestamp: bool,
    pub age_ms: u64,
}

/// A point-in-time view of one hardware rate.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct RateEntryDump {
    pub rate: u64,
    pub time_between: u32,
    pub using: i64,
    pub enabled: bool,
}

/// A point-in-time view of one interface's rate set.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct RateSetDump {
    pub ifindex: u32,
    pub dunit: u32,
    pub flags: String,
    pub flows_using: u64,
    pub flow_limit: u64,
    pub lowest_valid: usize,
    pub highest_valid: usize,
    pub rates: Vec<RateEntryDump>,
}
