// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Engine statistics.

use crate::ddi::kstat::KStatProvider;
use crate::ddi::kstat::KStatU64;

/// Counters kept by each engine instance.
#[derive(KStatProvider)]
pub struct LroStats {
    /// Segments delivered, counting each segment merged into a
    /// delivered packet.
    pub queued: KStatU64,
    /// Entries flushed, plus packets passed through on error.
    pub flushed: KStatU64,
    pub bad_csum: KStatU64,
    pub cannot: KStatU64,
    pub not_supported: KStatU64,
    pub no_entries: KStatU64,
    pub stale_ack_drops: KStatU64,
    /// Heads delivered early because the next segment could not be
    /// merged onto them.
    pub push_replace: KStatU64,
    pub compressed: KStatU64,
    pub uncompressed: KStatU64,
    /// Flushes which queued directly to a control block.
    pub direct_queue: KStatU64,
    pub wokeup_queue: KStatU64,
    pub queue_mbuf_drops: KStatU64,
    pub sort_passes: KStatU64,
}
