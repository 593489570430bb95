// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Sizing transmit bursts for a paced connection.

use super::PacingLease;

/// The largest burst, in segments.
pub const MAX_MSS_SENT: u32 = 43;

/// The largest burst, in bytes.
pub const MAX_BURST_BYTES: u32 = 65535;

/// Software pacing sends one burst per this many microseconds.
const PACE_SLOT_USECS: u64 = 1000;

/// How many bytes a connection sending at `bw` bytes per second should
/// hand to TSO at once, in whole segments of `segsiz`.
///
/// Without a lease the burst covers one pacing slot's worth of data.
/// With one, the hardware spaces the segments itself, so the burst
/// covers as many segments as the rate's inter-packet gap fits in a
/// slot, but never fewer than the interface's minimum burst.
pub fn pacing_burst_size(
    bw: u64,
    segsiz: u32,
    can_use_1mss: bool,
    lease: Option<&PacingLease>,
) -> u32 {
    if segsiz == 0 {
        return 0;
    }

    let min_segs = if can_use_1mss { 1 } else { 2 };
    let max_segs = MAX_MSS_SENT.min(MAX_BURST_BYTES / segsiz).max(1);

    let segs = match lease {
        None => {
            let bytes = bw.saturating_mul(PACE_SLOT_USECS) / 1_000_000;
            u32::try_from(bytes / u64::from(segsiz)).unwrap_or(u32::MAX)
        }

        Some(l) => {
            let gap = u64::from(l.time_between());
            let segs = match gap {
                0 => max_segs,
                gap => u32::try_from(PACE_SLOT_USECS / gap).unwrap_or(max_segs),
            };
            segs.max(l.rate_set().min_seg())
        }
    };

    segs.clamp(min_segs.min(max_segs), max_segs) * segsiz
}
