// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Per-interface tables of hardware pacing rates, and choosing a rate
//! from one.

use super::PacingIfnet;
use super::SendTag;
use crate::ddi::sync::KMutex;
use bitflags::bitflags;
use core::fmt;
use core::fmt::Display;
use core::sync::atomic::AtomicI64;
use core::sync::atomic::AtomicU32;
use core::sync::atomic::AtomicU64;
use core::sync::atomic::Ordering;
use lro_api::RateEntryDump;
use lro_api::RateLimitQuery;
use lro_api::RateSetDump;
use lro_api::RlError;
use lro_api::RsPacing;
use lro_api::RtCaps;
use std::sync::Arc;

/// Rates offered to interfaces which accept any rate, in the order
/// they are handed out when an interface can only hold a few.
/// Bytes per second.
pub const DESIRED_RATES: [u64; 16] = [
    122_500,     // 1 Mbps
    180_500,     // 1.44 Mbps
    375_000,     // 3 Mbps
    625_000,     // 5 Mbps
    1_250_000,   // 10 Mbps
    1_875_000,   // 15 Mbps
    3_125_000,   // 25 Mbps
    3_750_000,   // 30 Mbps
    5_000_000,   // 40 Mbps
    6_250_000,   // 50 Mbps
    12_500_000,  // 100 Mbps
    25_000_000,  // 200 Mbps
    50_000_000,  // 400 Mbps
    100_000_000, // 800 Mbps
    12_500,      // 100 kbps
    25_000,      // 200 kbps
];

/// An interface which can hold at least this many rates gets every
/// rate from 1 Mbps to 1 Gbps in 1 Mbps steps.
pub const ALL_HARDWARE_RATES: usize = 1004;

/// One megabit per second, in bytes per second.
pub const ONE_MBPS: u64 = 125_000;

/// Rates below 1 Mbps at the front of the all-rates table.
const ALL_RATES_SUB_MBPS: [u64; 3] = [12_500, 25_000, 62_500];

/// The single rate above 1 Gbps at the end of the all-rates table.
const ALL_RATES_TOP: u64 = 1_250_000_000;

/// The segment size used to express a rate as a packet gap.
pub const ETHERNET_SEGMENT_SIZE: u64 = 1500;

const USECS_IN_SECOND: u64 = 1_000_000;

bitflags! {
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct RsFlags: u32 {
    /// The interface claims pacing but cannot do it; nothing attaches.
    const NO_PACING    = 1 << 0;
    /// The rates came from the canned table rather than the interface.
    const INT_TBL      = 1 << 1;
    /// The canned table is the all-rates table.
    const ALL_RATES    = 1 << 2;
    /// The interface has departed.
    const IS_DEAD      = 1 << 3;
    /// Destruction has been scheduled.
    const FUNERAL_SCHD = 1 << 4;
}
}

impl Display for RsFlags {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let names: Vec<&str> = self.iter_names().map(|(n, _)| n).collect();
        if names.is_empty() {
            write!(f, "ALIVE")
        } else {
            write!(f, "{}", names.join("|"))
        }
    }
}

/// One hardware rate.
#[derive(Debug)]
pub struct RateEntry {
    /// Bytes per second.
    pub rate: u64,
    /// Microseconds between two full-sized segments at this rate.
    pub time_between: u32,
    enabled: bool,
    tag: KMutex<Option<SendTag>>,
    using: AtomicI64,
}

impl RateEntry {
    fn new(rate: u64) -> Self {
        let gap = ETHERNET_SEGMENT_SIZE * USECS_IN_SECOND / rate;
        Self {
            rate,
            time_between: u32::try_from(gap).unwrap_or(u32::MAX),
            enabled: false,
            tag: KMutex::new(None),
            using: AtomicI64::new(0),
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Flows currently paced at this rate.
    pub fn using(&self) -> i64 {
        self.using.load(Ordering::Relaxed)
    }

    pub(super) fn get(&self) {
        self.using.fetch_add(1, Ordering::Relaxed);
    }

    pub(super) fn put(&self) {
        self.using.fetch_sub(1, Ordering::Relaxed);
    }

    fn dump(&self) -> RateEntryDump {
        RateEntryDump {
            rate: self.rate,
            time_between: self.time_between,
            using: self.using(),
            enabled: self.enabled,
        }
    }
}

/// The rates of one interface.
///
/// A set is created on first use of its interface and lives until the
/// interface departs and the last flow paced through it lets go.
pub struct TcpRateSet {
    pub(super) ifp: Arc<dyn PacingIfnet>,
    ifindex: u32,
    dunit: u32,
    flags: AtomicU32,
    flow_limit: u64,
    flows_using: AtomicU64,
    min_seg: u32,
    lowest_valid: usize,
    highest_valid: usize,
    rates: Box<[RateEntry]>,
}

impl fmt::Debug for TcpRateSet {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("TcpRateSet")
            .field("ifindex", &self.ifindex)
            .field("flags", &self.flags())
            .field("flows_using", &self.flows_using())
            .field("rates", &self.rates.len())
            .finish()
    }
}

fn all_rates_table() -> Vec<u64> {
    let mut rates = Vec::with_capacity(ALL_HARDWARE_RATES);
    rates.extend_from_slice(&ALL_RATES_SUB_MBPS);
    let mbps = ALL_HARDWARE_RATES - ALL_RATES_SUB_MBPS.len() - 1;
    rates.extend((1..=mbps as u64).map(|n| n * ONE_MBPS));
    rates.push(ALL_RATES_TOP);
    rates
}

impl TcpRateSet {
    /// Build the rate set described by the interface's answer to a
    /// capability query, allocating a hardware tag for every rate.
    ///
    /// Rates whose tag cannot be allocated stay in the table, disabled.
    /// Returns the set and the number of tag allocations that failed.
    pub fn new(
        ifp: Arc<dyn PacingIfnet>,
        q: &RateLimitQuery,
    ) -> Result<(Self, usize), RlError> {
        let mut flags = RsFlags::empty();

        let mut table = if q.flags.contains(RtCaps::NOSUPPORT)
            || !q.flags.intersects(
                RtCaps::FIXED_TABLE | RtCaps::SELECTABLE | RtCaps::UNUSABLE,
            ) {
            return Err(RlError::NotSupported);
        } else if q.flags.contains(RtCaps::UNUSABLE) {
            flags |= RsFlags::NO_PACING;
            vec![]
        } else if q.flags.contains(RtCaps::FIXED_TABLE) {
            q.rate_table.clone()
        } else if q.number_of_rates as usize >= ALL_HARDWARE_RATES {
            flags |= RsFlags::INT_TBL | RsFlags::ALL_RATES;
            all_rates_table()
        } else {
            flags |= RsFlags::INT_TBL;
            let n = match q.number_of_rates as usize {
                0 => DESIRED_RATES.len(),
                n => n.min(DESIRED_RATES.len()),
            };
            DESIRED_RATES[..n].to_vec()
        };

        table.retain(|&r| r != 0);
        table.sort_unstable();
        table.dedup();

        let mut rates: Vec<RateEntry> =
            table.into_iter().map(RateEntry::new).collect();
        let mut failed = 0;

        for (i, rte) in rates.iter_mut().enumerate() {
            match ifp.snd_tag_alloc(rte.rate, i as u32) {
                Ok(tag) => {
                    rte.tag = KMutex::new(Some(tag));
                    rte.enabled = true;
                }

                Err(_) => failed += 1,
            }
        }

        let lowest_valid = rates.iter().position(|r| r.enabled);
        let highest_valid = rates.iter().rposition(|r| r.enabled);
        let (lowest_valid, highest_valid) = match (lowest_valid, highest_valid)
        {
            (Some(lo), Some(hi)) => (lo, hi),
            _ => {
                flags |= RsFlags::NO_PACING;
                (0, 0)
            }
        };

        let rs = Self {
            ifindex: ifp.ifindex(),
            dunit: ifp.dunit(),
            ifp,
            flags: AtomicU32::new(flags.bits()),
            flow_limit: q.max_flows,
            flows_using: AtomicU64::new(0),
            min_seg: q.min_segment_burst,
            lowest_valid,
            highest_valid,
            rates: rates.into_boxed_slice(),
        };

        Ok((rs, failed))
    }

    pub fn ifindex(&self) -> u32 {
        self.ifindex
    }

    pub fn flags(&self) -> RsFlags {
        RsFlags::from_bits_retain(self.flags.load(Ordering::SeqCst))
    }

    /// Set `f`, returning whether it was already set.
    pub(super) fn set_flag(&self, f: RsFlags) -> bool {
        let prev = self.flags.fetch_or(f.bits(), Ordering::SeqCst);
        RsFlags::from_bits_retain(prev).contains(f)
    }

    pub fn is_dead(&self) -> bool {
        self.flags().contains(RsFlags::IS_DEAD)
    }

    pub fn can_pace(&self) -> bool {
        !self.flags().contains(RsFlags::NO_PACING)
    }

    pub fn flow_limit(&self) -> u64 {
        self.flow_limit
    }

    pub fn flows_using(&self) -> u64 {
        self.flows_using.load(Ordering::SeqCst)
    }

    /// Take a flow reference, unless the flow limit has been reached.
    pub(super) fn get_flow(&self) -> Result<(), RlError> {
        let prev = self.flows_using.fetch_add(1, Ordering::SeqCst);
        if self.flow_limit != 0 && prev >= self.flow_limit {
            self.flows_using.fetch_sub(1, Ordering::SeqCst);
            return Err(RlError::NoSpace);
        }
        Ok(())
    }

    /// Drop a flow reference, returning true if it was the last.
    pub(super) fn put_flow(&self) -> bool {
        self.flows_using.fetch_sub(1, Ordering::SeqCst) == 1
    }

    pub fn min_seg(&self) -> u32 {
        self.min_seg
    }

    pub fn rates(&self) -> &[RateEntry] {
        &self.rates
    }

    pub fn rate(&self, idx: usize) -> &RateEntry {
        &self.rates[idx]
    }

    /// The fastest usable rate.
    pub fn highest(&self) -> Option<&RateEntry> {
        self.can_pace().then(|| &self.rates[self.highest_valid])
    }

    /// Release the per-rate hardware tags. Safe to call repeatedly.
    pub(super) fn free_tags(&self) {
        for rte in self.rates.iter() {
            if let Some(tag) = rte.tag.lock().take() {
                self.ifp.snd_tag_free(tag);
            }
        }
    }

    fn valid(&self) -> impl DoubleEndedIterator<Item = (usize, &RateEntry)> {
        let range = if self.can_pace() {
            self.lowest_valid..self.highest_valid + 1
        } else {
            0..0
        };
        range.map(|i| (i, &self.rates[i])).filter(|(_, r)| r.enabled)
    }

    /// The index an all-rates table would hold the answer at, when
    /// `want` falls in its 1 Mbps steps.
    fn all_rates_hint(&self, want: u64, policy: RsPacing) -> Option<usize> {
        let base = ALL_RATES_SUB_MBPS.len() - 1;
        let steps = (ALL_HARDWARE_RATES - ALL_RATES_SUB_MBPS.len() - 1) as u64;
        if !self.flags().contains(RsFlags::ALL_RATES)
            || want < ONE_MBPS
            || want > steps * ONE_MBPS
        {
            return None;
        }

        let floor = base + (want / ONE_MBPS) as usize;
        let exact = want % ONE_MBPS == 0;

        let idx = if policy.contains(RsPacing::EXACT_MATCH) {
            if !exact {
                return None;
            }
            floor
        } else if policy.contains(RsPacing::GT) {
            floor + 1
        } else if policy.contains(RsPacing::LT) {
            floor
        } else if exact {
            floor
        } else {
            floor + 1
        };

        (idx < self.rates.len() && self.rates[idx].enabled).then_some(idx)
    }

    /// Choose the entry to pace `want` bytes per second at.
    ///
    /// With no policy bits the request is treated as `GEQ`. When no
    /// entry qualifies, `SUB_OK` falls back to the slowest valid rate
    /// for `LT` and the fastest otherwise.
    pub fn select(&self, want: u64, policy: RsPacing) -> Option<usize> {
        if !self.can_pace() {
            return None;
        }

        if let Some(idx) = self.all_rates_hint(want, policy) {
            return Some(idx);
        }

        let found = if policy.contains(RsPacing::EXACT_MATCH) {
            self.valid().find(|(_, r)| r.rate == want)
        } else if policy.contains(RsPacing::GT) {
            self.valid().find(|(_, r)| r.rate > want)
        } else if policy.contains(RsPacing::LT) {
            self.valid().rev().find(|(_, r)| r.rate <= want)
        } else {
            self.valid().find(|(_, r)| r.rate >= want)
        };

        if let Some((idx, _)) = found {
            return Some(idx);
        }

        if !policy.contains(RsPacing::SUB_OK) {
            return None;
        }

        if policy.contains(RsPacing::LT) {
            Some(self.lowest_valid)
        } else {
            Some(self.highest_valid)
        }
    }

    /// The next valid rate below entry `idx`, or zero.
    pub fn lower_rate(&self, idx: usize) -> u64 {
        self.valid()
            .rev()
            .find(|(i, _)| *i < idx)
            .map(|(_, r)| r.rate)
            .unwrap_or(0)
    }

    pub fn dump(&self) -> RateSetDump {
        RateSetDump {
            ifindex: self.ifindex,
            dunit: self.dunit,
            flags: self.flags().to_string(),
            flows_using: self.flows_using(),
            flow_limit: self.flow_limit,
            lowest_valid: self.lowest_valid,
            highest_valid: self.highest_valid,
            rates: self.rates.iter().map(RateEntry::dump).collect(),
        }
    }
}
