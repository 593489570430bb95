// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Hardware pacing rate selection.
//!
//! Each interface that can pace in hardware gets a [`TcpRateSet`]: a
//! sorted table of rates, each backed by a hardware send tag. A TCP
//! connection asks the [`RateLimiter`] for a rate and a policy and
//! gets back a [`PacingLease`] naming the chosen entry; dropping the
//! lease lets go of it.
//!
//! Sets are shared by every CPU transmitting on the interface. Adding
//! or removing a set takes a mutex and then publishes a fresh
//! snapshot of the list. Lookups load the snapshot and never take the
//! mutex, nor does reading a set itself. When an interface departs
//! its set is unlinked and marked dead, and is destroyed once the
//! last lease on it is dropped and no reader is still inside an epoch
//! section.

use crate::ddi::epoch::EpochGuard;
use crate::ddi::epoch::NetEpoch;
use crate::ddi::kstat::KStatNamed;
use crate::ddi::kstat::KStatProvider;
use crate::ddi::kstat::KStatU64;
use crate::ddi::sync::KMutex;
use arc_swap::ArcSwap;
use lro_api::RateLimitQuery;
use lro_api::RateSetDump;
use lro_api::RlError;
use lro_api::RsPacing;
use slog::Logger;
use slog::info;
use slog::warn;
use std::sync::Arc;

pub mod burst;
mod lease;
pub mod table;

pub use burst::pacing_burst_size;
pub use lease::PacingLease;
pub use table::RsFlags;
pub use table::TcpRateSet;

/// A hardware transmit pacing context.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SendTag {
    pub id: u64,
    /// Bytes per second.
    pub rate: u64,
}

/// An interface which may pace transmit in hardware.
pub trait PacingIfnet: Send + Sync {
    fn ifindex(&self) -> u32;

    fn dunit(&self) -> u32 {
        0
    }

    /// Describe the interface's rate limiting capabilities.
    fn query_rates(&self) -> RateLimitQuery;

    fn snd_tag_alloc(&self, rate: u64, flowid: u32) -> Result<SendTag, RlError>;

    fn snd_tag_modify(
        &self,
        tag: &mut SendTag,
        rate: u64,
    ) -> Result<(), RlError>;

    fn snd_tag_free(&self, tag: SendTag);
}

#[derive(KStatProvider)]
pub struct RlStats {
    pub sets_alive: KStatU64,
    pub sets_dead: KStatU64,
    pub sets_destroyed: KStatU64,
    pub attach_ok: KStatU64,
    pub attach_fail: KStatU64,
    /// Hardware tag allocations refused for lack of memory.
    pub enobufs: KStatU64,
}

/// State shared between the limiter and its outstanding leases.
pub(crate) struct RlShared {
    /// The authoritative list, held across create and removal.
    sets: KMutex<Vec<Arc<TcpRateSet>>>,
    /// What readers see. Stored only with `sets` held.
    published: ArcSwap<Vec<Arc<TcpRateSet>>>,
    epoch: NetEpoch,
    stats: Arc<KStatNamed<RlStats>>,
    log: Logger,
}

impl RlShared {
    fn publish(&self, sets: &[Arc<TcpRateSet>]) {
        self.published.store(Arc::new(sets.to_vec()));
    }

    fn lookup(&self, ifindex: u32) -> Option<Arc<TcpRateSet>> {
        self.published
            .load()
            .iter()
            .find(|rs| rs.ifindex() == ifindex)
            .cloned()
    }

    /// Let go of one flow's hold on entry `idx` of `rs`.
    pub(crate) fn release(
        &self,
        rs: &Arc<TcpRateSet>,
        idx: usize,
        tag: Option<SendTag>,
    ) {
        rs.rate(idx).put();
        if let Some(tag) = tag {
            rs.ifp.snd_tag_free(tag);
        }
        self.put_flow(rs);
    }

    fn put_flow(&self, rs: &Arc<TcpRateSet>) {
        if rs.put_flow() && rs.is_dead() {
            self.defer_destroy(rs);
        }
    }

    /// Schedule the destruction of a dead, unused set. Only the first
    /// call for a given set does anything.
    fn defer_destroy(&self, rs: &Arc<TcpRateSet>) {
        if rs.set_flag(RsFlags::FUNERAL_SCHD) {
            return;
        }

        let rs = Arc::clone(rs);
        let stats = Arc::clone(&self.stats);
        let log = self.log.clone();

        self.epoch.call(move || {
            rs.free_tags();
            stats.vals.sets_dead.decr(1);
            stats.vals.sets_destroyed.incr(1);
            info!(log, "rate set destroyed"; "ifindex" => rs.ifindex());
        });
    }

    /// Mark an unlinked set dead.
    fn kill(&self, rs: &Arc<TcpRateSet>) {
        if rs.set_flag(RsFlags::IS_DEAD) {
            return;
        }

        // The hardware goes with the interface; leases only keep the
        // bookkeeping alive.
        rs.free_tags();
        self.stats.vals.sets_alive.decr(1);
        self.stats.vals.sets_dead.incr(1);

        let using = rs.flows_using();
        if using == 0 {
            self.defer_destroy(rs);
        } else {
            warn!(self.log, "interface departed with paced flows";
                "ifindex" => rs.ifindex(),
                "flows" => using,
            );
        }
    }
}

pub struct RateLimiter {
    shared: Arc<RlShared>,
}

impl RateLimiter {
    pub fn new(log: &Logger) -> Self {
        let shared = RlShared {
            sets: KMutex::new(vec![]),
            published: ArcSwap::from_pointee(vec![]),
            epoch: NetEpoch::new(),
            stats: Arc::new(KStatNamed::new("lro", "ratelimit")),
            log: log.new(slog::o!("component" => "ratelimit")),
        };
        Self { shared: Arc::new(shared) }
    }

    pub fn stats(&self) -> RlStatsSnap {
        self.shared.stats.snapshot()
    }

    /// Enter a read-side section. Set destruction waits for it.
    pub fn enter(&self) -> EpochGuard<'_> {
        self.shared.epoch.enter()
    }

    /// Destructions still waiting on readers.
    pub fn pending_destroy(&self) -> usize {
        self.shared.epoch.pending()
    }

    /// Find the live set for `ifp`, creating it on first use.
    fn find_rs(
        &self,
        ifp: &Arc<dyn PacingIfnet>,
    ) -> Result<Arc<TcpRateSet>, RlError> {
        let ifindex = ifp.ifindex();
        if let Some(rs) = self.shared.lookup(ifindex) {
            return Ok(rs);
        }

        let mut sets = self.shared.sets.lock();

        // Someone else may have created it while we waited.
        if let Some(rs) = sets.iter().find(|rs| rs.ifindex() == ifindex) {
            return Ok(Arc::clone(rs));
        }

        let q = ifp.query_rates();
        let (rs, failed) = TcpRateSet::new(Arc::clone(ifp), &q)?;
        self.shared.stats.vals.enobufs.incr(failed as u64);

        info!(self.shared.log, "rate set created";
            "ifindex" => ifindex,
            "rates" => rs.rates().len(),
            "flags" => %rs.flags(),
        );

        let rs = Arc::new(rs);
        sets.push(Arc::clone(&rs));
        self.shared.publish(&sets);
        self.shared.stats.vals.sets_alive.incr(1);
        Ok(rs)
    }

    /// Pace a flow on `ifp` at a hardware rate chosen for
    /// `bytes_per_sec` under `policy`.
    ///
    /// Returns the lease and the next lower valid rate in the table
    /// (zero if none), which the caller uses to size bursts.
    pub fn set_pacing_rate(
        &self,
        ifp: &Arc<dyn PacingIfnet>,
        flowid: u32,
        bytes_per_sec: u64,
        policy: RsPacing,
    ) -> Result<(PacingLease, u64), RlError> {
        let res = self.attach(ifp, flowid, bytes_per_sec, policy);

        match &res {
            Ok(_) => self.shared.stats.vals.attach_ok.incr(1),
            Err(_) => self.shared.stats.vals.attach_fail.incr(1),
        }

        res
    }

    fn attach(
        &self,
        ifp: &Arc<dyn PacingIfnet>,
        flowid: u32,
        bytes_per_sec: u64,
        policy: RsPacing,
    ) -> Result<(PacingLease, u64), RlError> {
        if bytes_per_sec == 0 {
            return Err(RlError::Inval);
        }

        let _g = self.shared.epoch.enter();
        let rs = self.find_rs(ifp)?;

        if !rs.can_pace() || rs.is_dead() {
            return Err(RlError::NoDev);
        }

        rs.get_flow()?;

        let Some(idx) = rs.select(bytes_per_sec, policy) else {
            self.shared.put_flow(&rs);
            return Err(RlError::NoEnt);
        };

        let rate = rs.rate(idx).rate;
        let tag = match rs.ifp.snd_tag_alloc(rate, flowid) {
            Ok(tag) => tag,
            Err(e) => {
                if e == RlError::NoMem {
                    self.shared.stats.vals.enobufs.incr(1);
                }
                self.shared.put_flow(&rs);
                return Err(e);
            }
        };

        rs.rate(idx).get();
        let lower = rs.lower_rate(idx);
        let shared = Arc::clone(&self.shared);
        let lease = PacingLease::new(shared, Arc::clone(&rs), idx, tag);

        // The interface departed while we were attaching.
        if rs.is_dead() {
            drop(lease);
            return Err(RlError::NoDev);
        }

        Ok((lease, lower))
    }

    /// Move a flow to the rate chosen for `bytes_per_sec`.
    ///
    /// A lease on a departed interface is released and the flow
    /// attached afresh. When no rate qualifies the lease is released
    /// and `NoEnt` returned; the flow continues unpaced.
    pub fn chg_pacing_rate(
        &self,
        mut lease: PacingLease,
        ifp: &Arc<dyn PacingIfnet>,
        flowid: u32,
        bytes_per_sec: u64,
        policy: RsPacing,
    ) -> Result<(PacingLease, u64), RlError> {
        if lease.rate_set().is_dead() {
            drop(lease);
            return self.set_pacing_rate(ifp, flowid, bytes_per_sec, policy);
        }

        let _g = self.shared.epoch.enter();
        let rs = Arc::clone(lease.rate_set());

        let Some(idx) = rs.select(bytes_per_sec, policy) else {
            return Err(RlError::NoEnt);
        };

        if idx != lease.index() {
            lease.move_to(idx)?;
        }

        Ok((lease, rs.lower_rate(idx)))
    }

    /// The interface `ifindex` has gone away.
    pub fn ifnet_departure(&self, ifindex: u32) {
        let gone: Vec<Arc<TcpRateSet>> = {
            let mut sets = self.shared.sets.lock();
            let (gone, keep): (Vec<_>, Vec<_>) =
                sets.drain(..).partition(|rs| rs.ifindex() == ifindex);
            *sets = keep;
            self.shared.publish(&sets);
            gone
        };

        for rs in &gone {
            self.shared.kill(rs);
        }
    }

    /// Retire every set, as when the stack is unloading.
    pub fn shutdown(&self) {
        let gone = {
            let mut sets = self.shared.sets.lock();
            let gone = core::mem::take(&mut *sets);
            self.shared.publish(&sets);
            gone
        };
        for rs in &gone {
            self.shared.kill(rs);
        }
    }

    /// The fastest rate `ifp` can pace at, if it has a usable set.
    pub fn highest_rate(&self, ifp: &Arc<dyn PacingIfnet>) -> Option<u64> {
        self.shared
            .lookup(ifp.ifindex())
            .and_then(|rs| rs.highest().map(|rte| rte.rate))
    }

    pub fn dump(&self) -> Vec<RateSetDump> {
        self.shared.published.load().iter().map(|rs| rs.dump()).collect()
    }
}
