// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

use super::RlShared;
use super::SendTag;
use super::TcpRateSet;
use super::table::RateEntry;
use core::fmt;
use lro_api::RlError;
use std::sync::Arc;

/// One flow's hold on a hardware rate.
///
/// The lease keeps its rate set alive. Dropping it frees the flow's
/// send tag and, if the interface has departed and this was the last
/// flow, lets the set be destroyed.
pub struct PacingLease {
    shared: Arc<RlShared>,
    rs: Arc<TcpRateSet>,
    idx: usize,
    tag: Option<SendTag>,
}

impl PacingLease {
    pub(super) fn new(
        shared: Arc<RlShared>,
        rs: Arc<TcpRateSet>,
        idx: usize,
        tag: SendTag,
    ) -> Self {
        Self { shared, rs, idx, tag: Some(tag) }
    }

    pub fn rate_set(&self) -> &Arc<TcpRateSet> {
        &self.rs
    }

    pub fn index(&self) -> usize {
        self.idx
    }

    pub fn entry(&self) -> &RateEntry {
        self.rs.rate(self.idx)
    }

    /// Bytes per second.
    pub fn rate(&self) -> u64 {
        self.entry().rate
    }

    pub fn time_between(&self) -> u32 {
        self.entry().time_between
    }

    pub fn ifindex(&self) -> u32 {
        self.rs.ifindex()
    }

    pub fn tag(&self) -> Option<&SendTag> {
        self.tag.as_ref()
    }

    /// Retune the flow's tag to entry `idx` of the same set.
    pub(super) fn move_to(&mut self, idx: usize) -> Result<(), RlError> {
        let rate = self.rs.rate(idx).rate;
        if let Some(tag) = self.tag.as_mut() {
            self.rs.ifp.snd_tag_modify(tag, rate)?;
        }

        self.rs.rate(idx).get();
        self.rs.rate(self.idx).put();
        self.idx = idx;
        Ok(())
    }
}

impl fmt::Debug for PacingLease {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("PacingLease")
            .field("ifindex", &self.ifindex())
            .field("rate", &self.rate())
            .field("tag", &self.tag)
            .finish()
    }
}

impl Drop for PacingLease {
    fn drop(&mut self) {
        self.shared.release(&self.rs, self.idx, self.tag.take());
    }
}
