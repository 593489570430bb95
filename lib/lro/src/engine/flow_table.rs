// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! The flow table.
//!
//! A fixed pool of [`LroEntry`] slots, sized once at engine creation.
//! A slot is either on the free list or active, in which case it is
//! also linked into exactly one hash bucket. Nothing is allocated
//! per packet: bucket chains and the free and active lists hold slot
//! indices.

use super::entry::LroEntry;
use super::parse::ParsedHeaders;
use crate::ddi::time::Moment;
use alloc::vec::Vec;
use lro_api::FlowKey;

pub struct FlowTable {
    entries: Vec<LroEntry>,
    buckets: Vec<Vec<usize>>,
    free: Vec<usize>,
    /// Active slots in allocation order.
    active: Vec<usize>,
}

impl FlowTable {
    /// Create a table of `nentries` slots. The number of buckets is
    /// the largest power of two not above `nentries`.
    pub fn new(nentries: usize) -> Self {
        let nentries = nentries.max(1);
        let hashsz = 1usize << (usize::BITS - 1 - nentries.leading_zeros());

        Self {
            entries: (0..nentries).map(|_| LroEntry::default()).collect(),
            buckets: (0..hashsz)
                .map(|_| Vec::with_capacity(nentries))
                .collect(),
            // Pop order hands out slot 0 first.
            free: (0..nentries).rev().collect(),
            active: Vec::with_capacity(nentries),
        }
    }

    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    pub fn hashsz(&self) -> usize {
        self.buckets.len()
    }

    pub fn num_active(&self) -> usize {
        self.active.len()
    }

    pub fn num_free(&self) -> usize {
        self.free.len()
    }

    /// Find the entry for a flow in `bucket`.
    pub fn lookup(
        &self,
        bucket: usize,
        outer: &FlowKey,
        inner: Option<&FlowKey>,
    ) -> Option<usize> {
        self.buckets[bucket]
            .iter()
            .copied()
            .find(|&idx| self.entries[idx].matches(outer, inner))
    }

    /// Take a slot off the free list and link it into `bucket` for
    /// the flow described by `pa`. The caller has already looked the
    /// flow up and missed.
    pub fn alloc(
        &mut self,
        bucket: usize,
        pa: &ParsedHeaders,
        now: Moment,
    ) -> Option<usize> {
        let idx = self.free.pop()?;
        self.entries[idx].assign(pa, bucket, now);
        self.buckets[bucket].push(idx);
        self.active.push(idx);
        Some(idx)
    }

    pub fn get(&self, idx: usize) -> &LroEntry {
        &self.entries[idx]
    }

    pub fn get_mut(&mut self, idx: usize) -> &mut LroEntry {
        &mut self.entries[idx]
    }

    /// Unlink an active entry from its bucket and the active list,
    /// handing it to the caller for flushing. The slot stays out of
    /// service until [`Self::recycle`] returns it.
    pub fn remove(&mut self, idx: usize) -> LroEntry {
        let le = core::mem::take(&mut self.entries[idx]);
        self.buckets[le.bucket].retain(|&i| i != idx);
        self.active.retain(|&i| i != idx);
        le
    }

    /// Return a removed entry's storage to the free list.
    pub fn recycle(&mut self, idx: usize, mut le: LroEntry) {
        le.reset();
        self.entries[idx] = le;
        self.free.push(idx);
    }

    /// A snapshot of the active slots, oldest first.
    pub fn active(&self) -> Vec<usize> {
        self.active.clone()
    }

    pub fn iter_active(&self) -> impl Iterator<Item = &LroEntry> {
        self.active.iter().map(|&idx| &self.entries[idx])
    }
}
