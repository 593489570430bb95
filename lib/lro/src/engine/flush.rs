// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Flushing entries and the batched input path.

use super::LroCtrl;
use super::csum_update::update_headers;
use super::entry::LroEntry;
use super::sort::LroMbufSort;
use super::sort::lro_sort;
use super::stack::LroStack;
use crate::ddi::mbuf::CsumFlags;
use crate::ddi::mbuf::Mbuf;
use crate::ddi::mbuf::MbufFlags;
use crate::ddi::time::Moment;
use core::time::Duration;
use slog::debug;

/// Bits of a batch sort key naming the stream; the rest is the
/// packet's arrival index.
const STREAM_MASK: u64 = !0 << 24;

impl<S: LroStack> LroCtrl<S> {
    /// Hand `m`, the head of `le`, to the network layer with its
    /// headers describing everything merged into it.
    pub(super) fn flush_out_entry(&mut self, le: &LroEntry, mut m: Mbuf) {
        if le.needs_merge {
            update_headers(le, &mut m);
        }

        let mut csum = CsumFlags::DATA_VALID | CsumFlags::PSEUDO_HDR;
        if !le.tcp().is_ipv6() {
            csum |= CsumFlags::IP_CHECKED | CsumFlags::IP_VALID;
        }
        if le.outer.data.decrypted {
            csum |= CsumFlags::TLS_DECRYPTED;
        }
        m.pkthdr.csum_flags = csum;
        m.pkthdr.csum_data = 0xFFFF;

        self.stats.vals.queued += u64::from(m.pkthdr.lro.nsegs);
        self.stack.if_input(m);
    }

    /// Deliver everything held by `le`, leaving it empty.
    pub(super) fn flush(&mut self, le: &mut LroEntry) {
        if le.pkts.is_empty() {
            return;
        }

        self.stats.vals.flushed += 1;
        debug!(self.log, "flush";
            "flow" => %le.tcp().data,
            "pkts" => le.pkts.len(),
        );

        if self.queue_to_tcb(le).is_ok() {
            return;
        }

        self.condense(le);
        if let Some(head) = le.pkts.pop_front() {
            self.flush_out_entry(le, head);
        }
    }

    /// Flush and release every active entry.
    pub fn flush_active(&mut self) {
        for idx in self.table.active() {
            let mut le = self.table.remove(idx);
            self.flush(&mut le);
            self.table.recycle(idx, le);
        }
    }

    /// Flush entries created at or before `cutoff`.
    ///
    /// Age counts from entry creation, not the last packet, so a busy
    /// flow is still flushed once per timeout period.
    pub fn flush_inactive_at(&mut self, cutoff: Moment) {
        for idx in self.table.active() {
            let expired =
                self.table.get(idx).alloc_time.is_some_and(|t| t <= cutoff);
            if !expired {
                continue;
            }

            let mut le = self.table.remove(idx);
            self.flush(&mut le);
            self.table.recycle(idx, le);
        }
    }

    /// Flush entries older than `timeout`.
    pub fn flush_inactive(&mut self, timeout: Duration) {
        if let Some(cutoff) = Moment::now().checked_sub(timeout) {
            self.flush_inactive_at(cutoff);
        }
    }

    /// Flush entries older than the configured inactivity timeout, if
    /// one is set.
    pub fn flush_inactive_default(&mut self) {
        if let Some(timeout) = self.cfg.inactive_timeout() {
            self.flush_inactive(timeout);
        }
    }

    /// Push every queued packet through the engine, then flush
    /// everything.
    ///
    /// The batch is sorted so that each stream's packets are adjacent
    /// and in arrival order; each stream is flushed before the next
    /// begins.
    pub fn flush_all(&mut self) {
        self.note_cpu();
        self.last_queue_time = Moment::now();

        let mut batch = core::mem::take(&mut self.mbuf_data);
        if !batch.is_empty() {
            let passes = lro_sort(&mut batch);
            self.stats.vals.sort_passes += u64::from(passes);
        }

        let mut cur_stream = 0;
        for LroMbufSort { seq, mb } in batch.drain(..) {
            let stream = seq & STREAM_MASK;
            if stream != cur_stream {
                cur_stream = stream;
                self.flush_active();
            }

            if let Err(rej) = self.rx_common(mb, 0, false) {
                self.flush_active();

                if let Some(m) = rej.pkt {
                    self.stats.vals.queued += 1;
                    self.stats.vals.flushed += 1;
                    self.stack.if_input(m);
                }
            }
        }

        // Keep the buffer's allocation for the next burst.
        self.mbuf_data = batch;
        self.flush_active();
    }

    /// Buffer `m` for the next [`LroCtrl::flush_all`], which runs on
    /// its own once the buffer is full.
    pub fn queue_mbuf(&mut self, mut m: Mbuf) {
        if self.cfg.mbufs == 0 {
            self.stats.vals.queue_mbuf_drops += 1;
            return;
        }

        if !self.cfg.enabled {
            self.stack.if_input(m);
            return;
        }

        self.last_queue_time = Moment::now();

        if self.cfg.mbufq_stacks && !m.flags.contains(MbufFlags::TSTMP) {
            m.pkthdr.rcv_tstmp =
                self.last_queue_time.delta_as_nanos(self.base);
            m.flags |= MbufFlags::TSTMP_LRO;
        }

        let idx = self.mbuf_data.len() as u64;
        let seq = (u64::from(m.pkthdr.hashtype) << 56)
            | (u64::from(m.pkthdr.flowid) << 24)
            | idx;
        self.mbuf_data.push(LroMbufSort { seq, mb: m });

        if self.mbuf_data.len() >= self.cfg.mbufs as usize {
            self.flush_all();
        }
    }
}
