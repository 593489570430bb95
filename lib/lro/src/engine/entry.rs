// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! The flow entry: one superpacket under construction.

use super::checksum::Checksum;
use super::parse::LroParser;
use super::parse::ParsedHeaders;
use super::tcp::TcpFlags;
use super::tcp::TcpSegInfo;
use crate::ddi::mbuf::Mbuf;
use crate::ddi::time::Moment;
use alloc::collections::VecDeque;
use lro_api::FlowKey;
use lro_api::LroEntryDump;

/// A flow entry.
///
/// Packets are appended to `pkts` as they arrive and only merged when
/// the entry is flushed. The merge state below describes the packet at
/// the front of `pkts`, the head, and is rebuilt from each new head
/// after a push-and-replace.
#[derive(Debug, Default)]
pub struct LroEntry {
    pub outer: LroParser,
    pub inner: Option<LroParser>,
    pub pkts: VecDeque<Mbuf>,

    /// The sequence number expected of the next mergeable segment.
    pub next_seq: u32,
    pub ack_seq: u32,
    pub tsval: u32,
    pub tsecr: u32,
    pub window: u16,
    /// Flags of every segment merged into the head.
    pub flags: TcpFlags,
    /// The head carries a timestamp option.
    pub timestamp: bool,
    /// The head's headers must be rewritten before dispatch.
    pub needs_merge: bool,
    /// Sum of the payload merged onto the head so far, aligned to
    /// the head's payload.
    pub append_csum: Checksum,
    pub alloc_time: Option<Moment>,

    pub compressed: u64,
    pub uncompressed: u64,
    pub bucket: usize,
}

impl LroEntry {
    /// The level carrying the TCP segment.
    pub fn tcp(&self) -> &LroParser {
        self.inner.as_ref().unwrap_or(&self.outer)
    }

    fn tcp_mut(&mut self) -> &mut LroParser {
        self.inner.as_mut().unwrap_or(&mut self.outer)
    }

    pub fn matches(&self, outer: &FlowKey, inner: Option<&FlowKey>) -> bool {
        self.outer.data == *outer
            && self.inner.as_ref().map(|p| &p.data) == inner
    }

    /// Take on the identity of a flow.
    pub fn assign(&mut self, pa: &ParsedHeaders, bucket: usize, now: Moment) {
        self.outer = pa.outer;
        self.inner = pa.inner;
        self.bucket = bucket;
        self.alloc_time = Some(now);
    }

    /// Rebuild the merge state from the packet now at the head.
    ///
    /// Every packet of a flow shares the header offsets recorded at
    /// entry creation except for the length of the TCP options, which
    /// is re-read from the new head.
    pub fn set_from_head(&mut self) {
        let Some(m) = self.pkts.front() else { return };
        let tcp_h_off = m.pkthdr.lro.tcp_h_off;
        let d_len = m.pkthdr.lro.tcp_d_len;
        let Some(info) = m.first().get(tcp_h_off..).and_then(TcpSegInfo::read)
        else {
            return;
        };

        self.tcp_mut().hdr_end = tcp_h_off + info.hdr_len;
        self.next_seq = info.seq.wrapping_add(d_len);
        self.ack_seq = info.ack;
        self.window = info.window;
        self.flags = info.flags;

        match info.opts.timestamp() {
            Some((val, ecr)) => {
                self.timestamp = true;
                self.tsval = val;
                self.tsecr = ecr;
            }

            None => {
                self.timestamp = false;
                self.tsval = 0;
                self.tsecr = 0;
            }
        }

        self.needs_merge = false;
        self.append_csum = Checksum::new();
    }

    /// Clear everything but the allocation backing `pkts`.
    pub fn reset(&mut self) {
        let mut pkts = core::mem::take(&mut self.pkts);
        pkts.clear();
        *self = Self { pkts, ..Default::default() };
    }

    pub fn dump(&self, now: Moment) -> LroEntryDump {
        LroEntryDump {
            outer: self.outer.data,
            inner: self.inner.map(|p| p.data),
            pkts: self.pkts.len() as u32,
            next_seq: self.next_seq,
            ack_seq: self.ack_seq,
            window: self.window,
            timestamp: self.timestamp,
            age_ms: self
                .alloc_time
                .map(|t| now.delta_as_millis(t))
                .unwrap_or(0),
        }
    }
}
