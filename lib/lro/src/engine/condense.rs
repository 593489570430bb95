// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! The condenser: merging an entry's packets into its head.
//!
//! Packets are merged strictly in the order they were appended. When
//! the packet after the head cannot be merged, the head is delivered
//! as it stands (push and replace) and that packet becomes the new
//! head. A head which could never be a merge target, because of its
//! options or flags, is delivered the same way.

use super::LroCtrl;
use super::checksum::Checksum;
use super::entry::LroEntry;
use super::stack::LroStack;
use super::tcp::TcpFlags;
use super::tcp::TcpSegInfo;
use super::tcp::seq_gt;
use super::tcp::tstmp_gt;
use crate::ddi::mbuf::Mbuf;
use slog::debug;

fn seg_info(m: &Mbuf) -> Option<TcpSegInfo> {
    m.first().get(m.pkthdr.lro.tcp_h_off..).and_then(TcpSegInfo::read)
}

/// Can `m` be the packet others are merged onto?
fn head_ok(m: &Mbuf) -> bool {
    seg_info(m).is_some_and(|info| {
        info.opts.is_mergeable() && TcpFlags::MERGEABLE.contains(info.flags)
    })
}

/// The most payload one packet of this entry may carry: the
/// configured limit, further capped so that no IP or UDP length field
/// of the merged packet can overflow.
fn length_limit(le: &LroEntry, cfg_lim: u32) -> u32 {
    let o = &le.outer;
    let base = if o.is_ipv6() { o.l4_off } else { o.l3_off };
    let overhead = le.tcp().hdr_end.saturating_sub(base) as u32;
    cfg_lim.min(u32::from(u16::MAX).saturating_sub(overhead))
}

impl<S: LroStack> LroCtrl<S> {
    /// Deliver the head of `le` and rebuild the entry around the next
    /// packet.
    pub(super) fn push_and_replace(&mut self, le: &mut LroEntry) {
        let Some(head) = le.pkts.pop_front() else { return };

        self.stats.vals.push_replace += 1;
        self.flush_out_entry(le, head);
        le.set_from_head();
    }

    /// Merge as much of `le` as possible into its head, leaving at
    /// most one packet in the entry.
    pub(super) fn condense(&mut self, le: &mut LroEntry) {
        'again: loop {
            let Some(head) = le.pkts.front() else { return };

            if !head_ok(head) {
                self.push_and_replace(le);
                continue 'again;
            }

            let lim = length_limit(le, self.cfg.length_lim);

            while le.pkts.len() > 1 {
                let m = &le.pkts[1];
                let head_lro = le.pkts[0].pkthdr.lro;
                let d_len = m.pkthdr.lro.tcp_d_len;

                let Some(info) = seg_info(m) else {
                    self.push_and_replace(le);
                    continue 'again;
                };

                if head_lro.nsegs >= self.cfg.ackcnt_lim
                    || head_lro.tcp_d_len + d_len > lim
                {
                    self.push_and_replace(le);
                    continue 'again;
                }

                let ts = info.opts.timestamp();
                if !info.opts.is_mergeable()
                    || ts.is_some() != le.timestamp
                    || !TcpFlags::MERGEABLE.contains(info.flags)
                {
                    self.push_and_replace(le);
                    continue 'again;
                }

                if let Some((val, ecr)) = ts {
                    if tstmp_gt(le.tsval, val) {
                        self.push_and_replace(le);
                        continue 'again;
                    }

                    le.tsval = val;
                    le.tsecr = ecr;
                }

                // Out of order, or a duplicate ACK the stack must see
                // by itself. A pure ACK which only moves the window is
                // a window update, not a duplicate.
                let dup_ack = d_len == 0
                    && info.ack == le.ack_seq
                    && info.window == le.window;
                if info.seq != le.next_seq || dup_ack {
                    debug!(self.log, "out of order";
                        "flow" => %le.tcp().data,
                        "seq" => info.seq,
                        "expected" => le.next_seq,
                    );
                    self.push_and_replace(le);
                    continue 'again;
                }

                le.next_seq = le.next_seq.wrapping_add(d_len);

                if seq_gt(info.ack, le.ack_seq) {
                    le.ack_seq = info.ack;
                    le.window = info.window;
                } else if info.ack == le.ack_seq {
                    le.window = le.window.max(info.window);
                }

                le.needs_merge = true;

                le.flags |= info.flags;

                let Some(mut m) = le.pkts.remove(1) else { break };
                let Some(head) = le.pkts.front_mut() else { break };
                head.pkthdr.lro.nsegs += m.pkthdr.lro.nsegs;

                if d_len == 0 {
                    continue;
                }

                // Data landing at an odd offset of the head's payload
                // contributes its sum byte-swapped.
                let part = Checksum::from(u32::from(m.pkthdr.lro.tcp_d_csum));
                le.append_csum += if head_lro.tcp_d_len % 2 == 1 {
                    part.swapped()
                } else {
                    part
                };

                head.pkthdr.lro.tcp_d_len += d_len;
                m.adj_front(m.pkthdr.lro.tcp_h_off + info.hdr_len);
                head.append(m);
            }

            return;
        }
    }
}
