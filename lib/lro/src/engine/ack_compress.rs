// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Direct delivery to TCP control blocks and ACK compression.
//!
//! When the connection a flow belongs to can take packets queued
//! directly, the flow's packets skip both condensing and generic
//! input. They lose their L2 header and go onto the control block's
//! input queue in arrival order. Pure ACKs are further reduced to an
//! [`AckEnt`] descriptor packed into an [`AckBatch`], and the packet
//! itself is freed.

use super::LroCtrl;
use super::entry::LroEntry;
use super::ip4::Ipv4HdrRaw;
use super::ip6::Ipv6HdrRaw;
use super::stack::LroStack;
use super::stack::LroTcb;
use super::stack::TcbFlags;
use super::stack::TcbInput;
use super::tcp::TcpFlags;
use super::tcp::TcpOpts;
use super::tcp::TcpSegInfo;
use crate::ddi::mbuf::Mbuf;
use crate::ddi::mbuf::MbufFlags;
use crate::engine::ether::ETHER_TYPE_IPV4;
use crate::engine::ether::ETHER_TYPE_IPV6;
use alloc::vec::Vec;
use lro_api::LroError;
use slog::debug;
use std::net::IpAddr;
use zerocopy::FromBytes;

/// Batch capacity while a connection keeps its batches small.
pub const ACK_BATCH_SMALL: usize = 8;
/// Batch capacity once a small batch has overflowed.
pub const ACK_BATCH_LARGE: usize = 64;

/// [`AckEnt::flags`] bits above the TCP flags byte.
pub const ACK_TSTMP_LRO: u16 = 0x0100;
pub const ACK_TSTMP_HDWR: u16 = 0x0200;
pub const ACK_HAS_TSTMP: u16 = 0x0400;

/// A compressed ACK.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct AckEnt {
    /// Receive time in nanoseconds.
    pub timestamp: u64,
    pub seq: u32,
    pub ack: u32,
    pub ts_value: u32,
    pub ts_echo: u32,
    pub win: u16,
    /// TCP flags in the low byte, `ACK_*` bits above.
    pub flags: u16,
    /// IPv4 TOS or IPv6 traffic class.
    pub codepoint: u8,
}

/// A run of compressed ACKs delivered as one unit.
#[derive(Clone, Debug)]
pub struct AckBatch {
    ents: heapless::Vec<AckEnt, ACK_BATCH_LARGE>,
    cap: usize,
}

impl AckBatch {
    pub fn new(large: bool) -> Self {
        let cap = if large { ACK_BATCH_LARGE } else { ACK_BATCH_SMALL };
        Self { ents: heapless::Vec::new(), cap }
    }

    pub fn capacity(&self) -> usize {
        self.cap
    }

    pub fn len(&self) -> usize {
        self.ents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ents.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.ents.len() >= self.cap
    }

    pub fn push(&mut self, ent: AckEnt) -> Result<(), AckEnt> {
        if self.is_full() {
            return Err(ent);
        }

        self.ents.push(ent)
    }

    pub fn as_slice(&self) -> &[AckEnt] {
        &self.ents
    }
}

/// Can this ACK be compressed? Also reports whether it carried
/// options other than a timestamp, which usually means SACK.
fn ack_valid(m: &Mbuf, info: &TcpSegInfo) -> (bool, bool) {
    if matches!(info.opts, TcpOpts::Other) {
        return (false, true);
    }

    let ok = TcpFlags::COMPRESSIBLE.contains(info.flags)
        && m.pkthdr.lro.tcp_d_len == 0
        && info.flags.contains(TcpFlags::ACK);
    (ok, false)
}

fn build_ack_entry(m: &Mbuf, info: &TcpSegInfo, codepoint: u8) -> AckEnt {
    let mut flags = u16::from(info.flags.bits());

    if m.flags.contains(MbufFlags::TSTMP_LRO) {
        flags |= ACK_TSTMP_LRO;
    } else if m.flags.contains(MbufFlags::TSTMP) {
        flags |= ACK_TSTMP_HDWR;
    }

    let (ts_value, ts_echo) = match info.opts.timestamp() {
        Some(ts) => {
            flags |= ACK_HAS_TSTMP;
            ts
        }
        None => (0, 0),
    };

    AckEnt {
        timestamp: m.pkthdr.rcv_tstmp,
        seq: info.seq,
        ack: info.ack,
        ts_value,
        ts_echo,
        win: info.window,
        flags,
        codepoint,
    }
}

/// Read the IP codepoint and remove everything in front of the IP
/// header, leaving the TCP header offset pointing at the same bytes.
fn strip_l2(m: &mut Mbuf, l3_off: usize, v6: bool) -> u8 {
    let ip = m.first().get(l3_off..).unwrap_or(&[]);
    let codepoint = if v6 {
        Ipv6HdrRaw::ref_from_prefix(ip)
            .map(|(h, _)| h.traffic_class())
            .unwrap_or(0)
    } else {
        Ipv4HdrRaw::ref_from_prefix(ip).map(|(h, _)| h.dscp_ecn).unwrap_or(0)
    };

    m.adj_front(l3_off);
    m.flags |= MbufFlags::LRO_EHDRSTRP;
    m.pkthdr.lro.etype = if v6 { ETHER_TYPE_IPV6 } else { ETHER_TYPE_IPV4 };
    m.pkthdr.lro.tcp_h_off -= l3_off;

    // The checksum was verified on receive.
    let csum_off = m.pkthdr.lro.tcp_h_off + 16;
    if let Some(csum) = m.first_mut().get_mut(csum_off..csum_off + 2) {
        csum.copy_from_slice(&[0, 0]);
    }

    codepoint
}

/// Where compressed ACKs are currently being added.
#[derive(Clone, Copy)]
enum CurBatch {
    /// The batch already at the tail of the control block's queue.
    Queued,
    /// A batch created during this pass, by index into the output.
    New(usize),
}

fn cur_batch<'a>(
    cur: Option<CurBatch>,
    out: &'a mut [TcbInput],
    tcb: &'a mut impl LroTcb,
) -> Option<&'a mut AckBatch> {
    let slot = match cur? {
        CurBatch::Queued => tcb.input_queue().back_mut()?,
        CurBatch::New(i) => out.get_mut(i)?,
    };

    match slot {
        TcbInput::Acks(batch) => Some(batch),
        TcbInput::Pkt(_) => None,
    }
}

impl<S: LroStack> LroCtrl<S> {
    /// Queue an entry's packets straight onto the control block of its
    /// connection, compressing pure ACKs on the way.
    ///
    /// Fails with [`LroError::CannotProcess`], leaving the entry
    /// untouched, whenever the connection cannot take direct delivery.
    pub(super) fn queue_to_tcb(
        &mut self,
        le: &mut LroEntry,
    ) -> Result<(), LroError> {
        if !self.cfg.mbufq_stacks
            || le.outer.data.vlan_id != 0
            || le.inner.is_some()
        {
            return Err(LroError::CannotProcess);
        }

        if let IpAddr::V6(src) = le.outer.data.src_addr {
            if src.is_unspecified() {
                return Err(LroError::CannotProcess);
            }
        }

        let affinity = self.cpu.affinity();
        let stats = &self.stats.vals;
        let tcb = self
            .stack
            .tcp_lookup(&le.outer.data)
            .ok_or(LroError::CannotProcess)?;

        if tcb.flags().intersects(TcbFlags::DROPPED | TcbFlags::TIMEWAIT) {
            return Err(LroError::CannotProcess);
        }

        if let Some(cpu) = affinity {
            if tcb.irq_cpu().is_none() {
                tcb.set_irq_cpu(cpu);
            }
        }

        if !tcb
            .flags()
            .intersects(TcbFlags::SUPPORTS_MBUFQ | TcbFlags::MBUF_ACKCMP)
        {
            return Err(LroError::CannotProcess);
        }

        let mut should_wake = !tcb.flags().contains(TcbFlags::MBUF_QUEUE_READY);
        let mut can_append_old = true;
        let mut cur: Option<CurBatch> = None;
        let mut out: Vec<TcbInput> = Vec::with_capacity(le.pkts.len());
        let l3_off = le.outer.l3_off;
        let v6 = le.outer.is_ipv6();

        while let Some(mut m) = le.pkts.pop_front() {
            let codepoint = strip_l2(&mut m, l3_off, v6);
            let info = m
                .first()
                .get(m.pkthdr.lro.tcp_h_off..)
                .and_then(TcpSegInfo::read);
            let (compressible, other_opts) = match &info {
                Some(info) => ack_valid(&m, info),
                None => (false, false),
            };
            let tflags = tcb.flags();

            if other_opts && !tflags.contains(TcbFlags::DONT_SACK_QUEUE) {
                should_wake = true;
            } else if !should_wake {
                should_wake = tcb.early_wake_check();
            }

            let ent = match info {
                Some(info)
                    if compressible
                        && tflags.contains(TcbFlags::MBUF_ACKCMP) =>
                {
                    Some(build_ack_entry(&m, &info, codepoint))
                }
                _ => None,
            };

            let Some(ent) = ent else {
                out.push(TcbInput::Pkt(m));
                can_append_old = false;
                cur = None;
                le.uncompressed += 1;
                stats.uncompressed.incr(1);
                continue;
            };

            let has_room = cur_batch(cur, &mut out, &mut *tcb)
                .is_some_and(|batch| !batch.is_full());

            if !has_room {
                if cur.is_some() {
                    tcb.set_flags(tcb.flags() | TcbFlags::MBUF_L_ACKS);
                }

                cur = None;

                if can_append_old {
                    match tcb.input_queue().back() {
                        Some(TcbInput::Acks(batch)) if !batch.is_full() => {
                            cur = Some(CurBatch::Queued);
                        }

                        Some(TcbInput::Acks(_)) => {
                            tcb.set_flags(tcb.flags() | TcbFlags::MBUF_L_ACKS);
                        }

                        _ => {}
                    }
                }

                if cur.is_none() {
                    let large = tcb.flags().contains(TcbFlags::MBUF_L_ACKS);
                    out.push(TcbInput::Acks(AckBatch::new(large)));
                    cur = Some(CurBatch::New(out.len() - 1));
                }
            }

            let pushed = cur_batch(cur, &mut out, &mut *tcb)
                .is_some_and(|batch| batch.push(ent).is_ok());

            if pushed {
                le.compressed += 1;
                stats.compressed.incr(1);
            } else {
                out.push(TcbInput::Pkt(m));
                can_append_old = false;
                cur = None;
                le.uncompressed += 1;
                stats.uncompressed.incr(1);
            }
        }

        if !out.is_empty() {
            stats.direct_queue.incr(1);
            tcb.input_queue().extend(out);
        }

        if should_wake {
            stats.wokeup_queue.incr(1);
            tcb.do_queued_segments();
        }

        debug!(self.log, "queued to tcb";
            "flow" => %le.outer.data,
            "compressed" => le.compressed,
            "uncompressed" => le.uncompressed,
            "wake" => should_wake,
        );

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn batch_capacity() {
        let mut small = AckBatch::new(false);
        for i in 0..ACK_BATCH_SMALL {
            let ent = AckEnt { seq: i as u32, ..Default::default() };
            assert!(small.push(ent).is_ok());
        }
        assert!(small.is_full());
        assert!(small.push(AckEnt::default()).is_err());
        assert_eq!(small.as_slice()[3].seq, 3);

        let large = AckBatch::new(true);
        assert_eq!(large.capacity(), ACK_BATCH_LARGE);
        assert!(large.is_empty());
    }

    #[test]
    fn ack_entry_flags() {
        let mut m = Mbuf::from_vec(vec![0; 60]);
        m.flags |= MbufFlags::TSTMP_LRO;
        m.pkthdr.rcv_tstmp = 77;
        let info = TcpSegInfo {
            seq: 1,
            ack: 2,
            window: 3,
            flags: TcpFlags::ACK,
            opts: TcpOpts::Timestamp { val: 10, ecr: 20 },
            hdr_len: 32,
        };

        let (ok, other) = ack_valid(&m, &info);
        assert!(ok && !other);

        let ent = build_ack_entry(&m, &info, 0x2e);
        assert_eq!(ent.timestamp, 77);
        assert_eq!(ent.flags, 0x10 | ACK_TSTMP_LRO | ACK_HAS_TSTMP);
        assert_eq!((ent.ts_value, ent.ts_echo), (10, 20));
        assert_eq!(ent.codepoint, 0x2e);
    }

    #[test]
    fn data_and_sack_are_not_compressible() {
        let mut m = Mbuf::from_vec(vec![0; 60]);
        let mut info = TcpSegInfo {
            seq: 1,
            ack: 2,
            window: 3,
            flags: TcpFlags::ACK,
            opts: TcpOpts::Other,
            hdr_len: 32,
        };
        assert_eq!(ack_valid(&m, &info), (false, true));

        info.opts = TcpOpts::None;
        m.pkthdr.lro.tcp_d_len = 1;
        assert_eq!(ack_valid(&m, &info), (false, false));

        m.pkthdr.lro.tcp_d_len = 0;
        info.flags = TcpFlags::ACK | TcpFlags::FIN;
        assert_eq!(ack_valid(&m, &info), (false, false));

        info.flags = TcpFlags::ECE | TcpFlags::CWR | TcpFlags::ACK;
        assert_eq!(ack_valid(&m, &info), (true, false));
    }
}
