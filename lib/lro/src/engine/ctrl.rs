// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! The LRO engine instance.
//!
//! One [`LroCtrl`] serves one receive queue and is driven by one
//! thread at a time; every operation takes `&mut self`. Packets enter
//! through [`LroCtrl::rx`] or the batching [`LroCtrl::queue_mbuf`],
//! and leave through the owned [`LroStack`] when their flow is
//! flushed.

use super::checksum::Checksum;
use super::checksum::mbuf_sum;
use super::csum_update::pseudo_sum;
use super::flow_table::FlowTable;
use super::ip4::Ipv4HdrRaw;
use super::parse::LroParser;
use super::parse::MAX_HDR_LEN;
use super::parse::ParsedHeaders;
use super::parse::parse_frame;
use super::sort::LroMbufSort;
use super::stack::LroStack;
use super::stat::LroStats;
use super::stat::LroStatsSnap;
use super::tcp::TcpFlags;
use super::tcp::TcpSegInfo;
use super::tcp::seq_lt;
use super::udp::UdpHdrRaw;
use crate::ddi::kstat::KStatNamed;
use crate::ddi::mbuf::CsumFlags;
use crate::ddi::mbuf::Mbuf;
use crate::ddi::mbuf::MbufFlags;
use crate::ddi::time::Moment;
use alloc::vec::Vec;
use core::fmt;
use lro_api::LroCfg;
use lro_api::LroEntryDump;
use lro_api::LroError;
use slog::Logger;
use slog::debug;
use slog::o;
use slog::warn;
use zerocopy::FromBytes;

/// A packet the engine would not take.
///
/// The packet comes back to the caller, who should deliver it
/// unmodified, except when it failed checksum validation and was
/// dropped.
pub struct RxRejected {
    pub err: LroError,
    pub pkt: Option<Mbuf>,
}

impl RxRejected {
    fn new(err: LroError, pkt: Mbuf) -> Self {
        let pkt = if err == LroError::BadChecksum { None } else { Some(pkt) };
        Self { err, pkt }
    }
}

impl fmt::Debug for RxRejected {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("RxRejected")
            .field("err", &self.err)
            .field("pkt", &self.pkt.as_ref().map(Mbuf::len))
            .finish()
    }
}

/// Tracking of which CPU drives `flush_all`.
#[derive(Debug, Default)]
pub(super) struct CpuState {
    pub(super) cur: u32,
    last: Option<u32>,
    same_cnt: u32,
    is_set: bool,
}

impl CpuState {
    /// Record one pass on the current CPU. Returns true when this
    /// pass is the one that declared affinity.
    fn note(&mut self, thresh: u32) -> bool {
        if self.is_set {
            return false;
        }

        if self.last == Some(self.cur) {
            self.same_cnt += 1;
            if self.same_cnt > thresh {
                self.is_set = true;
                return true;
            }
        } else {
            self.last = Some(self.cur);
            self.same_cnt = 0;
        }

        false
    }

    /// The CPU this engine is bound to, once declared.
    pub(super) fn affinity(&self) -> Option<u32> {
        self.is_set.then_some(self.cur)
    }
}

pub struct LroCtrl<S: LroStack> {
    pub(super) cfg: LroCfg,
    pub(super) table: FlowTable,
    /// Packets waiting in the batch buffer.
    pub(super) mbuf_data: Vec<LroMbufSort>,
    pub(super) stack: S,
    pub(super) stats: KStatNamed<LroStats>,
    pub(super) log: Logger,
    /// Receive timestamps count nanoseconds from here.
    pub(super) base: Moment,
    pub(super) last_queue_time: Moment,
    pub(super) cpu: CpuState,
}

impl<S: LroStack> LroCtrl<S> {
    /// Create an engine delivering into `stack`.
    pub fn new(
        name: &str,
        cfg: LroCfg,
        stack: S,
        log: &Logger,
    ) -> Result<Self, LroError> {
        cfg.validate()?;
        let now = Moment::now();
        let log = log.new(o!("lro" => name.to_string()));

        debug!(log, "lro init";
            "entries" => cfg.entries,
            "mbufs" => cfg.mbufs,
        );

        Ok(Self {
            table: FlowTable::new(cfg.entries as usize),
            mbuf_data: Vec::with_capacity(cfg.mbufs as usize),
            stack,
            stats: KStatNamed::new("lro", name),
            log,
            base: now,
            last_queue_time: now,
            cpu: CpuState::default(),
            cfg,
        })
    }

    /// Tear the engine down, returning its stack.
    ///
    /// Packets still held by flow entries or waiting in the batch
    /// buffer are dropped; flush first to deliver them.
    pub fn free(mut self) -> S {
        let mut dropped = self.mbuf_data.len();

        for idx in self.table.active() {
            let le = self.table.remove(idx);
            dropped += le.pkts.len();
        }

        if dropped > 0 {
            debug!(self.log, "lro free"; "dropped" => dropped);
        }

        self.stack
    }

    pub fn cfg(&self) -> &LroCfg {
        &self.cfg
    }

    pub fn stack(&self) -> &S {
        &self.stack
    }

    pub fn stack_mut(&mut self) -> &mut S {
        &mut self.stack
    }

    pub fn stats(&self) -> LroStatsSnap {
        self.stats.snapshot()
    }

    /// Tell the engine which CPU it is running on.
    pub fn set_cpu(&mut self, cpu: u32) {
        self.cpu.cur = cpu;
    }

    pub fn num_active(&self) -> usize {
        self.table.num_active()
    }

    /// Packets waiting in the batch buffer.
    pub fn num_queued(&self) -> usize {
        self.mbuf_data.len()
    }

    pub fn dump(&self) -> Vec<LroEntryDump> {
        let now = Moment::now();
        self.table.iter_active().map(|le| le.dump(now)).collect()
    }

    pub(super) fn note_cpu(&mut self) {
        if self.cpu.note(self.cfg.cpu_set_thresh) {
            debug!(self.log, "cpu affinity set"; "cpu" => self.cpu.cur);
        }
    }

    /// Receive one packet.
    ///
    /// `csum`, when non-zero, is the NIC's one's complement sum over
    /// the TCP segment (header and payload, no pseudo-header), as a
    /// host integer: the segment's bytes summed as big-endian words.
    /// `pkthdr.csum_data` is read the same way.
    ///
    /// On error every active entry has already been flushed, so the
    /// caller may deliver the returned packet without reordering the
    /// stream.
    pub fn rx(&mut self, m: Mbuf, csum: u32) -> Result<(), RxRejected> {
        if !self.cfg.enabled {
            return Err(RxRejected::new(LroError::CannotProcess, m));
        }

        self.last_queue_time = Moment::now();
        let res = self.rx_common(m, csum, self.cfg.use_hash);

        if res.is_err() {
            self.flush_active();
        }

        res
    }

    fn count_err(&self, err: &LroError) {
        let stats = &self.stats.vals;
        match err {
            LroError::BadChecksum => stats.bad_csum.incr(1),
            LroError::NotSupported => stats.not_supported.incr(1),
            LroError::NoEntries => stats.no_entries.incr(1),
            _ => stats.cannot.incr(1),
        }
    }

    pub(super) fn rx_common(
        &mut self,
        m: Mbuf,
        csum: u32,
        use_hash: bool,
    ) -> Result<(), RxRejected> {
        self.rx_classify(m, csum, use_hash).map_err(|(err, m)| {
            self.count_err(&err);

            if err == LroError::BadChecksum {
                warn!(self.log, "bad checksum"; "len" => m.len());
            } else if err == LroError::NoEntries {
                warn!(self.log, "flow table full");
            }

            RxRejected::new(err, m)
        })
    }

    fn rx_classify(
        &mut self,
        mut m: Mbuf,
        csum: u32,
        use_hash: bool,
    ) -> Result<(), (LroError, Mbuf)> {
        let hdr_len = m.len().min(MAX_HDR_LEN);
        if !m.pullup(hdr_len) {
            return Err((LroError::CannotProcess, m));
        }

        let pa = match parse_frame(m.first(), &m.pkthdr, m.flags) {
            Ok(pa) => pa,
            Err(e) => return Err((e, m)),
        };

        // Strip Ethernet padding. A frame shorter than its IP length
        // is malformed.
        let frame_end = pa.outer.l3_end();
        if m.len() < frame_end || pa.tcp().l3_end() != frame_end {
            return Err((LroError::CannotProcess, m));
        }
        m.trim_to(frame_end);

        if let Err(e) = self.check_csum(&m, &pa, csum) {
            return Err((e, m));
        }

        if !m.flags.intersects(MbufFlags::TSTMP | MbufFlags::TSTMP_LRO) {
            m.pkthdr.rcv_tstmp = self.last_queue_time.delta_as_nanos(self.base);
            m.flags |= MbufFlags::TSTMP_LRO;
        }

        let tcp = *pa.tcp();
        let Some(info) = TcpSegInfo::read(&m.first()[tcp.l4_off..tcp.hdr_end])
        else {
            return Err((LroError::NotSupported, m));
        };

        if info.flags.contains(TcpFlags::SYN) {
            return Err((LroError::CannotProcess, m));
        }

        let d_len = frame_end - tcp.hdr_end;
        let d_csum = if d_len == 0 {
            0
        } else {
            data_sum(&m, &tcp, csum)
        };

        m.pkthdr.lro.tcp_d_csum = d_csum;
        m.pkthdr.lro.tcp_d_len = d_len as u32;
        m.pkthdr.lro.tcp_h_off = tcp.l4_off;
        m.pkthdr.lro.nsegs = 1;

        let bucket = if use_hash {
            let hash = if m.pkthdr.has_hash() {
                m.pkthdr.flowid
            } else {
                let inner = pa.inner.map(|p| p.data.hash_words()).unwrap_or(0);
                pa.outer.data.hash_words().wrapping_add(inner)
            };
            hash as usize % self.table.hashsz()
        } else {
            0
        };

        let inner_key = pa.inner.as_ref().map(|p| &p.data);
        if let Some(idx) = self.table.lookup(bucket, &pa.outer.data, inner_key)
        {
            let le = self.table.get_mut(idx);

            if d_len == 0 && seq_lt(info.ack, le.ack_seq) {
                self.stats.vals.stale_ack_drops += 1;
                return Ok(());
            }

            le.pkts.push_back(m);
            return Ok(());
        }

        let Some(idx) = self.table.alloc(bucket, &pa, self.last_queue_time)
        else {
            return Err((LroError::NoEntries, m));
        };

        debug!(self.log, "new entry"; "flow" => %tcp.data, "bucket" => bucket);
        let le = self.table.get_mut(idx);
        le.pkts.push_back(m);
        le.set_from_head();
        Ok(())
    }

    /// Validate checksums, trusting what the NIC already checked.
    fn check_csum(
        &self,
        m: &Mbuf,
        pa: &ParsedHeaders,
        csum: u32,
    ) -> Result<(), LroError> {
        let flags = m.pkthdr.csum_flags;
        let buf = m.first();

        if flags.contains(CsumFlags::IP_CHECKED)
            && !flags.contains(CsumFlags::IP_VALID)
        {
            return Err(LroError::BadChecksum);
        }

        // IPv4 headers the NIC did not check are cheap to check here.
        let levels = core::iter::once(&pa.outer).chain(&pa.inner);
        for (i, p) in levels.enumerate() {
            let nic_checked = i == 0 && flags.contains(CsumFlags::IP_CHECKED);
            if p.is_ipv6() || nic_checked {
                continue;
            }

            let ok = Ipv4HdrRaw::ref_from_prefix(&buf[p.l3_off..])
                .is_ok_and(|(ip, _)| ip.csum_ok());
            if !ok {
                return Err(LroError::BadChecksum);
            }
        }

        let tcp = pa.tcp();
        let l4_len = (tcp.l3_end() - tcp.l4_off) as u16;

        if csum != 0 {
            let mut sum =
                Checksum::from_host(csum) + pseudo_sum(buf, tcp, l4_len);
            return match sum.finalize() {
                0xFFFF => Ok(()),
                _ => Err(LroError::BadChecksum),
            };
        }

        if flags.contains(CsumFlags::DATA_VALID) {
            let mut sum = Checksum::from_host(u32::from(m.pkthdr.csum_data));
            if !flags.contains(CsumFlags::PSEUDO_HDR) {
                sum += pseudo_sum(buf, tcp, l4_len);
            }

            return match sum.finalize() {
                0xFFFF => Ok(()),
                _ => Err(LroError::BadChecksum),
            };
        }

        if !self.cfg.sw_csum {
            return Err(LroError::CannotProcess);
        }

        if !l4_sum_ok(m, buf, tcp) {
            return Err(LroError::BadChecksum);
        }

        // The tunnel's own checksum, when the sender computed one.
        if pa.inner.is_some() {
            let o = &pa.outer;
            let has_csum = UdpHdrRaw::ref_from_prefix(&buf[o.l4_off..])
                .is_ok_and(|(udp, _)| udp.has_csum());
            if has_csum && !l4_sum_ok(m, buf, o) {
                return Err(LroError::BadChecksum);
            }
        }

        Ok(())
    }
}

/// Verify the transport checksum of level `p` over the whole packet.
fn l4_sum_ok(m: &Mbuf, buf: &[u8], p: &LroParser) -> bool {
    let l4_len = p.l3_end() - p.l4_off;
    let mut sum =
        pseudo_sum(buf, p, l4_len as u16) + mbuf_sum(m, p.l4_off, l4_len);
    sum.finalize() == 0xFFFF
}

/// The sum of a segment's payload alone, derived without reading the
/// payload: the checksum (or the NIC's segment sum `csum`) less the
/// header and, for the checksum, the pseudo-header.
fn data_sum(m: &Mbuf, tcp: &LroParser, csum: u32) -> u16 {
    let buf = m.first();
    let hdr = &buf[tcp.l4_off..tcp.hdr_end];

    if csum != 0 {
        let mut sum = Checksum::from_host(csum);
        sum -= Checksum::compute(hdr);
        return sum.finalize();
    }

    let l4_len = (tcp.l3_end() - tcp.l4_off) as u16;
    let mut sum = pseudo_sum(buf, tcp, l4_len) + Checksum::compute(hdr);
    !sum.finalize()
}
