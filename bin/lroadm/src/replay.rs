// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Running captured traffic through an engine.

use crate::Error;
use lro::api::FlowKey;
use lro::api::LroCfg;
use lro::api::LroEntryDump;
use lro::ddi::mbuf::CsumFlags;
use lro::ddi::mbuf::HASHTYPE_OPAQUE;
use lro::ddi::mbuf::Mbuf;
use lro::engine::LroCtrl;
use lro::engine::stack::LroStack;
use lro::engine::stack::LroTcb;
use lro::engine::stack::TcbFlags;
use lro::engine::stack::TcbInput;
use lro::engine::stat::LroStatsSnap;
use slog::Logger;
use slog::debug;
use std::collections::VecDeque;

/// A control block type for stacks without direct delivery.
pub enum NoTcb {}

impl LroTcb for NoTcb {
    fn flags(&self) -> TcbFlags {
        match *self {}
    }

    fn set_flags(&mut self, _flags: TcbFlags) {
        match *self {}
    }

    fn irq_cpu(&self) -> Option<u32> {
        match *self {}
    }

    fn set_irq_cpu(&mut self, _cpu: u32) {
        match *self {}
    }

    fn input_queue(&mut self) -> &mut VecDeque<TcbInput> {
        match *self {}
    }

    fn do_queued_segments(&mut self) {
        match *self {}
    }
}

/// A stack which records every packet handed to it.
#[derive(Debug, Default)]
pub struct RecordingStack {
    pub delivered: Vec<Mbuf>,
}

impl LroStack for RecordingStack {
    type Tcb = NoTcb;

    fn if_input(&mut self, m: Mbuf) {
        self.delivered.push(m);
    }

    fn tcp_lookup(&mut self, _key: &FlowKey) -> Option<&mut NoTcb> {
        None
    }
}

/// How frames are presented to the engine.
#[derive(Clone, Debug, Default)]
pub struct ReplayOpts {
    /// Use the batching path instead of per-packet receive.
    pub batch: bool,

    /// Present frames as if the NIC had verified their checksums.
    pub offload: bool,

    /// Flush everything after this many frames, as an interrupt
    /// handler would at the end of each receive pass. Zero flushes
    /// only at the end of the capture.
    pub burst: usize,
}

impl ReplayOpts {
    fn mbuf(&self, frame: &[u8], idx: usize) -> Mbuf {
        let mut m = Mbuf::from_bytes(frame);

        if self.offload {
            m.pkthdr.csum_flags = CsumFlags::IP_CHECKED
                | CsumFlags::IP_VALID
                | CsumFlags::DATA_VALID
                | CsumFlags::PSEUDO_HDR;
            m.pkthdr.csum_data = 0xFFFF;
        }

        // A NIC would hash the flow; the frame's position will do to
        // keep batches stable.
        if self.batch {
            m.pkthdr.hashtype = HASHTYPE_OPAQUE;
            m.pkthdr.flowid = (idx % 8) as u32;
        }

        m
    }
}

pub struct ReplayReport {
    /// What the engine delivered, in delivery order.
    pub delivered: Vec<Vec<u8>>,
    /// Frames the engine declined and passed through untouched.
    pub passed: u64,
    /// Frames the engine dropped.
    pub dropped: u64,
    /// The flow table at its fullest point before a flush.
    pub peak_flows: Vec<LroEntryDump>,
    pub stats: LroStatsSnap,
}

/// Feed `frames` through a fresh engine configured by `cfg`.
pub fn replay(
    cfg: LroCfg,
    frames: &[Vec<u8>],
    opts: &ReplayOpts,
    log: &Logger,
) -> Result<ReplayReport, Error> {
    let mut lro = LroCtrl::new("replay", cfg, RecordingStack::default(), log)?;
    let mut passed = 0;
    let mut dropped = 0;
    let mut peak_flows = vec![];

    for (i, frame) in frames.iter().enumerate() {
        let m = opts.mbuf(frame, i);

        if opts.batch {
            lro.queue_mbuf(m);
        } else if let Err(rej) = lro.rx(m, 0) {
            debug!(log, "frame declined"; "idx" => i, "err" => %rej.err);

            match rej.pkt {
                Some(m) => {
                    passed += 1;
                    lro.stack_mut().if_input(m);
                }

                None => dropped += 1,
            }
        }

        if lro.num_active() > peak_flows.len() {
            peak_flows = lro.dump();
        }

        if opts.burst != 0 && (i + 1) % opts.burst == 0 {
            lro.flush_all();
        }
    }

    lro.flush_all();

    let stats = lro.stats();
    let stack = lro.free();
    debug!(log, "replay done";
        "frames" => frames.len(),
        "delivered" => stack.delivered.len(),
    );

    Ok(ReplayReport {
        delivered: stack.delivered.iter().map(Mbuf::to_vec).collect(),
        passed,
        dropped,
        peak_flows,
        stats,
    })
}
