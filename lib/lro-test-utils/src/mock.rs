// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Stand-ins for the network stack, TCP connections, and pacing-capable
//! interfaces.

use lro::ddi::mbuf::CsumFlags;
use lro::ddi::mbuf::HASHTYPE_OPAQUE;
use lro::ddi::mbuf::Mbuf;
use lro::engine::ack_compress::AckBatch;
use lro::engine::stack::LroStack;
use lro::engine::stack::LroTcb;
use lro::engine::stack::TcbFlags;
use lro::engine::stack::TcbInput;
use lro::ratelimit::PacingIfnet;
use lro::ratelimit::SendTag;
use lro_api::FlowKey;
use lro_api::RateLimitQuery;
use lro_api::RlError;
use lro_api::RtCaps;
use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Barrier;
use std::sync::Mutex;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

/// A received packet whose checksums the NIC has verified.
pub fn offloaded(frame: &[u8]) -> Mbuf {
    let mut m = Mbuf::from_bytes(frame);
    m.pkthdr.csum_flags = CsumFlags::IP_CHECKED
        | CsumFlags::IP_VALID
        | CsumFlags::DATA_VALID
        | CsumFlags::PSEUDO_HDR;
    m.pkthdr.csum_data = 0xFFFF;
    m
}

/// A received packet with no offload results at all.
pub fn unverified(frame: &[u8]) -> Mbuf {
    Mbuf::from_bytes(frame)
}

/// Give `m` an opaque NIC flow hash.
pub fn with_hash(mut m: Mbuf, flowid: u32) -> Mbuf {
    m.pkthdr.flowid = flowid;
    m.pkthdr.hashtype = HASHTYPE_OPAQUE;
    m
}

#[derive(Debug, Default)]
pub struct MockTcb {
    pub flags: TcbFlags,
    pub irq_cpu: Option<u32>,
    pub queue: VecDeque<TcbInput>,
    /// Input taken off the queue by wakeups, in order.
    pub processed: Vec<TcbInput>,
    pub wakeups: u32,
    pub early_wake: bool,
}

impl MockTcb {
    pub fn new(flags: TcbFlags) -> Self {
        Self { flags, ..Default::default() }
    }

    /// Everything queued to the connection so far, processed or not.
    pub fn input(&self) -> impl Iterator<Item = &TcbInput> {
        self.processed.iter().chain(self.queue.iter())
    }

    pub fn ack_batches(&self) -> Vec<&AckBatch> {
        self.input()
            .filter_map(|i| match i {
                TcbInput::Acks(b) => Some(b),
                TcbInput::Pkt(_) => None,
            })
            .collect()
    }

    pub fn pkts(&self) -> Vec<&Mbuf> {
        self.input()
            .filter_map(|i| match i {
                TcbInput::Pkt(m) => Some(m),
                TcbInput::Acks(_) => None,
            })
            .collect()
    }
}

impl LroTcb for MockTcb {
    fn flags(&self) -> TcbFlags {
        self.flags
    }

    fn set_flags(&mut self, flags: TcbFlags) {
        self.flags = flags;
    }

    fn irq_cpu(&self) -> Option<u32> {
        self.irq_cpu
    }

    fn set_irq_cpu(&mut self, cpu: u32) {
        self.irq_cpu = Some(cpu);
    }

    fn input_queue(&mut self) -> &mut VecDeque<TcbInput> {
        &mut self.queue
    }

    fn do_queued_segments(&mut self) {
        self.wakeups += 1;
        self.processed.extend(self.queue.drain(..));
    }

    fn early_wake_check(&self) -> bool {
        self.early_wake
    }
}

/// A network stack recording what it is handed.
#[derive(Debug, Default)]
pub struct MockStack {
    /// Packets delivered through generic input.
    pub delivered: Vec<Mbuf>,
    pub tcbs: HashMap<FlowKey, MockTcb>,
}

impl MockStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tcb(mut self, key: FlowKey, tcb: MockTcb) -> Self {
        self.tcbs.insert(key, tcb);
        self
    }

    pub fn tcb(&self, key: &FlowKey) -> &MockTcb {
        &self.tcbs[key]
    }

    /// The bytes of every delivered packet.
    pub fn delivered_bytes(&self) -> Vec<Vec<u8>> {
        self.delivered.iter().map(Mbuf::to_vec).collect()
    }
}

impl LroStack for MockStack {
    type Tcb = MockTcb;

    fn if_input(&mut self, m: Mbuf) {
        self.delivered.push(m);
    }

    fn tcp_lookup(&mut self, key: &FlowKey) -> Option<&mut MockTcb> {
        self.tcbs.get_mut(key)
    }
}

/// An interface with a scripted rate limiting capability.
#[derive(Debug)]
pub struct MockIfnet {
    pub ifindex: u32,
    pub query: RateLimitQuery,
    next_id: AtomicU64,
    allocated: AtomicU64,
    freed: AtomicU64,
    modified: AtomicU64,
    /// Refuse tags for these rates.
    fail_rates: Mutex<Vec<u64>>,
    /// Refuse every further tag allocation.
    pub fail_all: AtomicBool,
    /// When set, `query_rates` meets the gate once on entry and once
    /// more before returning.
    query_gate: Mutex<Option<Arc<Barrier>>>,
}

impl MockIfnet {
    pub fn new(ifindex: u32, query: RateLimitQuery) -> Arc<Self> {
        Arc::new(Self {
            ifindex,
            query,
            next_id: AtomicU64::new(1),
            allocated: AtomicU64::new(0),
            freed: AtomicU64::new(0),
            modified: AtomicU64::new(0),
            fail_rates: Mutex::new(vec![]),
            fail_all: AtomicBool::new(false),
            query_gate: Mutex::new(None),
        })
    }

    /// An interface with its own table of rates.
    pub fn fixed(ifindex: u32, rates: &[u64], max_flows: u64) -> Arc<Self> {
        Self::new(
            ifindex,
            RateLimitQuery {
                flags: RtCaps::FIXED_TABLE,
                max_flows,
                number_of_rates: rates.len() as u32,
                min_segment_burst: 0,
                rate_table: rates.to_vec(),
            },
        )
    }

    /// An interface accepting any `n` rates.
    pub fn selectable(ifindex: u32, n: u32) -> Arc<Self> {
        Self::new(
            ifindex,
            RateLimitQuery {
                flags: RtCaps::SELECTABLE,
                number_of_rates: n,
                ..Default::default()
            },
        )
    }

    pub fn with_caps(ifindex: u32, flags: RtCaps) -> Arc<Self> {
        Self::new(ifindex, RateLimitQuery { flags, ..Default::default() })
    }

    /// Park the next callers of `query_rates` on `gate`.
    pub fn gate_query(&self, gate: Arc<Barrier>) {
        *self.query_gate.lock().unwrap() = Some(gate);
    }

    pub fn fail_rate(&self, rate: u64) {
        self.fail_rates.lock().unwrap().push(rate);
    }

    pub fn allocated(&self) -> u64 {
        self.allocated.load(Ordering::SeqCst)
    }

    pub fn freed(&self) -> u64 {
        self.freed.load(Ordering::SeqCst)
    }

    pub fn modified(&self) -> u64 {
        self.modified.load(Ordering::SeqCst)
    }

    /// Tags allocated and not yet freed.
    pub fn live_tags(&self) -> u64 {
        self.allocated() - self.freed()
    }
}

impl PacingIfnet for MockIfnet {
    fn ifindex(&self) -> u32 {
        self.ifindex
    }

    fn query_rates(&self) -> RateLimitQuery {
        let gate = self.query_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.wait();
            gate.wait();
        }
        self.query.clone()
    }

    fn snd_tag_alloc(
        &self,
        rate: u64,
        _flowid: u32,
    ) -> Result<SendTag, RlError> {
        if self.fail_all.load(Ordering::SeqCst)
            || self.fail_rates.lock().unwrap().contains(&rate)
        {
            return Err(RlError::NoMem);
        }

        self.allocated.fetch_add(1, Ordering::SeqCst);
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        Ok(SendTag { id, rate })
    }

    fn snd_tag_modify(
        &self,
        tag: &mut SendTag,
        rate: u64,
    ) -> Result<(), RlError> {
        self.modified.fetch_add(1, Ordering::SeqCst);
        tag.rate = rate;
        Ok(())
    }

    fn snd_tag_free(&self, _tag: SendTag) {
        self.freed.fetch_add(1, Ordering::SeqCst);
    }
}
