// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Receive bursts to feed the engine.

use lro::ddi::mbuf::Mbuf;
use lro_test_utils::FlowSpec;
use lro_test_utils::TcpSeg;
use lro_test_utils::build_frame;
use lro_test_utils::frames::TH_ACK;
use lro_test_utils::frames::data_run;
use lro_test_utils::mock::offloaded;
use lro_test_utils::mock::unverified;
use lro_test_utils::mock::with_hash;

/// A family of related receive bursts to benchmark.
pub trait BenchBurst {
    /// Label the burst type in a human-friendly manner.
    fn burst_label(&self) -> String;

    /// Return a list of discrete scenarios.
    fn test_cases(&self) -> Vec<Box<dyn BenchBurstInstance>>;
}

/// One burst to time the engine against.
pub trait BenchBurstInstance {
    fn instance_name(&self) -> String;

    /// The frames of the burst, in arrival order.
    fn frames(&self) -> Vec<Vec<u8>>;

    /// Whether the NIC verified the frames' checksums.
    fn offloaded(&self) -> bool;

    /// Wrap the frames as received packets, with a NIC flow hash per
    /// flow.
    fn mbufs(&self, flows: usize) -> Vec<Mbuf> {
        let mk = if self.offloaded() { offloaded } else { unverified };
        self.frames()
            .iter()
            .enumerate()
            .map(|(i, f)| with_hash(mk(f), (i % flows.max(1)) as u32))
            .collect()
    }
}

/// Full-sized data segments from a number of interleaved flows.
pub struct Bulk;

impl BenchBurst for Bulk {
    fn burst_label(&self) -> String {
        "bulk".into()
    }

    fn test_cases(&self) -> Vec<Box<dyn BenchBurstInstance>> {
        let mut out: Vec<Box<dyn BenchBurstInstance>> = vec![];
        for v6 in [false, true] {
            for offload in [false, true] {
                for flows in [1, 8] {
                    out.push(Box::new(BulkInstance {
                        v6,
                        offload,
                        flows,
                        segs: 32,
                    }));
                }
            }
        }
        out
    }
}

#[derive(Clone, Copy, Debug)]
pub struct BulkInstance {
    pub v6: bool,
    pub offload: bool,
    pub flows: usize,
    pub segs: usize,
}

impl BulkInstance {
    pub fn flow(&self, i: usize) -> FlowSpec {
        let base = if self.v6 { FlowSpec::v6() } else { FlowSpec::v4() };
        base.with_src_port(20000 + i as u16)
    }
}

impl BenchBurstInstance for BulkInstance {
    fn instance_name(&self) -> String {
        format!(
            "{}-{}-{}flows",
            if self.v6 { "v6" } else { "v4" },
            if self.offload { "offload" } else { "sw-csum" },
            self.flows,
        )
    }

    fn frames(&self) -> Vec<Vec<u8>> {
        let runs: Vec<(FlowSpec, Vec<TcpSeg>)> = (0..self.flows)
            .map(|i| (self.flow(i), data_run(1, &vec![1448; self.segs])))
            .collect();

        let mut out = vec![];
        for n in 0..self.segs {
            for (flow, segs) in &runs {
                out.push(build_frame(flow, &segs[n]));
            }
        }
        out
    }

    fn offloaded(&self) -> bool {
        self.offload
    }
}

/// Pure ACKs with timestamps, as seen by a bulk sender.
#[derive(Clone, Copy, Debug)]
pub struct AckStream {
    pub acks: usize,
}

impl AckStream {
    pub fn flow() -> FlowSpec {
        FlowSpec::v4()
    }
}

impl BenchBurstInstance for AckStream {
    fn instance_name(&self) -> String {
        format!("{}acks", self.acks)
    }

    fn frames(&self) -> Vec<Vec<u8>> {
        let flow = Self::flow();
        (0..self.acks)
            .map(|i| {
                let ack = 1 + 1448 * (i as u32 + 1);
                let seg = TcpSeg::ack(1, ack)
                    .with_flags(TH_ACK)
                    .with_ts(100 + i as u32, 50);
                build_frame(&flow, &seg)
            })
            .collect()
    }

    fn offloaded(&self) -> bool {
        true
    }
}
