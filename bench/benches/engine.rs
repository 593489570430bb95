// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

use criterion::BatchSize;
use criterion::BenchmarkId;
use criterion::Criterion;
use criterion::Throughput;
use criterion::criterion_group;
use criterion::criterion_main;
use lro::api::LroCfg;
use lro::engine::LroCtrl;
use lro::engine::sort::lro_sort;
use lro::engine::stack::TcbFlags;
use lro_bench::MeasurementInfo;
use lro_bench::packet::AckStream;
use lro_bench::packet::BenchBurst;
use lro_bench::packet::BenchBurstInstance;
use lro_bench::packet::Bulk;
use lro_test_utils::mock::MockStack;
use lro_test_utils::mock::MockTcb;
use lro_test_utils::test_logger;
use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::hint::black_box;

fn engine(stack: MockStack) -> LroCtrl<MockStack> {
    LroCtrl::new("bench", LroCfg::default(), stack, &test_logger())
        .expect("default config is valid")
}

pub fn sort<M: MeasurementInfo + 'static>(c: &mut Criterion<M>) {
    let mut rng = StdRng::seed_from_u64(0x10c0);
    let mut c = c.benchmark_group(format!("sort/{}", M::label()));

    for n in [8usize, 64, 512, 4096] {
        // Few distinct hashes in the high bits, arrival index in the
        // low bits, as the batching path builds them.
        let keys: Vec<u64> = (0..n as u64)
            .map(|i| (rng.random_range(0..16u64) << 24) | i)
            .collect();

        c.throughput(Throughput::Elements(n as u64));
        c.bench_with_input(BenchmarkId::from_parameter(n), &keys, |b, k| {
            b.iter_batched_ref(
                || k.clone(),
                |k| lro_sort(black_box(k.as_mut_slice())),
                BatchSize::SmallInput,
            )
        });
    }
}

pub fn rx_flush<M: MeasurementInfo + 'static>(c: &mut Criterion<M>) {
    let mut c = c.benchmark_group(format!("rx/{}", M::label()));

    for case in Bulk.test_cases() {
        let mut lro = engine(MockStack::new());
        let name = format!("{}/{}", Bulk.burst_label(), case.instance_name());
        let frames = case.frames();
        c.throughput(Throughput::Elements(frames.len() as u64));

        c.bench_function(name, |b| {
            b.iter_batched(
                || case.mbufs(1),
                |mbufs| {
                    for m in mbufs {
                        let _ = lro.rx(black_box(m), 0);
                    }
                    lro.flush_all();
                    lro.stack_mut().delivered.clear();
                },
                BatchSize::SmallInput,
            )
        });
    }
}

pub fn queue_mbuf<M: MeasurementInfo + 'static>(c: &mut Criterion<M>) {
    let mut c = c.benchmark_group(format!("queue_mbuf/{}", M::label()));

    for case in Bulk.test_cases() {
        let mut lro = engine(MockStack::new());
        let name = format!("{}/{}", Bulk.burst_label(), case.instance_name());
        let flows = case.frames().len() / 32;
        c.throughput(Throughput::Elements(case.frames().len() as u64));

        c.bench_function(name, |b| {
            b.iter_batched(
                || case.mbufs(flows),
                |mbufs| {
                    for m in mbufs {
                        lro.queue_mbuf(black_box(m));
                    }
                    lro.flush_all();
                    lro.stack_mut().delivered.clear();
                },
                BatchSize::SmallInput,
            )
        });
    }
}

pub fn ack_compress<M: MeasurementInfo + 'static>(c: &mut Criterion<M>) {
    let mut c = c.benchmark_group(format!("ack_compress/{}", M::label()));

    for acks in [4, 32, 128] {
        let case = AckStream { acks };
        let key = AckStream::flow().key();
        let flags = TcbFlags::SUPPORTS_MBUFQ | TcbFlags::MBUF_ACKCMP;
        let stack = MockStack::new().with_tcb(key, MockTcb::new(flags));
        let mut lro = engine(stack);
        c.throughput(Throughput::Elements(acks as u64));

        c.bench_function(case.instance_name(), |b| {
            b.iter_batched(
                || case.mbufs(1),
                |mbufs| {
                    for m in mbufs {
                        lro.queue_mbuf(black_box(m));
                    }
                    lro.flush_all();
                    if let Some(tcb) = lro.stack_mut().tcbs.get_mut(&key) {
                        tcb.processed.clear();
                        tcb.queue.clear();
                    }
                },
                BatchSize::SmallInput,
            )
        });
    }
}

criterion_group!(engine_wall, sort, rx_flush, queue_mbuf, ack_compress);
criterion_main!(engine_wall);
