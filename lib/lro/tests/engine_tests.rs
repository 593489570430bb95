// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Engine tests.
//!
//! Segments are built as complete frames, fed through an engine
//! delivering into a [`MockStack`], and what comes out is compared
//! byte for byte with the frame a sender would have produced had it
//! sent the merged payload as a single segment.

use common::frames::TH_ACK;
use common::frames::TH_PSH;
use common::frames::TH_SYN;
use common::frames::coalesce;
use common::frames::data_run;
use common::frames::fold;
use common::frames::ones_sum;
use common::frames::tcp_view;
use common::mock::MockStack;
use common::mock::MockTcb;
use common::mock::offloaded;
use common::mock::unverified;
use common::mock::with_hash;
use common::verify::outer_udp_csum_is_zero;
use common::verify::verify_frame;
use common::*;
use lro::api::LroCfg;
use lro::api::LroError;
use lro::ddi::mbuf::CsumFlags;
use lro::ddi::mbuf::Mbuf;
use lro::ddi::mbuf::MbufFlags;
use lro::ddi::time::Moment;
use lro::engine::LroCtrl;
use lro::engine::ack_compress::ACK_TSTMP_LRO;
use lro::engine::stack::TcbFlags;
use lro::engine::stack::TcbInput;
use lro_test_utils as common;
use std::time::Duration;

fn engine(cfg: LroCfg) -> LroCtrl<MockStack> {
    LroCtrl::new("test", cfg, MockStack::new(), &test_logger()).unwrap()
}

fn engine_with_tcb(flow: &FlowSpec, flags: TcbFlags) -> LroCtrl<MockStack> {
    let stack = MockStack::new().with_tcb(flow.key(), MockTcb::new(flags));
    LroCtrl::new("test", LroCfg::default(), stack, &test_logger()).unwrap()
}

fn rx_segs(
    lro: &mut LroCtrl<MockStack>,
    flow: &FlowSpec,
    segs: &[TcpSeg],
    mk: fn(&[u8]) -> Mbuf,
) {
    for seg in segs {
        lro.rx(mk(&build_frame(flow, seg)), 0).unwrap();
    }
}

fn delivered(lro: &LroCtrl<MockStack>) -> Vec<Vec<u8>> {
    lro.stack().delivered_bytes()
}

// Varied segment sizes, odd ones included, so payload lands at both
// even and odd offsets of the merged packet.
fn lens(n: usize) -> Vec<usize> {
    (0..n).map(|i| 100 + (i * 37) % 900).collect()
}

#[test]
fn merged_packet_matches_single_send() {
    for flow in [FlowSpec::v4(), FlowSpec::v6()] {
        for n in [1, 2, 8, 64] {
            for mk in [offloaded as fn(&[u8]) -> Mbuf, unverified] {
                let segs = data_run(1000, &lens(n));
                let mut lro = engine(LroCfg::default());
                rx_segs(&mut lro, &flow, &segs, mk);
                assert_eq!(lro.num_active(), 1);
                lro.flush_all();

                let out = delivered(&lro);
                assert_eq!(out.len(), 1, "flow {flow:?} n {n}");
                assert_eq!(out[0], build_frame(&flow, &coalesce(&segs)));
                verify_frame(&out[0]).unwrap();

                let m = &lro.stack().delivered[0];
                assert_eq!(m.pkthdr.lro.nsegs, n as u32);
                assert!(m.pkthdr.csum_flags.contains(
                    CsumFlags::DATA_VALID | CsumFlags::PSEUDO_HDR
                ));
                assert_eq!(m.pkthdr.csum_data, 0xFFFF);
                assert_eq!(lro.stats().queued, n as u64);
            }
        }
    }
}

#[test]
fn odd_length_payloads() {
    let flow = FlowSpec::v4();
    let segs = data_run(7, &[101, 57, 33, 1, 2, 999]);
    let mut lro = engine(LroCfg::default());
    rx_segs(&mut lro, &flow, &segs, unverified);
    lro.flush_active();

    let out = delivered(&lro);
    assert_eq!(out, vec![build_frame(&flow, &coalesce(&segs))]);
    verify_frame(&out[0]).unwrap();
}

#[test]
fn payload_order_preserved() {
    let flow = FlowSpec::v6();
    let segs = data_run(1000, &[100, 200, 50]);
    let mut lro = engine(LroCfg::default());
    rx_segs(&mut lro, &flow, &segs, offloaded);
    lro.flush_active();

    let out = delivered(&lro);
    assert_eq!(out.len(), 1);
    let view = tcp_view(&out[0]);
    assert_eq!(view.seq, 1000);
    let expected: Vec<u8> =
        segs.iter().flat_map(|s| s.payload.iter().copied()).collect();
    assert_eq!(view.payload, expected);
}

#[test]
fn data_then_pure_ack() {
    let flow = FlowSpec::v4();
    let segs = vec![
        TcpSeg::data(1000, &[0xAA; 100]),
        TcpSeg::data(1100, &[0xBB; 200]).with_flags(TH_ACK | TH_PSH),
        TcpSeg::ack(1300, 1300),
    ];
    let mut lro = engine(LroCfg::default());
    rx_segs(&mut lro, &flow, &segs, offloaded);
    assert_eq!(lro.dump()[0].pkts, 3);
    lro.flush_active();

    let out = delivered(&lro);
    assert_eq!(out.len(), 1);
    let view = tcp_view(&out[0]);
    assert_eq!(view.payload.len(), 300);
    assert_eq!(view.flags, TH_ACK | TH_PSH);
    assert_eq!(view.ack, 1300);
    assert_eq!(out[0], build_frame(&flow, &coalesce(&segs)));
    assert_eq!(lro.stats().queued, 3);
}

#[test]
fn window_update_merged() {
    let flow = FlowSpec::v4();
    let segs = vec![
        TcpSeg::data(1000, &[0x11; 100]).with_ack(500).with_window(1000),
        TcpSeg::ack(1100, 500).with_window(4000),
    ];
    let mut lro = engine(LroCfg::default());
    rx_segs(&mut lro, &flow, &segs, unverified);
    lro.flush_active();

    let out = delivered(&lro);
    assert_eq!(out.len(), 1);
    let view = tcp_view(&out[0]);
    assert_eq!(view.window, 4000);
    assert_eq!(view.ack, 500);
    assert_eq!(view.payload.len(), 100);
    assert_eq!(out[0], build_frame(&flow, &coalesce(&segs)));
    verify_frame(&out[0]).unwrap();
    assert_eq!(lro.stats().push_replace, 0);
}

// A window update which shrinks the window does not shrink the merged
// packet's.
#[test]
fn window_keeps_largest_for_same_ack() {
    let flow = FlowSpec::v6();
    let segs = vec![
        TcpSeg::data(1, &[0x22; 64]).with_ack(9).with_window(3000),
        TcpSeg::ack(65, 9).with_window(2000),
    ];
    let mut lro = engine(LroCfg::default());
    rx_segs(&mut lro, &flow, &segs, offloaded);
    lro.flush_active();

    let out = delivered(&lro);
    assert_eq!(out.len(), 1);
    assert_eq!(tcp_view(&out[0]).window, 3000);
    verify_frame(&out[0]).unwrap();
}

#[test]
fn duplicate_ack_delivered_alone() {
    let flow = FlowSpec::v4();
    let segs = vec![
        TcpSeg::data(1000, &[0x33; 100]).with_ack(500).with_window(1000),
        TcpSeg::ack(1100, 500).with_window(1000),
    ];
    let mut lro = engine(LroCfg::default());
    rx_segs(&mut lro, &flow, &segs, unverified);
    lro.flush_active();

    let out = delivered(&lro);
    assert_eq!(
        out,
        vec![build_frame(&flow, &segs[0]), build_frame(&flow, &segs[1])]
    );
    assert_eq!(lro.stats().push_replace, 1);
}

#[test]
fn timestamps_follow_last_segment() {
    let flow = FlowSpec::v4();
    let segs: Vec<TcpSeg> = data_run(50, &[300, 300, 301])
        .into_iter()
        .enumerate()
        .map(|(i, s)| s.with_ts(100 + i as u32, 9))
        .collect();
    let mut lro = engine(LroCfg::default());
    rx_segs(&mut lro, &flow, &segs, offloaded);
    lro.flush_active();

    let out = delivered(&lro);
    assert_eq!(out, vec![build_frame(&flow, &coalesce(&segs))]);
    assert_eq!(tcp_view(&out[0]).ts, Some((102, 9)));
}

#[test]
fn mixed_timestamp_presence_not_merged() {
    let flow = FlowSpec::v4();
    let mut segs = data_run(50, &[100, 100]);
    segs[1] = segs[1].clone().with_ts(1, 1);
    let mut lro = engine(LroCfg::default());
    rx_segs(&mut lro, &flow, &segs, offloaded);
    lro.flush_active();

    assert_eq!(delivered(&lro).len(), 2);
    assert_eq!(lro.stats().push_replace, 1);
}

#[test]
fn out_of_order_delivered_as_is() {
    let flow = FlowSpec::v4();
    let segs = vec![
        TcpSeg::data(1000, &[1; 100]),
        TcpSeg::data(1200, &[3; 100]),
        TcpSeg::data(1100, &[2; 100]),
    ];
    let mut lro = engine(LroCfg::default());
    rx_segs(&mut lro, &flow, &segs, offloaded);
    lro.flush_active();

    let out = delivered(&lro);
    let seqs: Vec<u32> = out.iter().map(|f| tcp_view(f).seq).collect();
    assert_eq!(seqs, vec![1000, 1200, 1100]);
    for (frame, seg) in out.iter().zip(&segs) {
        assert_eq!(*frame, build_frame(&flow, seg));
    }
    assert_eq!(lro.stats().push_replace, 2);
    assert_eq!(lro.stats().flushed, 1);
}

#[test]
fn one_entry_per_flow() {
    let a = FlowSpec::v4();
    let b = FlowSpec::v4().with_src_port(6000);
    let c = FlowSpec::v6();
    let segs = data_run(1, &[10, 20, 30]);

    let mut lro = engine(LroCfg::default());
    for seg in &segs {
        for flow in [&a, &b, &c] {
            lro.rx(offloaded(&build_frame(flow, seg)), 0).unwrap();
        }
    }
    assert_eq!(lro.num_active(), 3);

    let keys: Vec<_> = lro.dump().into_iter().map(|d| d.outer).collect();
    assert!(keys.contains(&a.key()));
    assert!(keys.contains(&b.key()));
    assert!(keys.contains(&c.key()));

    lro.flush_active();
    assert_eq!(lro.num_active(), 0);

    let out = delivered(&lro);
    assert_eq!(out.len(), 3);
    for flow in [&a, &b, &c] {
        assert!(out.contains(&build_frame(flow, &coalesce(&segs))));
    }
}

#[test]
fn flushing_nothing_is_harmless() {
    let mut lro = engine(LroCfg::default());
    lro.flush_all();
    lro.flush_active();
    lro.flush_all();
    lro.flush_inactive(Duration::ZERO);

    assert!(lro.stack().delivered.is_empty());
    let stats = lro.stats();
    assert_eq!(stats.flushed, 0);
    assert_eq!(stats.queued, 0);
}

#[test]
fn ethernet_padding_stripped() {
    let flow = FlowSpec::v4();
    let segs = data_run(500, &[2, 2]);
    let mut lro = engine(LroCfg::default());

    for seg in &segs {
        let mut frame = build_frame(&flow, seg);
        assert!(frame.len() < 60);
        frame.resize(60, 0);
        lro.rx(unverified(&frame), 0).unwrap();
    }
    lro.flush_active();

    assert_eq!(delivered(&lro), vec![build_frame(&flow, &coalesce(&segs))]);
}

#[test]
fn truncated_frame_refused() {
    let flow = FlowSpec::v4();
    let mut frame = build_frame(&flow, &TcpSeg::data(1, &[0; 40]));
    frame.pop();

    let mut lro = engine(LroCfg::default());
    let rej = lro.rx(offloaded(&frame), 0).unwrap_err();
    assert_eq!(rej.err, LroError::CannotProcess);
    assert_eq!(rej.pkt.unwrap().to_vec(), frame);
    assert_eq!(lro.stats().cannot, 1);
}

#[test]
fn non_ip_not_supported() {
    let mut frame = build_frame(&FlowSpec::v4(), &TcpSeg::data(1, b"x"));
    frame[12..14].copy_from_slice(&0x0806u16.to_be_bytes());

    let mut lro = engine(LroCfg::default());
    let rej = lro.rx(offloaded(&frame), 0).unwrap_err();
    assert_eq!(rej.err, LroError::NotSupported);
    assert!(rej.pkt.is_some());
    assert_eq!(lro.stats().not_supported, 1);
}

#[test]
fn syn_refused() {
    let flow = FlowSpec::v4();
    let frame = build_frame(&flow, &TcpSeg::ack(1, 0).with_flags(TH_SYN));
    let mut lro = engine(LroCfg::default());
    let rej = lro.rx(offloaded(&frame), 0).unwrap_err();
    assert_eq!(rej.err, LroError::CannotProcess);
    assert!(rej.pkt.is_some());
    assert_eq!(lro.num_active(), 0);
}

#[test]
fn error_flushes_held_packets_first() {
    let flow = FlowSpec::v4();
    let segs = data_run(1, &[10, 10]);
    let mut lro = engine(LroCfg::default());
    rx_segs(&mut lro, &flow, &segs, offloaded);

    let syn = build_frame(&flow, &TcpSeg::ack(1, 0).with_flags(TH_SYN));
    assert!(lro.rx(offloaded(&syn), 0).is_err());

    assert_eq!(lro.num_active(), 0);
    assert_eq!(delivered(&lro), vec![build_frame(&flow, &coalesce(&segs))]);
}

#[test]
fn bad_checksum_dropped() {
    let flow = FlowSpec::v6();
    let mut frame = build_frame(&flow, &TcpSeg::data(1, &[7; 64]));
    let last = frame.len() - 1;
    frame[last] ^= 0xFF;

    let mut lro = engine(LroCfg::default());
    let rej = lro.rx(unverified(&frame), 0).unwrap_err();
    assert_eq!(rej.err, LroError::BadChecksum);
    assert!(rej.pkt.is_none());
    assert_eq!(lro.stats().bad_csum, 1);
}

#[test]
fn bad_ipv4_header_checksum_dropped() {
    let flow = FlowSpec::v4();
    let mut frame = build_frame(&flow, &TcpSeg::data(1, &[7; 64]));
    // The TTL.
    frame[14 + 8] -= 1;

    let mut lro = engine(LroCfg::default());
    let rej = lro.rx(unverified(&frame), 0).unwrap_err();
    assert_eq!(rej.err, LroError::BadChecksum);
}

#[test]
fn nic_reported_bad_ip_header() {
    let flow = FlowSpec::v4();
    let frame = build_frame(&flow, &TcpSeg::data(1, &[7; 64]));
    let mut m = offloaded(&frame);
    m.pkthdr.csum_flags.remove(CsumFlags::IP_VALID);

    let mut lro = engine(LroCfg::default());
    assert_eq!(lro.rx(m, 0).unwrap_err().err, LroError::BadChecksum);
}

#[test]
fn no_software_checksum() {
    let flow = FlowSpec::v4();
    let frame = build_frame(&flow, &TcpSeg::data(1, &[7; 64]));
    let cfg = LroCfg { sw_csum: false, ..Default::default() };
    let mut lro = engine(cfg);

    let rej = lro.rx(unverified(&frame), 0).unwrap_err();
    assert_eq!(rej.err, LroError::CannotProcess);
    assert!(rej.pkt.is_some());
}

#[test]
fn nic_segment_sum() {
    let flow = FlowSpec::v4();
    let segs = data_run(1, &[33, 64]);
    let cfg = LroCfg { sw_csum: false, ..Default::default() };
    let mut lro = engine(cfg);

    for seg in &segs {
        let frame = build_frame(&flow, seg);
        let tcp_off = tcp_view(&frame).tcp_off;
        let sum = u32::from(fold(ones_sum(0, &frame[tcp_off..])));
        lro.rx(unverified(&frame), sum).unwrap();
    }
    lro.flush_active();

    assert_eq!(delivered(&lro), vec![build_frame(&flow, &coalesce(&segs))]);
}

// The NIC's sum reported through packet metadata, without the
// pseudo-header, rather than passed to `rx`.
#[test]
fn nic_segment_sum_in_metadata() {
    let flow = FlowSpec::v6();
    let segs = data_run(7, &[97, 250, 13]);
    let cfg = LroCfg { sw_csum: false, ..Default::default() };
    let mut lro = engine(cfg);

    for seg in &segs {
        let frame = build_frame(&flow, seg);
        let tcp_off = tcp_view(&frame).tcp_off;
        let sum = fold(ones_sum(0, &frame[tcp_off..]));

        let mut m = unverified(&frame);
        m.pkthdr.csum_flags = CsumFlags::DATA_VALID;
        m.pkthdr.csum_data = sum;
        lro.rx(m, 0).unwrap();
    }
    lro.flush_active();

    let out = delivered(&lro);
    assert_eq!(out, vec![build_frame(&flow, &coalesce(&segs))]);
    verify_frame(&out[0]).unwrap();
}

#[test]
fn nic_segment_sum_mismatch_dropped() {
    let flow = FlowSpec::v4();
    let frame = build_frame(&flow, &TcpSeg::data(1, &[3; 40]));
    let tcp_off = tcp_view(&frame).tcp_off;
    let sum = fold(ones_sum(0, &frame[tcp_off..]));
    let mut lro = engine(LroCfg::default());

    // The sum read in the wrong byte order must not pass.
    let bad = match sum.swap_bytes() {
        swapped if swapped != sum => swapped,
        _ => sum ^ 0x00FF,
    };
    let bad = u32::from(bad);
    let rej = lro.rx(unverified(&frame), bad).unwrap_err();
    assert_eq!(rej.err, LroError::BadChecksum);
    assert_eq!(lro.stats().bad_csum, 1);
}

#[test]
fn vlan_tagged() {
    let flow = FlowSpec::v4().with_vlan(7);
    let segs = data_run(90, &[100, 101, 102]);
    let mut lro = engine(LroCfg::default());
    rx_segs(&mut lro, &flow, &segs, unverified);
    assert_eq!(lro.dump()[0].outer.vlan_id, 7);
    lro.flush_active();

    let out = delivered(&lro);
    assert_eq!(out, vec![build_frame(&flow, &coalesce(&segs))]);
    verify_frame(&out[0]).unwrap();
}

#[test]
fn vxlan_without_outer_checksum() {
    let flow = FlowSpec::v4().with_vxlan(FlowSpec::v6(), 42);
    let segs = data_run(3, &[200, 301, 5]);
    let mut lro = engine(LroCfg::default());
    rx_segs(&mut lro, &flow, &segs, unverified);

    let dump = lro.dump();
    assert_eq!(dump.len(), 1);
    assert_eq!(dump[0].inner, Some(flow.key()));
    lro.flush_active();

    let out = delivered(&lro);
    assert_eq!(out, vec![build_frame(&flow, &coalesce(&segs))]);
    assert!(outer_udp_csum_is_zero(&out[0]));
    verify_frame(&out[0]).unwrap();
}

#[test]
fn vxlan_with_outer_checksum() {
    let flow =
        FlowSpec::v6().with_vxlan(FlowSpec::v4(), 0x00AB_CDEF).with_udp_csum();
    let segs = data_run(3, &[200, 301, 5, 1000]);
    let mut lro = engine(LroCfg::default());
    rx_segs(&mut lro, &flow, &segs, unverified);
    lro.flush_active();

    let out = delivered(&lro);
    assert_eq!(out, vec![build_frame(&flow, &coalesce(&segs))]);
    assert!(!outer_udp_csum_is_zero(&out[0]));
    verify_frame(&out[0]).unwrap();
}

#[test]
fn vxlan_distinct_vnis_distinct_entries() {
    let a = FlowSpec::v4().with_vxlan(FlowSpec::v4(), 1);
    let b = FlowSpec::v4().with_vxlan(FlowSpec::v4(), 2);
    let seg = TcpSeg::data(1, b"abc");

    let mut lro = engine(LroCfg::default());
    lro.rx(offloaded(&build_frame(&a, &seg)), 0).unwrap();
    lro.rx(offloaded(&build_frame(&b, &seg)), 0).unwrap();
    assert_eq!(lro.num_active(), 2);
}

#[test]
fn stale_ack_dropped() {
    let flow = FlowSpec::v4();
    let mut lro = engine(LroCfg::default());
    let head = TcpSeg::data(1000, &[1; 10]).with_ack(500);
    lro.rx(offloaded(&build_frame(&flow, &head)), 0).unwrap();
    lro.rx(offloaded(&build_frame(&flow, &TcpSeg::ack(1010, 400))), 0)
        .unwrap();

    assert_eq!(lro.stats().stale_ack_drops, 1);
    assert_eq!(lro.dump()[0].pkts, 1);

    lro.flush_active();
    assert_eq!(delivered(&lro), vec![build_frame(&flow, &head)]);
}

#[test]
fn segment_count_limit() {
    let flow = FlowSpec::v4();
    let segs = data_run(1, &[10; 5]);
    let cfg = LroCfg { ackcnt_lim: 2, ..Default::default() };
    let mut lro = engine(cfg);
    rx_segs(&mut lro, &flow, &segs, offloaded);
    lro.flush_active();

    let out = delivered(&lro);
    assert_eq!(out.len(), 3);
    assert_eq!(out[0], build_frame(&flow, &coalesce(&segs[0..2])));
    assert_eq!(out[1], build_frame(&flow, &coalesce(&segs[2..4])));
    assert_eq!(out[2], build_frame(&flow, &segs[4]));
}

#[test]
fn byte_limit() {
    let flow = FlowSpec::v6();
    let segs = data_run(1, &[600, 600, 600]);
    let cfg = LroCfg { length_lim: 1300, ..Default::default() };
    let mut lro = engine(cfg);
    rx_segs(&mut lro, &flow, &segs, offloaded);
    lro.flush_active();

    let out = delivered(&lro);
    assert_eq!(out.len(), 2);
    assert_eq!(tcp_view(&out[0]).payload.len(), 1200);
    assert_eq!(tcp_view(&out[1]).payload.len(), 600);
}

#[test]
fn merged_length_stays_representable() {
    let flow = FlowSpec::v4();
    let segs = data_run(1, &[1448; 50]);
    let mut lro = engine(LroCfg::default());
    rx_segs(&mut lro, &flow, &segs, offloaded);
    lro.flush_active();

    let out = delivered(&lro);
    assert!(out.len() > 1);
    for f in &out {
        assert!(f.len() - 14 <= usize::from(u16::MAX));
        verify_frame(f).unwrap();
    }
    let total: usize = out.iter().map(|f| tcp_view(f).payload.len()).sum();
    assert_eq!(total, 50 * 1448);
}

#[test]
fn pool_exhaustion() {
    let a = FlowSpec::v4();
    let b = FlowSpec::v4().with_src_port(9);
    let seg = TcpSeg::data(1, b"data");
    let cfg = LroCfg { entries: 1, ..Default::default() };
    let mut lro = engine(cfg);

    lro.rx(offloaded(&build_frame(&a, &seg)), 0).unwrap();
    let rej = lro.rx(offloaded(&build_frame(&b, &seg)), 0).unwrap_err();
    assert_eq!(rej.err, LroError::NoEntries);
    assert_eq!(rej.pkt.unwrap().to_vec(), build_frame(&b, &seg));

    // The held flow went out ahead of the refused packet.
    assert_eq!(delivered(&lro), vec![build_frame(&a, &seg)]);
    assert_eq!(lro.stats().no_entries, 1);
}

#[test]
fn disabled() {
    let cfg = LroCfg { enabled: false, ..Default::default() };
    let mut lro = engine(cfg);
    let frame = build_frame(&FlowSpec::v4(), &TcpSeg::data(1, b"x"));

    let rej = lro.rx(offloaded(&frame), 0).unwrap_err();
    assert_eq!(rej.err, LroError::CannotProcess);

    lro.queue_mbuf(offloaded(&frame));
    assert_eq!(lro.num_queued(), 0);
    assert_eq!(delivered(&lro), vec![frame]);
}

#[test]
fn inactive_flush_by_creation_time() {
    let flow = FlowSpec::v4();
    let mut lro = engine(LroCfg::default());
    let before = Moment::now().checked_sub(Duration::from_secs(1)).unwrap();
    rx_segs(&mut lro, &flow, &data_run(1, &[10]), offloaded);

    lro.flush_inactive_at(before);
    assert_eq!(lro.num_active(), 1);
    lro.flush_inactive(Duration::from_secs(3600));
    assert_eq!(lro.num_active(), 1);

    // Still receiving, but created before the cutoff.
    rx_segs(&mut lro, &flow, &data_run(11, &[10]), offloaded);
    lro.flush_inactive_at(Moment::now());
    assert_eq!(lro.num_active(), 0);
    assert_eq!(delivered(&lro).len(), 1);
}

#[test]
fn inactive_flush_default_timeout() {
    let flow = FlowSpec::v4();
    let mut lro = engine(LroCfg::default());
    rx_segs(&mut lro, &flow, &data_run(1, &[10]), offloaded);

    // No timeout configured.
    lro.flush_inactive_default();
    assert_eq!(lro.num_active(), 1);

    let cfg = LroCfg { inactive_timeout_us: 1, ..Default::default() };
    let mut lro = engine(cfg);
    rx_segs(&mut lro, &flow, &data_run(1, &[10]), offloaded);
    std::thread::sleep(Duration::from_millis(2));
    lro.flush_inactive_default();
    assert_eq!(lro.num_active(), 0);
}

#[test]
fn queue_mbuf_batches_by_stream() {
    let a = FlowSpec::v4();
    let b = FlowSpec::v6();
    let segs = data_run(1, &[100, 100]);
    let cfg = LroCfg { mbufs: 4, ..Default::default() };
    let mut lro = engine(cfg);

    // Interleaved arrivals; flow b hashes lower and goes first.
    lro.queue_mbuf(with_hash(offloaded(&build_frame(&a, &segs[0])), 20));
    lro.queue_mbuf(with_hash(offloaded(&build_frame(&b, &segs[0])), 10));
    lro.queue_mbuf(with_hash(offloaded(&build_frame(&a, &segs[1])), 20));
    assert_eq!(lro.num_queued(), 3);
    assert!(lro.stack().delivered.is_empty());

    lro.queue_mbuf(with_hash(offloaded(&build_frame(&b, &segs[1])), 10));
    assert_eq!(lro.num_queued(), 0);
    assert_eq!(lro.num_active(), 0);

    let out = delivered(&lro);
    assert_eq!(out, vec![
        build_frame(&b, &coalesce(&segs)),
        build_frame(&a, &coalesce(&segs)),
    ]);

    let m = &lro.stack().delivered[0];
    assert!(m.flags.contains(MbufFlags::TSTMP_LRO));
}

#[test]
fn queue_mbuf_passes_through_rejects() {
    let flow = FlowSpec::v4();
    let cfg = LroCfg { mbufs: 8, ..Default::default() };
    let mut lro = engine(cfg);
    let syn = build_frame(&flow, &TcpSeg::ack(1, 0).with_flags(TH_SYN));

    lro.queue_mbuf(offloaded(&syn));
    lro.flush_all();
    assert_eq!(delivered(&lro), vec![syn]);
    assert_eq!(lro.stats().queued, 1);
}

#[test]
fn queue_mbuf_without_buffer() {
    let cfg = LroCfg { mbufs: 0, ..Default::default() };
    let mut lro = engine(cfg);
    let frame = build_frame(&FlowSpec::v4(), &TcpSeg::data(1, b"x"));

    lro.queue_mbuf(offloaded(&frame));
    assert!(lro.stack().delivered.is_empty());
    assert_eq!(lro.stats().queue_mbuf_drops, 1);
}

#[test]
fn acks_compressed_into_one_batch() {
    let flow = FlowSpec::v4();
    let mut lro = engine_with_tcb(
        &flow,
        TcbFlags::SUPPORTS_MBUFQ | TcbFlags::MBUF_ACKCMP,
    );

    for ack in [100, 200, 300] {
        let f = build_frame(&flow, &TcpSeg::ack(1, ack));
        lro.rx(offloaded(&f), 0).unwrap();
    }
    lro.flush_active();

    assert!(lro.stack().delivered.is_empty());
    let tcb = lro.stack().tcb(&flow.key());
    assert_eq!(tcb.wakeups, 1);
    let batches = tcb.ack_batches();
    assert_eq!(batches.len(), 1);
    assert!(tcb.pkts().is_empty());

    let ents = batches[0].as_slice();
    assert_eq!(ents.len(), 3);
    let acks: Vec<u32> = ents.iter().map(|e| e.ack).collect();
    assert_eq!(acks, vec![100, 200, 300]);
    assert!(ents.iter().all(|e| e.flags & ACK_TSTMP_LRO != 0));

    let stats = lro.stats();
    assert_eq!(stats.compressed, 3);
    assert_eq!(stats.direct_queue, 1);
    assert_eq!(stats.wokeup_queue, 1);
}

#[test]
fn data_breaks_ack_batch() {
    let flow = FlowSpec::v6();
    let mut lro = engine_with_tcb(
        &flow,
        TcbFlags::SUPPORTS_MBUFQ | TcbFlags::MBUF_ACKCMP,
    );

    let segs = [
        TcpSeg::ack(1, 100),
        TcpSeg::data(1, b"payload").with_ack(100),
        TcpSeg::ack(8, 200),
    ];
    rx_segs(&mut lro, &flow, &segs, offloaded);
    lro.flush_active();

    let tcb = lro.stack().tcb(&flow.key());
    let kinds: Vec<bool> = tcb
        .input()
        .map(|i| matches!(i, TcbInput::Acks(_)))
        .collect();
    assert_eq!(kinds, vec![true, false, true]);
    assert_eq!(lro.stats().uncompressed, 1);
}

#[test]
fn acks_join_queued_batch() {
    let flow = FlowSpec::v4();
    let mut lro = engine_with_tcb(
        &flow,
        TcbFlags::SUPPORTS_MBUFQ
            | TcbFlags::MBUF_ACKCMP
            | TcbFlags::MBUF_QUEUE_READY,
    );

    for round in 0..2u32 {
        for i in 0..3 {
            let ack = 100 * (round * 3 + i + 1);
            let f = build_frame(&flow, &TcpSeg::ack(1, ack));
            lro.rx(offloaded(&f), 0).unwrap();
        }
        lro.flush_active();
    }

    let tcb = lro.stack().tcb(&flow.key());
    assert_eq!(tcb.wakeups, 0);
    assert_eq!(tcb.queue.len(), 1);
    assert_eq!(tcb.ack_batches()[0].len(), 6);
}

#[test]
fn sack_is_queued_whole_and_wakes() {
    let flow = FlowSpec::v4();
    let mut lro = engine_with_tcb(
        &flow,
        TcbFlags::SUPPORTS_MBUFQ
            | TcbFlags::MBUF_ACKCMP
            | TcbFlags::MBUF_QUEUE_READY,
    );

    let f = build_frame(&flow, &TcpSeg::ack(1, 100).with_sack(200, 300));
    lro.rx(offloaded(&f), 0).unwrap();
    lro.flush_active();

    let tcb = lro.stack().tcb(&flow.key());
    assert_eq!(tcb.wakeups, 1);
    assert_eq!(tcb.pkts().len(), 1);
    assert!(tcb.ack_batches().is_empty());
}

#[test]
fn direct_queue_strips_l2() {
    let flow = FlowSpec::v4();
    let mut lro = engine_with_tcb(&flow, TcbFlags::SUPPORTS_MBUFQ);
    let segs = data_run(1, &[10, 10]);
    rx_segs(&mut lro, &flow, &segs, offloaded);
    lro.flush_active();

    assert!(lro.stack().delivered.is_empty());
    let tcb = lro.stack().tcb(&flow.key());
    let pkts = tcb.pkts();
    assert_eq!(pkts.len(), 2);

    for (m, seg) in pkts.iter().zip(&segs) {
        assert!(m.flags.contains(MbufFlags::LRO_EHDRSTRP));
        assert_eq!(m.pkthdr.lro.etype, 0x0800);
        assert_eq!(m.to_vec()[..20], build_frame(&flow, seg)[14..34]);
    }
}

#[test]
fn closing_connection_takes_generic_input() {
    let flow = FlowSpec::v4();
    let mut lro = engine_with_tcb(
        &flow,
        TcbFlags::SUPPORTS_MBUFQ | TcbFlags::MBUF_ACKCMP | TcbFlags::DROPPED,
    );
    let segs = data_run(1, &[10, 10]);
    rx_segs(&mut lro, &flow, &segs, offloaded);
    lro.flush_active();

    assert_eq!(delivered(&lro), vec![build_frame(&flow, &coalesce(&segs))]);
    assert!(lro.stack().tcb(&flow.key()).queue.is_empty());
}

#[test]
fn vlan_flows_take_generic_input() {
    let flow = FlowSpec::v4().with_vlan(3);
    let mut lro = engine_with_tcb(
        &flow,
        TcbFlags::SUPPORTS_MBUFQ | TcbFlags::MBUF_ACKCMP,
    );
    rx_segs(&mut lro, &flow, &[TcpSeg::ack(1, 5)], offloaded);
    lro.flush_active();

    assert_eq!(delivered(&lro).len(), 1);
    assert!(lro.stack().tcb(&flow.key()).ack_batches().is_empty());
}

#[test]
fn cpu_affinity_follows_flush_passes() {
    let flow = FlowSpec::v4();
    let mut lro = engine_with_tcb(
        &flow,
        TcbFlags::SUPPORTS_MBUFQ | TcbFlags::MBUF_ACKCMP,
    );
    lro.set_cpu(3);

    for _ in 0..=lro.cfg().cpu_set_thresh + 1 {
        lro.flush_all();
    }

    rx_segs(&mut lro, &flow, &[TcpSeg::ack(1, 5)], offloaded);
    lro.flush_active();
    assert_eq!(lro.stack().tcb(&flow.key()).irq_cpu, Some(3));
}

#[test]
fn free_returns_stack() {
    let flow = FlowSpec::v4();
    let mut lro = engine(LroCfg::default());
    rx_segs(&mut lro, &flow, &data_run(1, &[10]), offloaded);

    let stack = lro.free();
    assert!(stack.delivered.is_empty());
}

#[test]
fn bad_config_refused() {
    let cfg = LroCfg { entries: 0, ..Default::default() };
    let res = LroCtrl::new("bad", cfg, MockStack::new(), &test_logger());
    assert!(matches!(res, Err(LroError::BadConfig(_))));
}
