// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Captures written by `lroadm`, read back, and replayed.

use lro::api::LroCfg;
use lro_test_utils::FlowSpec;
use lro_test_utils::TcpSeg;
use lro_test_utils::build_frame;
use lro_test_utils::frames::coalesce;
use lro_test_utils::frames::data_run;
use lro_test_utils::test_logger;
use lro_test_utils::verify::verify_frame;
use lroadm::capture::PcapWriter;
use lroadm::capture::read_pcap;
use lroadm::replay::ReplayOpts;
use lroadm::replay::replay;

fn capture(frames: &[Vec<u8>]) -> Vec<u8> {
    let mut w = PcapWriter::new(vec![]).unwrap();
    for (i, f) in frames.iter().enumerate() {
        w.add(f, 1, i as u32).unwrap();
    }
    w.into_inner()
}

// Two flows with their segments interleaved on the wire.
fn interleaved() -> (Vec<Vec<u8>>, Vec<Vec<u8>>) {
    let a = FlowSpec::v4();
    let b = FlowSpec::v6().with_src_port(40000);
    let segs_a = data_run(1000, &[1448, 1448, 1448, 700]);
    let segs_b = data_run(5000, &[512, 513, 99]);

    let mut wire = vec![];
    for i in 0..segs_a.len().max(segs_b.len()) {
        if let Some(s) = segs_a.get(i) {
            wire.push(build_frame(&a, s));
        }
        if let Some(s) = segs_b.get(i) {
            wire.push(build_frame(&b, s));
        }
    }

    let mut expected = vec![
        build_frame(&a, &coalesce(&segs_a)),
        build_frame(&b, &coalesce(&segs_b)),
    ];
    expected.sort();
    (wire, expected)
}

fn replayed(wire: &[Vec<u8>], opts: &ReplayOpts) -> Vec<Vec<u8>> {
    let pcap = capture(wire);
    let frames: Vec<Vec<u8>> =
        read_pcap(&pcap).unwrap().into_iter().map(|f| f.data).collect();
    assert_eq!(frames, wire);

    let report =
        replay(LroCfg::default(), &frames, opts, &test_logger()).unwrap();
    assert_eq!(report.passed, 0);
    assert_eq!(report.dropped, 0);
    assert_eq!(report.peak_flows.len(), 2);

    let mut out = report.delivered;
    out.sort();
    out
}

#[test]
fn replay_merges_each_flow() {
    let (wire, expected) = interleaved();

    for offload in [false, true] {
        let opts = ReplayOpts { offload, ..Default::default() };
        let out = replayed(&wire, &opts);
        assert_eq!(out, expected, "offload {offload}");
        for pkt in &out {
            verify_frame(pkt).unwrap();
        }
    }
}

#[test]
fn replay_with_tight_bursts_delivers_every_byte() {
    let (wire, _) = interleaved();
    let opts = ReplayOpts { burst: 1, ..Default::default() };

    let pcap = capture(&wire);
    let frames: Vec<Vec<u8>> =
        read_pcap(&pcap).unwrap().into_iter().map(|f| f.data).collect();
    let report =
        replay(LroCfg::default(), &frames, &opts, &test_logger()).unwrap();

    // Flushing after every frame leaves nothing to merge.
    assert_eq!(report.delivered.len(), wire.len());
    let mut out = report.delivered;
    out.sort();
    let mut want = wire.clone();
    want.sort();
    assert_eq!(out, want);
}

#[test]
fn replayed_capture_round_trips_to_disk() {
    let (wire, expected) = interleaved();
    let dir = std::env::temp_dir().join(format!(
        "lroadm-test-{}",
        std::process::id()
    ));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("in.pcap");
    std::fs::write(&path, capture(&wire)).unwrap();

    let bytes = std::fs::read(&path).unwrap();
    let frames: Vec<Vec<u8>> =
        read_pcap(&bytes).unwrap().into_iter().map(|f| f.data).collect();
    let report = replay(
        LroCfg::default(),
        &frames,
        &ReplayOpts::default(),
        &test_logger(),
    )
    .unwrap();

    let mut out = report.delivered;
    out.sort();
    assert_eq!(out, expected);
    assert_eq!(report.stats.flushed, 2);

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn single_segment_untouched() {
    let flow = FlowSpec::v4();
    let frame = build_frame(&flow, &TcpSeg::data(1, &[7u8; 333]));
    let report = replay(
        LroCfg::default(),
        std::slice::from_ref(&frame),
        &ReplayOpts::default(),
        &test_logger(),
    )
    .unwrap();
    assert_eq!(report.delivered, vec![frame]);
}
