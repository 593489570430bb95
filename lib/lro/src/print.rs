// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Print statistics and table dumps in a human-friendly manner.
//!
//! These are shared by lroadm and the integration tests.

use crate::engine::stat::LroStatsSnap;
use crate::ratelimit::RlStatsSnap;
use lro_api::LroEntryDump;
use lro_api::RateSetDump;
use std::io::Write;
use tabwriter::TabWriter;

fn print_pairs_into(
    t: &mut impl Write,
    title: &str,
    pairs: &[(&'static str, u64)],
) -> std::io::Result<()> {
    writeln!(t, "{title}")?;
    write_hr(t)?;
    writeln!(t, "NAME\tVALUE")?;
    for (name, val) in pairs {
        writeln!(t, "{name}\t{val}")?;
    }
    Ok(())
}

/// Print an [`LroStatsSnap`].
pub fn print_lro_stats(snap: &LroStatsSnap) -> std::io::Result<()> {
    print_lro_stats_into(&mut std::io::stdout(), snap)
}

/// Print an [`LroStatsSnap`].
pub fn print_lro_stats_into(
    writer: &mut impl Write,
    snap: &LroStatsSnap,
) -> std::io::Result<()> {
    let mut t = TabWriter::new(writer);
    print_pairs_into(&mut t, "LRO Statistics", &snap.pairs())?;
    t.flush()
}

/// Print an [`RlStatsSnap`].
pub fn print_rl_stats_into(
    writer: &mut impl Write,
    snap: &RlStatsSnap,
) -> std::io::Result<()> {
    let mut t = TabWriter::new(writer);
    print_pairs_into(&mut t, "Rate Limiter Statistics", &snap.pairs())?;
    t.flush()
}

/// Print the active flows of an engine.
pub fn print_flows_into(
    writer: &mut impl Write,
    flows: &[LroEntryDump],
) -> std::io::Result<()> {
    let mut t = TabWriter::new(writer);

    writeln!(t, "Active Flows")?;
    write_hr(&mut t)?;
    writeln!(t, "FLOW\tINNER\tPKTS\tNEXT SEQ\tACK\tWIN\tTS\tAGE (ms)")?;
    for f in flows {
        let inner = match &f.inner {
            Some(k) => k.to_string(),
            None => "-".to_string(),
        };

        writeln!(
            t,
            "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
            f.outer,
            inner,
            f.pkts,
            f.next_seq,
            f.ack_seq,
            f.window,
            f.timestamp,
            f.age_ms,
        )?;
    }

    t.flush()
}

/// Print a rate set and its table.
pub fn print_rate_set_into(
    writer: &mut impl Write,
    rs: &RateSetDump,
) -> std::io::Result<()> {
    let mut t = TabWriter::new(writer);

    writeln!(
        t,
        "Interface {} (unit {}) {} flows {}/{}",
        rs.ifindex,
        rs.dunit,
        rs.flags,
        rs.flows_using,
        match rs.flow_limit {
            0 => "unlimited".to_string(),
            n => n.to_string(),
        },
    )?;
    write_hr(&mut t)?;
    writeln!(t, "IDX\tRATE (B/s)\tGAP (us)\tUSING\tENABLED")?;
    for (i, r) in rs.rates.iter().enumerate() {
        let mark = if i == rs.lowest_valid || i == rs.highest_valid {
            "*"
        } else {
            ""
        };
        writeln!(
            t,
            "{i}{mark}\t{}\t{}\t{}\t{}",
            r.rate, r.time_between, r.using, r.enabled
        )?;
    }

    t.flush()
}

/// Print a horizontal rule.
pub fn write_hr(t: &mut impl Write) -> std::io::Result<()> {
    writeln!(t, "{:-<70}", "")
}
