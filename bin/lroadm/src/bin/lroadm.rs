// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

use std::fs;
use std::fs::File;
use std::io;
use std::io::BufWriter;
use std::io::Write;
use std::path::PathBuf;

use clap::Parser;
use slog::Drain;
use slog::Logger;
use slog::info;

use lro::api::API_VERSION;
use lro::api::RsPacing;
use lro::print::print_flows_into;
use lro::print::print_lro_stats_into;
use lro::print::print_rate_set_into;
use lro::print::print_rl_stats_into;
use lro::print::write_hr;
use lroadm::capture::PcapWriter;
use lroadm::capture::read_pcap;
use lroadm::cfg_to_toml;
use lroadm::load_cfg;
use lroadm::load_toml;
use lroadm::pacing::IfnetSpec;
use lroadm::pacing::PacingReq;
use lroadm::replay::ReplayOpts;

/// Exercise the TCP large receive offload engine offline.
#[derive(Debug, Parser)]
#[command(version = lroadm_version())]
enum Command {
    /// Run a packet capture through the engine and report what it
    /// delivered.
    Replay {
        /// The capture to read.
        input: PathBuf,

        /// Engine configuration, in TOML.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Write the delivered packets to this capture.
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Queue frames for batched input instead of receiving them
        /// one at a time.
        #[arg(long)]
        batch: bool,

        /// Treat frames as checksum-verified by the NIC.
        #[arg(long)]
        offload: bool,

        /// Flush after every this many frames.
        #[arg(long, default_value_t = 0)]
        burst: usize,

        /// Print statistics as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Print the effective engine configuration.
    DumpConfig {
        #[arg(long)]
        config: Option<PathBuf>,

        #[arg(long)]
        json: bool,
    },

    /// Choose hardware pacing rates for a series of flows.
    SelectRate {
        /// A TOML file describing the interface's capabilities. Without
        /// one, the interface takes any rate and the canned table is
        /// used.
        #[arg(long)]
        table: Option<PathBuf>,

        /// One of exact, gt, geq, or lt.
        #[arg(long, default_value = "geq")]
        policy: RsPacing,

        /// Fall back to the nearest extreme rate when none qualifies.
        #[arg(long)]
        sub_ok: bool,

        /// Segment size used to compute send bursts.
        #[arg(long, default_value_t = 1448)]
        segsiz: u32,

        /// Requested rates in bytes per second, one flow each.
        #[arg(required = true)]
        rates: Vec<u64>,

        #[arg(long)]
        json: bool,
    },
}

fn lroadm_version() -> String {
    format!("{}.{API_VERSION}", env!("CARGO_PKG_VERSION"))
}

fn logger() -> Logger {
    let decorator = slog_term::TermDecorator::new().stderr().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_envlogger::new(drain);
    let drain = slog_async::Async::new(drain).build().fuse();
    Logger::root(drain, slog::o!())
}

fn main() -> anyhow::Result<()> {
    let cmd = Command::parse();
    let log = logger();
    let mut out = io::stdout().lock();

    match cmd {
        Command::Replay {
            input,
            config,
            out: pcap_out,
            batch,
            offload,
            burst,
            json,
        } => {
            let cfg = load_cfg(config.as_deref())?;
            let frames: Vec<Vec<u8>> = read_pcap(&fs::read(&input)?)?
                .into_iter()
                .map(|f| f.data)
                .collect();
            info!(log, "replaying";
                "frames" => frames.len(),
                "input" => %input.display(),
            );

            let opts = ReplayOpts { batch, offload, burst };
            let report = lroadm::replay::replay(cfg, &frames, &opts, &log)?;

            if let Some(path) = pcap_out {
                let file = BufWriter::new(File::create(&path)?);
                let mut w = PcapWriter::new(file)?;
                for (i, pkt) in report.delivered.iter().enumerate() {
                    w.add(pkt, 0, i as u32)?;
                }
                w.into_inner().flush()?;
            }

            if json {
                serde_json::to_writer_pretty(&mut out, &report.stats)?;
                writeln!(out)?;
                return Ok(());
            }

            writeln!(
                out,
                "{} frames in, {} packets out, {} passed, {} dropped",
                frames.len(),
                report.delivered.len(),
                report.passed,
                report.dropped,
            )?;
            write_hr(&mut out)?;
            print_lro_stats_into(&mut out, &report.stats)?;
            writeln!(out)?;
            print_flows_into(&mut out, &report.peak_flows)?;
        }

        Command::DumpConfig { config, json } => {
            let cfg = load_cfg(config.as_deref())?;
            if json {
                serde_json::to_writer_pretty(&mut out, &cfg)?;
                writeln!(out)?;
            } else {
                write!(out, "{}", cfg_to_toml(&cfg)?)?;
            }
        }

        Command::SelectRate {
            table,
            policy,
            sub_ok,
            segsiz,
            rates,
            json,
        } => {
            let spec: IfnetSpec = match table {
                Some(path) => load_toml(&path)?,
                None => IfnetSpec::default(),
            };
            let policy =
                if sub_ok { policy | RsPacing::SUB_OK } else { policy };
            let reqs: Vec<PacingReq> = rates
                .iter()
                .map(|&bytes_per_sec| PacingReq { bytes_per_sec, policy })
                .collect();

            let report = lroadm::pacing::select(spec, &reqs, segsiz, &log);

            if json {
                serde_json::to_writer_pretty(&mut out, &report)?;
                writeln!(out)?;
                return Ok(());
            }

            writeln!(
                out,
                "{:<16} {:<12} {:<16} {:<16} {:<8}",
                "WANT", "POLICY", "RATE", "LOWER", "BURST"
            )?;
            for (req, pick) in reqs.iter().zip(&report.picks) {
                match pick {
                    Ok(p) => writeln!(
                        out,
                        "{:<16} {:<12} {:<16} {:<16} {:<8}",
                        req.bytes_per_sec,
                        req.policy.to_string(),
                        p.rate,
                        p.lower,
                        p.burst
                    )?,
                    Err(e) => writeln!(
                        out,
                        "{:<16} {:<12} {e}",
                        req.bytes_per_sec,
                        req.policy.to_string()
                    )?,
                }
            }

            if let Some(table) = &report.table {
                writeln!(out)?;
                print_rate_set_into(&mut out, table)?;
            }
            writeln!(out)?;
            print_rl_stats_into(&mut out, &report.stats)?;
        }
    }

    Ok(())
}
