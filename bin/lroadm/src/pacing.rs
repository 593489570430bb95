// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Hardware rate selection against a described interface.

use lro::api::RateLimitQuery;
use lro::api::RateSetDump;
use lro::api::RlError;
use lro::api::RsPacing;
use lro::api::RtCaps;
use lro::ratelimit::PacingIfnet;
use lro::ratelimit::RateLimiter;
use lro::ratelimit::RlStatsSnap;
use lro::ratelimit::SendTag;
use lro::ratelimit::pacing_burst_size;
use lro::ratelimit::table::DESIRED_RATES;
use serde::Deserialize;
use serde::Serialize;
use slog::Logger;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

/// An interface's rate limiting capabilities, as written in a
/// capability file.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct IfnetSpec {
    pub ifindex: u32,
    #[serde(default)]
    pub dunit: u32,
    pub query: RateLimitQuery,
}

impl Default for IfnetSpec {
    /// A selectable interface with room for the canned rate table.
    fn default() -> Self {
        Self {
            ifindex: 1,
            dunit: 0,
            query: RateLimitQuery {
                flags: RtCaps::SELECTABLE,
                max_flows: 0,
                number_of_rates: DESIRED_RATES.len() as u32,
                min_segment_burst: 0,
                rate_table: vec![],
            },
        }
    }
}

/// A software interface answering as `spec` describes.
///
/// Tags are handed out freely, except that an interface with its own
/// table only accepts the rates in it.
#[derive(Debug)]
pub struct TableIfnet {
    spec: IfnetSpec,
    next_id: AtomicU64,
    live: AtomicU64,
}

impl TableIfnet {
    pub fn new(spec: IfnetSpec) -> Self {
        Self { spec, next_id: AtomicU64::new(1), live: AtomicU64::new(0) }
    }

    /// Tags allocated and not yet freed.
    pub fn live_tags(&self) -> u64 {
        self.live.load(Ordering::Relaxed)
    }

    fn rate_ok(&self, rate: u64) -> bool {
        let q = &self.spec.query;
        rate != 0
            && (!q.flags.contains(RtCaps::FIXED_TABLE)
                || q.rate_table.contains(&rate))
    }
}

impl PacingIfnet for TableIfnet {
    fn ifindex(&self) -> u32 {
        self.spec.ifindex
    }

    fn dunit(&self) -> u32 {
        self.spec.dunit
    }

    fn query_rates(&self) -> RateLimitQuery {
        self.spec.query.clone()
    }

    fn snd_tag_alloc(
        &self,
        rate: u64,
        _flowid: u32,
    ) -> Result<SendTag, RlError> {
        if !self.rate_ok(rate) {
            return Err(RlError::Inval);
        }

        self.live.fetch_add(1, Ordering::Relaxed);
        Ok(SendTag { id: self.next_id.fetch_add(1, Ordering::Relaxed), rate })
    }

    fn snd_tag_modify(
        &self,
        tag: &mut SendTag,
        rate: u64,
    ) -> Result<(), RlError> {
        if !self.rate_ok(rate) {
            return Err(RlError::Inval);
        }

        tag.rate = rate;
        Ok(())
    }

    fn snd_tag_free(&self, _tag: SendTag) {
        self.live.fetch_sub(1, Ordering::Relaxed);
    }
}

/// One pacing request.
#[derive(Clone, Copy, Debug)]
pub struct PacingReq {
    pub bytes_per_sec: u64,
    pub policy: RsPacing,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct Pick {
    pub rate: u64,
    /// The next lower valid rate, or zero.
    pub lower: u64,
    /// Microseconds between full-sized frames at `rate`.
    pub time_between: u32,
    /// Bytes per send burst for segments of the requested size.
    pub burst: u32,
}

#[derive(Debug, Serialize)]
pub struct SelectReport {
    /// Each request's outcome, in order.
    pub picks: Vec<Result<Pick, RlError>>,
    pub table: Option<RateSetDump>,
    pub stats: RlStatsSnap,
}

/// Attach one flow per request to the interface described by `spec`.
///
/// Every flow holds its rate until all requests are made, so flow
/// limits apply across the batch.
pub fn select(
    spec: IfnetSpec,
    reqs: &[PacingReq],
    segsiz: u32,
    log: &Logger,
) -> SelectReport {
    let rl = RateLimiter::new(log);
    let ifp: Arc<dyn PacingIfnet> = Arc::new(TableIfnet::new(spec));
    let mut leases = vec![];
    let mut picks = vec![];

    for (flowid, req) in reqs.iter().enumerate() {
        let res = rl.set_pacing_rate(
            &ifp,
            flowid as u32,
            req.bytes_per_sec,
            req.policy,
        );

        picks.push(res.map(|(lease, lower)| {
            let pick = Pick {
                rate: lease.rate(),
                lower,
                time_between: lease.time_between(),
                burst: pacing_burst_size(
                    req.bytes_per_sec,
                    segsiz,
                    false,
                    Some(&lease),
                ),
            };
            leases.push(lease);
            pick
        }));
    }

    let table = rl.dump().into_iter().next();
    drop(leases);
    rl.shutdown();

    SelectReport { picks, table, stats: rl.stats() }
}

#[cfg(test)]
mod test {
    use super::*;

    fn fixed(rates: &[u64], max_flows: u64) -> IfnetSpec {
        IfnetSpec {
            ifindex: 1,
            dunit: 0,
            query: RateLimitQuery {
                flags: RtCaps::FIXED_TABLE,
                max_flows,
                number_of_rates: rates.len() as u32,
                min_segment_burst: 0,
                rate_table: rates.to_vec(),
            },
        }
    }

    fn log() -> Logger {
        Logger::root(slog::Discard, slog::o!())
    }

    #[test]
    fn picks_in_order() {
        let reqs = [
            PacingReq { bytes_per_sec: 2_000_000, policy: RsPacing::GEQ },
            PacingReq { bytes_per_sec: 2_000_000, policy: RsPacing::LT },
            PacingReq { bytes_per_sec: 50_000_000, policy: RsPacing::GEQ },
        ];
        let report =
            select(fixed(&[1_000_000, 5_000_000], 0), &reqs, 1448, &log());

        assert_eq!(report.picks[0].as_ref().unwrap().rate, 5_000_000);
        assert_eq!(report.picks[0].as_ref().unwrap().lower, 1_000_000);
        assert_eq!(report.picks[1].as_ref().unwrap().rate, 1_000_000);
        assert_eq!(report.picks[2], Err(RlError::NoEnt));
        assert_eq!(report.table.unwrap().rates.len(), 2);
        assert_eq!(report.stats.sets_destroyed, 1);
        assert_eq!(report.stats.attach_ok, 2);
    }

    #[test]
    fn flow_limit_spans_requests() {
        let req = PacingReq { bytes_per_sec: 1, policy: RsPacing::GEQ };
        let report = select(fixed(&[1_000_000], 1), &[req, req], 1448, &log());
        assert!(report.picks[0].is_ok());
        assert_eq!(report.picks[1], Err(RlError::NoSpace));
    }

    #[test]
    fn default_spec_uses_canned_table() {
        let reqs = [PacingReq {
            bytes_per_sec: 180_499,
            policy: RsPacing::GEQ,
        }];
        let report = select(IfnetSpec::default(), &reqs, 1448, &log());
        let pick = report.picks[0].as_ref().unwrap();
        assert_eq!(pick.rate, 180_500);
        assert_eq!(pick.lower, 122_500);

        let table = report.table.unwrap();
        assert_eq!(table.rates.len(), DESIRED_RATES.len());
    }

    #[test]
    fn spec_from_toml() {
        let spec: IfnetSpec = toml::from_str(
            r#"
            ifindex = 3
            [query]
            flags = "SELECTABLE"
            max_flows = 0
            number_of_rates = 4
            min_segment_burst = 2
            rate_table = []
            "#,
        )
        .unwrap();
        assert_eq!(spec.ifindex, 3);
        assert_eq!(spec.query.flags, RtCaps::SELECTABLE);

        let ifp = TableIfnet::new(spec);
        let tag = ifp.snd_tag_alloc(7, 0).unwrap();
        assert_eq!(ifp.live_tags(), 1);
        ifp.snd_tag_free(tag);
        assert_eq!(ifp.live_tags(), 0);
    }
}
