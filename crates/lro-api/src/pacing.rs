// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

use bitflags::bitflags;
use core::fmt;
use core::fmt::Display;
use serde::Deserialize;
use serde::Serialize;

bitflags! {
/// How the rate selector may round a requested pacing rate onto the
/// interface's table of hardware rates.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(transparent)]
pub struct RsPacing: u32 {
    /// Only a rate equal to the request is acceptable.
    const EXACT_MATCH = 1 << 0;
    /// The rate must be strictly greater than the request.
    const GT          = 1 << 1;
    /// The rate must be greater than or equal to the request.
    const GEQ         = 1 << 2;
    /// The rate must not exceed the request.
    const LT          = 1 << 3;
    /// When nothing qualifies, take the nearest extreme entry.
    const SUB_OK      = 1 << 4;
}
}

impl core::str::FromStr for RsPacing {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "exact" => Ok(Self::EXACT_MATCH),
            "gt" => Ok(Self::GT),
            "geq" | "ge" => Ok(Self::GEQ),
            "lt" | "le" => Ok(Self::LT),
            _ => Err(format!("invalid pacing policy: {s}")),
        }
    }
}

impl Display for RsPacing {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut names = vec![];
        for (name, _) in self.iter_names() {
            names.push(name);
        }

        if names.is_empty() {
            write!(f, "NONE")
        } else {
            write!(f, "{}", names.join("|"))
        }
    }
}

bitflags! {
/// The capabilities an interface reports when asked about hardware
/// rate limiting.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(transparent)]
pub struct RtCaps: u32 {
    /// The interface has its own fixed table of rates.
    const FIXED_TABLE = 1 << 0;
    /// The interface accepts any rate we ask for.
    const SELECTABLE  = 1 << 1;
    /// The interface claims rate limiting but cannot deliver it.
    const UNUSABLE    = 1 << 2;
    /// No rate limiting at all.
    const NOSUPPORT   = 1 << 3;
}
}

/// An interface's answer to a rate-limit capability query.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct RateLimitQuery {
    pub flags: RtCaps,
    /// Maximum simultaneous paced flows, zero for unlimited.
    pub max_flows: u64,
    pub number_of_rates: u32,
    pub min_segment_burst: u32,
    /// The interface's rates in bytes per second, for `FIXED_TABLE`.
    pub rate_table: Vec<u64>,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse_policy() {
        assert_eq!("GEQ".parse::<RsPacing>().unwrap(), RsPacing::GEQ);
        assert_eq!("lt".parse::<RsPacing>().unwrap(), RsPacing::LT);
        assert!("bogus".parse::<RsPacing>().is_err());
    }

    #[test]
    fn display_policy() {
        let p = RsPacing::GEQ | RsPacing::SUB_OK;
        assert_eq!(p.to_string(), "GEQ|SUB_OK");
        assert_eq!(RsPacing::empty().to_string(), "NONE");
    }
}
