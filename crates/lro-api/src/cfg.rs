// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

use crate::LroError;
use core::time::Duration;
use serde::Deserialize;
use serde::Serialize;

/// Default number of flow entries per engine.
pub const DEFAULT_LRO_ENTRIES: u32 = 8;

/// Default capacity of the `queue_mbuf` batch buffer.
pub const DEFAULT_LRO_MBUFS: u32 = 512;

/// Upper bound on segments merged into one packet.
pub const LRO_ACKCNT_MAX: u32 = 65535;

/// Upper bound on payload bytes merged into one packet.
pub const LRO_LENGTH_MAX: u32 = 65535;

/// The batch index occupies the low 24 bits of the sort key.
pub const LRO_MBUFS_MAX: u32 = 1 << 24;

/// Default number of consecutive same-CPU flush passes before an
/// engine is considered bound to that CPU.
pub const DEFAULT_CPU_SET_THRESH: u32 = 2;

/// Tunables for one LRO engine instance.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct LroCfg {
    /// Number of flow entries in the pool.
    pub entries: u32,

    /// Capacity of the deferred-input buffer used by `queue_mbuf`.
    pub mbufs: u32,

    /// Merge no more than this many segments into one packet.
    pub ackcnt_lim: u32,

    /// Merge no more than this many payload bytes into one packet.
    pub length_lim: u32,

    /// Inactivity timeout used by `flush_inactive_default`, in
    /// microseconds. Zero disables it.
    pub inactive_timeout_us: u64,

    pub cpu_set_thresh: u32,

    /// Whether LRO is enabled on the interface.
    pub enabled: bool,

    /// Verify checksums in software when the NIC reported nothing.
    pub sw_csum: bool,

    /// Pick the bucket from the NIC-supplied flow id when present.
    pub use_hash: bool,

    /// Whether any TCP stack accepts mbuf-queue delivery.
    pub mbufq_stacks: bool,
}

impl Default for LroCfg {
    fn default() -> Self {
        Self {
            entries: DEFAULT_LRO_ENTRIES,
            mbufs: DEFAULT_LRO_MBUFS,
            ackcnt_lim: LRO_ACKCNT_MAX,
            length_lim: LRO_LENGTH_MAX,
            inactive_timeout_us: 0,
            cpu_set_thresh: DEFAULT_CPU_SET_THRESH,
            enabled: true,
            sw_csum: true,
            use_hash: true,
            mbufq_stacks: true,
        }
    }
}

impl LroCfg {
    pub fn validate(&self) -> Result<(), LroError> {
        if self.entries == 0 {
            return Err(LroError::BadConfig("entries must be non-zero".into()));
        }

        if self.ackcnt_lim == 0 || self.length_lim == 0 {
            return Err(LroError::BadConfig(
                "ackcnt_lim and length_lim must be non-zero".into(),
            ));
        }

        if self.ackcnt_lim > LRO_ACKCNT_MAX || self.length_lim > LRO_LENGTH_MAX
        {
            return Err(LroError::BadConfig(format!(
                "limits may not exceed {LRO_ACKCNT_MAX}/{LRO_LENGTH_MAX}"
            )));
        }

        if self.mbufs > LRO_MBUFS_MAX {
            return Err(LroError::BadConfig(format!(
                "mbufs may not exceed {LRO_MBUFS_MAX}"
            )));
        }

        Ok(())
    }

    pub fn inactive_timeout(&self) -> Option<Duration> {
        match self.inactive_timeout_us {
            0 => None,
            us => Some(Duration::from_micros(us)),
        }
    }
}
