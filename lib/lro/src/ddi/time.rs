// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Moments on the monotonic clock.

use core::ops::Add;
use core::time::Duration;
use std::time::Instant;

/// The number of milliseconds in a second.
pub const MILLIS: u64 = 1_000;
/// The number of microseconds in a second.
pub const MICROS: u64 = 1_000_000;
/// The number of nanoseconds in a second.
pub const NANOS: u64 = 1_000_000_000;

/// A moment in time, read from a monotonic clock.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub struct Moment {
    inner: Instant,
}

impl Add<Duration> for Moment {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self {
        Self { inner: self.inner + rhs }
    }
}

impl Moment {
    pub fn now() -> Self {
        Self { inner: Instant::now() }
    }

    /// The moment `d` before this one, if the clock reaches back
    /// that far.
    pub fn checked_sub(&self, d: Duration) -> Option<Self> {
        self.inner.checked_sub(d).map(|inner| Self { inner })
    }

    /// Milliseconds elapsed since `earlier`, or zero if `earlier` is
    /// actually later.
    pub fn delta_as_millis(&self, earlier: Moment) -> u64 {
        let d = self.inner.saturating_duration_since(earlier.inner);
        u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
    }

    /// Nanoseconds elapsed since `earlier`, saturating as above.
    pub fn delta_as_nanos(&self, earlier: Moment) -> u64 {
        let d = self.inner.saturating_duration_since(earlier.inner);
        u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
    }
}

impl Default for Moment {
    fn default() -> Self {
        Self::now()
    }
}
