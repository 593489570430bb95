// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Types for calculating the internet checksum.
//!
//! The [`Checksum`] type is a rolling one's complement sum which can
//! be built up, incrementally updated, and finally folded into a
//! [`HeaderChecksum`]: the two bytes actually stored in a header.
//!
//! # Checksums and Endianness
//!
//! Header fields with a logical numeric value (an IP total length, a
//! TCP window) are stored big endian and converted on the host. The
//! checksum is not such a value. It is a pair of bytes which happens
//! to be computed by treating every pair of bytes in the summed data
//! as a 16-bit integer. No byte-order conversion is ever applied to
//! it: each pair of bytes, the checksum included, is read and written
//! with `{to,from}_ne_bytes()`. On a little-endian host this flips
//! every word, but the sum is flipped back when stored, which is RFC
//! 1071 §1.B.
//!
//! The same property is what lets the LRO engine splice a segment's
//! payload at an odd byte offset: the sum of data that starts on an
//! odd boundary is the byte-swap of its sum starting on an even one.
//!
//! # Relevant RFCs
//!
//! * 1071 Computing the Internet Checksum
//!
//! * 1141 Incremental Updating of the Internet Checksum
//!
//! * 1624 Computation of the Internet Checksum via Incremental Update

use crate::ddi::mbuf::Mbuf;

/// The checksum value as contained in a network header: the one's
/// complement of a one's complement sum.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct HeaderChecksum {
    inner: [u8; 2],
}

impl HeaderChecksum {
    /// Return the bytes of this header checksum.
    pub fn bytes(&self) -> [u8; 2] {
        self.inner
    }

    /// Wrap the checksum bytes of a header.
    ///
    /// The "wrap" verbiage makes clear these bytes are already in
    /// header form, i.e. complemented.
    pub fn wrap(hc: [u8; 2]) -> Self {
        Self { inner: hc }
    }
}

impl From<Checksum> for HeaderChecksum {
    /// Finalize the rolling checksum and put it into header form by
    /// performing one's complement.
    fn from(mut csum: Checksum) -> HeaderChecksum {
        Self { inner: (!csum.finalize()).to_ne_bytes() }
    }
}

/// A rolling one's complement checksum calculation.
///
/// Carries are kept in the upper half of the accumulator and only
/// summed back in when the value is finalized, or when the
/// accumulator would otherwise overflow.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Checksum {
    inner: u32,
}

impl Checksum {
    /// Creates a new checksum counter.
    pub fn new() -> Self {
        Self::from(0)
    }

    /// Update the sum by adding the contents of `bytes`.
    pub fn add_bytes(&mut self, bytes: &[u8]) {
        self.inner = csum_add(self.inner, bytes);
    }

    /// Create a new rolling checksum, starting with the passed in
    /// `bytes`.
    pub fn compute(bytes: &[u8]) -> Self {
        Self { inner: csum_add(0, bytes) }
    }

    /// Update the sum by subtracting the contents of `bytes`.
    ///
    /// This is useful for incrementally updating an existing checksum
    /// where only a portion of the bytes are being rewritten.
    pub fn sub_bytes(&mut self, bytes: &[u8]) {
        self.inner = csum_sub(self.inner, bytes);
    }

    /// Add a 16-bit field given by its host value, e.g. a length.
    pub fn add_u16(&mut self, val: u16) {
        self.add_bytes(&val.to_be_bytes());
    }

    /// Add a 32-bit field given by its host value.
    pub fn add_u32(&mut self, val: u32) {
        self.add_bytes(&val.to_be_bytes());
    }

    /// Finalize the sum by adding up all the accumulated carries and
    /// returning the resulting value as a `u16`.
    pub fn finalize(&mut self) -> u16 {
        self.inner = u32::from(fold(u64::from(self.inner)));
        self.inner as u16
    }

    /// A sum handed over as a host integer, the way a NIC reports it:
    /// the RFC 1071 sum of the data read as big-endian words.
    pub fn from_host(sum: u32) -> Self {
        Self { inner: u32::from(fold(u64::from(sum)).to_be()) }
    }

    /// The folded sum with its two bytes swapped.
    ///
    /// This is the contribution of the summed data had it started at
    /// an odd offset.
    pub fn swapped(mut self) -> Self {
        Self::from(u32::from(self.finalize().swap_bytes()))
    }
}

impl From<HeaderChecksum> for Checksum {
    // Convert a header's checksum bytes into a rolling checksum.
    fn from(hc: HeaderChecksum) -> Self {
        Self { inner: (!u16::from_ne_bytes(hc.bytes())) as u32 }
    }
}

impl From<u32> for Checksum {
    fn from(csum: u32) -> Self {
        Self { inner: csum }
    }
}

impl core::ops::Add for Checksum {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        let sum = u64::from(self.inner) + u64::from(other.inner);
        Self { inner: u32::from(fold(sum)) }
    }
}

impl core::ops::AddAssign for Checksum {
    fn add_assign(&mut self, other: Self) {
        *self = *self + other;
    }
}

impl core::ops::SubAssign for Checksum {
    fn sub_assign(&mut self, mut other: Self) {
        let other_bytes = other.finalize().to_ne_bytes();
        self.sub_bytes(&other_bytes);
    }
}

/// Fold a wide accumulator down to 16 bits with end-around carry.
fn fold(mut sum: u64) -> u16 {
    while (sum >> 16) != 0 {
        sum = (sum >> 16) + (sum & 0xFFFF);
    }

    sum as u16
}

fn csum_add(csum: u32, bytes: &[u8]) -> u32 {
    let mut sum = u64::from(csum);
    let mut words = bytes.chunks_exact(2);

    for w in &mut words {
        sum += u64::from(u16::from_ne_bytes([w[0], w[1]]));
    }

    // A trailing byte is summed as if padded with a zero byte.
    if let [b] = words.remainder() {
        sum += u64::from(u16::from_ne_bytes([*b, 0]));
    }

    u32::from(fold(sum))
}

fn csum_sub(csum: u32, bytes: &[u8]) -> u32 {
    let mut sum = u64::from(csum);
    let mut words = bytes.chunks_exact(2);

    for w in &mut words {
        sum += u64::from(!u16::from_ne_bytes([w[0], w[1]]));
    }

    if let [b] = words.remainder() {
        sum += u64::from(!u16::from_ne_bytes([*b, 0]));
    }

    u32::from(fold(sum))
}

/// Sum `len` bytes of `m` starting at `off`, following the segment
/// chain. Segments of odd length shift the alignment of everything
/// after them, which is accounted for by byte-swapping.
pub fn mbuf_sum(m: &Mbuf, mut off: usize, mut len: usize) -> Checksum {
    let mut total = Checksum::new();
    let mut odd = false;

    for seg in m.segs() {
        if len == 0 {
            break;
        }

        if off >= seg.len() {
            off -= seg.len();
            continue;
        }

        let end = seg.len().min(off + len);
        let chunk = &seg[off..end];
        let part = Checksum::compute(chunk);
        total += if odd { part.swapped() } else { part };

        if chunk.len() % 2 == 1 {
            odd = !odd;
        }

        len -= chunk.len();
        off = 0;
    }

    total
}
