// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! The IPv4 header.

use super::checksum::Checksum;
use super::checksum::HeaderChecksum;
use std::net::Ipv4Addr;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;
use zerocopy::Unaligned;

pub const IPV4_HDR_SZ: usize = 20;
pub const IPV4_VERSION: u8 = 4;

/// More-fragments flag and fragment offset mask over the
/// `frag_and_flags` field. The don't-fragment bit is allowed.
pub const IPV4_MF_OFFSET_MASK: u16 = 0x3FFF;

pub const IPPROTO_TCP: u8 = 6;
pub const IPPROTO_UDP: u8 = 17;

/// Note: For now we keep this unaligned to be safe.
#[repr(C)]
#[derive(
    Clone, Debug, FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned,
)]
pub struct Ipv4HdrRaw {
    pub ver_hdr_len: u8,
    pub dscp_ecn: u8,
    pub total_len: [u8; 2],
    pub ident: [u8; 2],
    pub frag_and_flags: [u8; 2],
    pub ttl: u8,
    pub proto: u8,
    pub csum: [u8; 2],
    pub src: [u8; 4],
    pub dst: [u8; 4],
}

impl Ipv4HdrRaw {
    pub fn version(&self) -> u8 {
        self.ver_hdr_len >> 4
    }

    /// Header length in bytes.
    pub fn hdr_len(&self) -> usize {
        usize::from(self.ver_hdr_len & 0x0F) * 4
    }

    pub fn total_len(&self) -> u16 {
        u16::from_be_bytes(self.total_len)
    }

    pub fn is_fragment(&self) -> bool {
        u16::from_be_bytes(self.frag_and_flags) & IPV4_MF_OFFSET_MASK != 0
    }

    pub fn src(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.src)
    }

    pub fn dst(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.dst)
    }

    /// Is the header checksum correct?
    pub fn csum_ok(&self) -> bool {
        Checksum::compute(self.as_bytes()).finalize() == 0xFFFF
    }

    /// Rewrite the total length, updating the header checksum
    /// incrementally from the old and new length only.
    pub fn set_total_len(&mut self, len: u16) {
        let mut csum = Checksum::from(HeaderChecksum::wrap(self.csum));
        csum.sub_bytes(&self.total_len);
        self.total_len = len.to_be_bytes();
        csum.add_bytes(&self.total_len);
        self.csum = HeaderChecksum::from(csum).bytes();
    }

    /// The pseudo-header sum for an upper-layer segment of `l4_len`
    /// bytes.
    pub fn pseudo_sum(&self, l4_len: u16) -> Checksum {
        let mut csum = Checksum::compute(&self.src);
        csum.add_bytes(&self.dst);
        csum.add_bytes(&[0, self.proto]);
        csum.add_u16(l4_len);
        csum
    }
}
