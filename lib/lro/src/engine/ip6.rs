// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! The IPv6 fixed header.

use super::checksum::Checksum;
use std::net::Ipv6Addr;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;
use zerocopy::Unaligned;

pub const IPV6_HDR_SZ: usize = 40;
pub const IPV6_VERSION: u8 = 6;

#[repr(C)]
#[derive(
    Clone, Debug, FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned,
)]
pub struct Ipv6HdrRaw {
    pub vsn_class_flow: [u8; 4],
    pub payload_len: [u8; 2],
    pub next_hdr: u8,
    pub hop_limit: u8,
    pub src: [u8; 16],
    pub dst: [u8; 16],
}

impl Ipv6HdrRaw {
    pub fn version(&self) -> u8 {
        self.vsn_class_flow[0] >> 4
    }

    pub fn traffic_class(&self) -> u8 {
        (self.vsn_class_flow[0] << 4) | (self.vsn_class_flow[1] >> 4)
    }

    pub fn payload_len(&self) -> u16 {
        u16::from_be_bytes(self.payload_len)
    }

    pub fn set_payload_len(&mut self, len: u16) {
        self.payload_len = len.to_be_bytes();
    }

    pub fn src(&self) -> Ipv6Addr {
        Ipv6Addr::from(self.src)
    }

    pub fn dst(&self) -> Ipv6Addr {
        Ipv6Addr::from(self.dst)
    }

    /// The pseudo-header sum for an upper-layer segment of `l4_len`
    /// bytes. No extension headers are ever present, so the
    /// upper-layer protocol is `next_hdr`.
    pub fn pseudo_sum(&self, l4_len: u16) -> Checksum {
        let mut csum = Checksum::compute(&self.src);
        csum.add_bytes(&self.dst);
        csum.add_u32(u32::from(l4_len));
        csum.add_bytes(&[0, 0, 0, self.next_hdr]);
        csum
    }
}
