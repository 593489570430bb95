// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! The TCP header, its flags, and the one option layout LRO can merge.

use super::checksum::Checksum;
use bitflags::bitflags;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;
use zerocopy::Unaligned;

pub const TCP_HDR_SZ: usize = 20;
pub const TCP_HDR_OFFSET_MASK: u8 = 0xF0;
pub const TCP_HDR_OFFSET_SHIFT: u8 = 4;

/// Option length of NOP, NOP, TIMESTAMP: the layout every major stack
/// sends and the only one that can be merged.
pub const TCPOLEN_TSTAMP_APPA: usize = 12;

/// The first option word of that layout: NOP, NOP, kind 8, length 10.
pub const TCP_TS_OPTION_HDR: u32 = 0x0101_080A;

bitflags! {
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct TcpFlags: u8 {
    const FIN = 1 << 0;
    const SYN = 1 << 1;
    const RST = 1 << 2;
    const PSH = 1 << 3;
    const ACK = 1 << 4;
    const URG = 1 << 5;
    const ECE = 1 << 6;
    const CWR = 1 << 7;
}
}

impl TcpFlags {
    /// Flags a segment may carry and still be merged.
    pub const MERGEABLE: Self = Self::ACK.union(Self::PSH);

    /// Flags a pure ACK may carry and still be compressed.
    pub const COMPRESSIBLE: Self = Self::ACK
        .union(Self::PSH)
        .union(Self::ECE)
        .union(Self::CWR);
}

#[repr(C)]
#[derive(
    Clone, Debug, FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned,
)]
pub struct TcpHdrRaw {
    pub src_port: [u8; 2],
    pub dst_port: [u8; 2],
    pub seq: [u8; 4],
    pub ack: [u8; 4],
    pub offset: u8,
    pub flags: u8,
    pub window: [u8; 2],
    pub csum: [u8; 2],
    pub urg: [u8; 2],
}

impl TcpHdrRaw {
    pub fn src_port(&self) -> u16 {
        u16::from_be_bytes(self.src_port)
    }

    pub fn dst_port(&self) -> u16 {
        u16::from_be_bytes(self.dst_port)
    }

    pub fn seq(&self) -> u32 {
        u32::from_be_bytes(self.seq)
    }

    pub fn ack(&self) -> u32 {
        u32::from_be_bytes(self.ack)
    }

    /// Header length in bytes, options included.
    pub fn hdr_len(&self) -> usize {
        usize::from((self.offset & TCP_HDR_OFFSET_MASK) >> TCP_HDR_OFFSET_SHIFT)
            * 4
    }

    pub fn flags(&self) -> TcpFlags {
        TcpFlags::from_bits_retain(self.flags)
    }

    pub fn window(&self) -> u16 {
        u16::from_be_bytes(self.window)
    }
}

/// What the option bytes of a segment amount to.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TcpOpts {
    None,
    Timestamp { val: u32, ecr: u32 },
    /// Anything else: SACK blocks, a timestamp in a different layout,
    /// window scale, and so on.
    Other,
}

impl TcpOpts {
    pub fn classify(opts: &[u8]) -> Self {
        match opts.len() {
            0 => Self::None,
            TCPOLEN_TSTAMP_APPA => {
                let word = |i: usize| {
                    u32::from_be_bytes([
                        opts[i],
                        opts[i + 1],
                        opts[i + 2],
                        opts[i + 3],
                    ])
                };

                if word(0) == TCP_TS_OPTION_HDR {
                    Self::Timestamp { val: word(4), ecr: word(8) }
                } else {
                    Self::Other
                }
            }
            _ => Self::Other,
        }
    }

    pub fn is_mergeable(&self) -> bool {
        !matches!(self, Self::Other)
    }

    pub fn timestamp(&self) -> Option<(u32, u32)> {
        match self {
            Self::Timestamp { val, ecr } => Some((*val, *ecr)),
            _ => None,
        }
    }
}

/// Everything about one segment's TCP header the engine looks at,
/// copied out of the packet.
#[derive(Clone, Copy, Debug)]
pub struct TcpSegInfo {
    pub seq: u32,
    pub ack: u32,
    pub window: u16,
    pub flags: TcpFlags,
    pub opts: TcpOpts,
    pub hdr_len: usize,
}

impl TcpSegInfo {
    /// Read the header at the front of `hdr`, which must hold the
    /// whole header including options.
    pub fn read(hdr: &[u8]) -> Option<Self> {
        let (th, _) = TcpHdrRaw::ref_from_prefix(hdr).ok()?;
        let hdr_len = th.hdr_len();

        if hdr_len < TCP_HDR_SZ || hdr.len() < hdr_len {
            return None;
        }

        Some(Self {
            seq: th.seq(),
            ack: th.ack(),
            window: th.window(),
            flags: th.flags(),
            opts: TcpOpts::classify(&hdr[TCP_HDR_SZ..hdr_len]),
            hdr_len,
        })
    }
}

/// Sum of a TCP header with its checksum field taken as zero.
pub fn hdr_sum(hdr: &[u8]) -> Checksum {
    let mut csum = Checksum::compute(&hdr[..16]);
    csum.add_bytes(&hdr[18..]);
    csum
}

// Sequence space comparisons (RFC 1982 serial number arithmetic).

pub fn seq_lt(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) < 0
}

pub fn seq_gt(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) > 0
}

/// Timestamps wrap like sequence numbers.
pub fn tstmp_gt(a: u32, b: u32) -> bool {
    seq_gt(a, b)
}
