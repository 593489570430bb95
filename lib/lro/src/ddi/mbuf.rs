// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Received packet buffers.
//!
//! An [`Mbuf`] is one packet: a chain of data segments plus the
//! per-packet metadata a NIC driver fills in on receive (checksum
//! offload results, flow hash, stripped VLAN tag, arrival time). The
//! engine adds its own bookkeeping in [`LroPktInfo`].
//!
//! Merging never copies payload. The segments of an absorbed packet
//! are moved onto the end of the head packet's chain.
use bitflags::bitflags;
use core::fmt;

bitflags! {
/// Checksum offload results reported by the NIC, and rewritten by
/// the engine for merged packets.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct CsumFlags: u32 {
    /// The IPv4 header checksum was checked.
    const IP_CHECKED    = 1 << 0;
    /// ... and found valid.
    const IP_VALID      = 1 << 1;
    /// `csum_data` holds the L4 checksum result.
    const DATA_VALID    = 1 << 2;
    /// The L4 result includes the pseudo-header.
    const PSEUDO_HDR    = 1 << 3;
    /// The payload was decrypted by inline TLS offload.
    const TLS_DECRYPTED = 1 << 4;
}
}

bitflags! {
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct MbufFlags: u16 {
    /// `ether_vtag` holds a VLAN tag stripped by the NIC.
    const VLANTAG      = 1 << 0;
    /// `rcv_tstmp` was set by hardware.
    const TSTMP        = 1 << 1;
    /// `rcv_tstmp` was set by the LRO engine.
    const TSTMP_LRO    = 1 << 2;
    /// The L2 header was stripped before direct TCP delivery.
    const LRO_EHDRSTRP = 1 << 3;
}
}

/// `hashtype` value meaning the NIC supplied no flow hash.
pub const HASHTYPE_NONE: u8 = 0;
/// A NIC-specific hash with no defined algorithm.
pub const HASHTYPE_OPAQUE: u8 = 1;

/// Engine-private per-packet annotations.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct LroPktInfo {
    /// Ones-complement sum of the TCP payload alone.
    pub tcp_d_csum: u16,
    /// TCP payload length; for a head packet, the merged length.
    pub tcp_d_len: u32,
    /// Offset of the TCP header from the start of the packet.
    pub tcp_h_off: usize,
    /// Number of wire segments this packet represents.
    pub nsegs: u32,
    /// Ethertype of the L3 header once L2 was stripped.
    pub etype: u16,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct PktHdr {
    pub csum_flags: CsumFlags,
    pub csum_data: u16,
    pub flowid: u32,
    pub hashtype: u8,
    pub ether_vtag: u16,
    /// Arrival time in nanoseconds.
    pub rcv_tstmp: u64,
    pub rcvif: u32,
    pub lro: LroPktInfo,
}

impl PktHdr {
    pub fn has_hash(&self) -> bool {
        self.hashtype != HASHTYPE_NONE
    }
}

#[derive(Clone)]
struct Seg {
    buf: Vec<u8>,
    off: usize,
    len: usize,
}

impl Seg {
    fn bytes(&self) -> &[u8] {
        &self.buf[self.off..self.off + self.len]
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.buf[self.off..self.off + self.len]
    }
}

/// One packet.
#[derive(Clone)]
pub struct Mbuf {
    segs: Vec<Seg>,
    pub flags: MbufFlags,
    pub pkthdr: PktHdr,
}

impl Mbuf {
    pub fn from_vec(buf: Vec<u8>) -> Self {
        let len = buf.len();
        Self {
            segs: vec![Seg { buf, off: 0, len }],
            flags: MbufFlags::empty(),
            pkthdr: PktHdr::default(),
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self::from_vec(bytes.to_vec())
    }

    /// Build a packet whose data is split across several segments,
    /// the way a driver using small receive buffers would.
    pub fn from_segments<I: IntoIterator<Item = Vec<u8>>>(bufs: I) -> Self {
        let segs = bufs
            .into_iter()
            .filter(|b| !b.is_empty())
            .map(|buf| {
                let len = buf.len();
                Seg { buf, off: 0, len }
            })
            .collect();
        Self { segs, flags: MbufFlags::empty(), pkthdr: PktHdr::default() }
    }

    /// Total packet length across all segments.
    pub fn len(&self) -> usize {
        self.segs.iter().map(|s| s.len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn seg_count(&self) -> usize {
        self.segs.len()
    }

    /// The bytes of the first segment.
    pub fn first(&self) -> &[u8] {
        self.segs.first().map(Seg::bytes).unwrap_or(&[])
    }

    pub fn first_mut(&mut self) -> &mut [u8] {
        match self.segs.first_mut() {
            Some(seg) => seg.bytes_mut(),
            None => &mut [],
        }
    }

    pub fn segs(&self) -> impl Iterator<Item = &[u8]> {
        self.segs.iter().map(Seg::bytes)
    }

    /// Remove `n` bytes from the front of the packet.
    pub fn adj_front(&mut self, mut n: usize) {
        while n > 0 {
            let Some(seg) = self.segs.first_mut() else { return };

            if seg.len > n {
                seg.off += n;
                seg.len -= n;
                return;
            }

            n -= seg.len;
            self.segs.remove(0);
        }
    }

    /// Make sure the first segment holds at least `n` contiguous bytes,
    /// coalescing following segments into it as needed. Returns false
    /// if the packet is shorter than `n`.
    pub fn pullup(&mut self, n: usize) -> bool {
        if self.len() < n {
            return false;
        }

        if self.segs.first().map(|s| s.len).unwrap_or(0) >= n {
            return true;
        }

        let mut buf = Vec::with_capacity(n);
        while buf.len() < n {
            let seg = &mut self.segs[0];
            let take = (n - buf.len()).min(seg.len);
            buf.extend_from_slice(&seg.bytes()[..take]);
            if take == seg.len {
                self.segs.remove(0);
            } else {
                seg.off += take;
                seg.len -= take;
            }
        }

        let len = buf.len();
        self.segs.insert(0, Seg { buf, off: 0, len });
        true
    }

    /// Shorten the packet to `len` bytes, dropping trailing data.
    pub fn trim_to(&mut self, len: usize) {
        let mut remain = len;
        let mut keep = 0;

        for seg in self.segs.iter_mut() {
            if remain == 0 {
                break;
            }

            seg.len = seg.len.min(remain);
            remain -= seg.len;
            keep += 1;
        }

        self.segs.truncate(keep);
    }

    /// Chain the data of `other` onto the end of this packet. The
    /// metadata of `other` is discarded.
    pub fn append(&mut self, other: Mbuf) {
        self.segs.extend(other.segs);
    }

    /// Copy the whole packet into one contiguous buffer.
    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len());
        for seg in self.segs() {
            out.extend_from_slice(seg);
        }
        out
    }
}

impl fmt::Debug for Mbuf {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Mbuf")
            .field("len", &self.len())
            .field("segs", &self.segs.len())
            .field("flags", &self.flags)
            .field("pkthdr", &self.pkthdr)
            .finish()
    }
}
