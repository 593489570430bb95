// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Rewriting the headers of a merged packet.
//!
//! None of this touches payload. The payload's contribution to the
//! TCP checksum is known from the sums recorded at receive time: the
//! head's own data sum plus the entry's appended sum. Everything else
//! summed into the checksum is header, and headers are short.
//!
//! For VXLAN the outer UDP checksum covers the inner headers as well
//! as the payload, so it is updated incrementally: the old inner
//! header bytes and lengths are subtracted, and their new values plus
//! the appended payload are added.

use super::checksum::Checksum;
use super::checksum::HeaderChecksum;
use super::entry::LroEntry;
use super::ip4::Ipv4HdrRaw;
use super::ip6::Ipv6HdrRaw;
use super::parse::LroParser;
use super::tcp;
use super::tcp::TCP_HDR_SZ;
use super::udp::UDP_HDR_SZ;
use super::udp::UdpHdrRaw;
use crate::ddi::mbuf::Mbuf;
use zerocopy::FromBytes;

/// The pseudo-header sum of the IP header at `p.l3_off` for an
/// upper-layer segment of `l4_len` bytes.
pub fn pseudo_sum(buf: &[u8], p: &LroParser, l4_len: u16) -> Checksum {
    let ip = buf.get(p.l3_off..).unwrap_or(&[]);

    if p.is_ipv6() {
        Ipv6HdrRaw::ref_from_prefix(ip)
            .map(|(h, _)| h.pseudo_sum(l4_len))
            .unwrap_or_default()
    } else {
        Ipv4HdrRaw::ref_from_prefix(ip)
            .map(|(h, _)| h.pseudo_sum(l4_len))
            .unwrap_or_default()
    }
}

/// Set the IP length of the level `p` so that the datagram ends at
/// `l3_end`.
fn set_ip_len(buf: &mut [u8], p: &LroParser, l3_end: usize) {
    let Some(ip) = buf.get_mut(p.l3_off..) else { return };
    let ip_len = l3_end - p.l3_off;

    if p.is_ipv6() {
        if let Ok((h, _)) = Ipv6HdrRaw::mut_from_prefix(ip) {
            h.set_payload_len((ip_len - (p.l4_off - p.l3_off)) as u16);
        }
    } else if let Ok((h, _)) = Ipv4HdrRaw::mut_from_prefix(ip) {
        h.set_total_len(ip_len as u16);
    }
}

/// Rewrite the TCP header fields the entry tracks.
fn update_tcp_fields(hdr: &mut [u8], le: &LroEntry) {
    hdr[8..12].copy_from_slice(&le.ack_seq.to_be_bytes());
    hdr[13] |= le.flags.bits();
    hdr[14..16].copy_from_slice(&le.window.to_be_bytes());

    if le.timestamp && hdr.len() >= TCP_HDR_SZ + tcp::TCPOLEN_TSTAMP_APPA {
        let opts = &mut hdr[TCP_HDR_SZ..];
        opts[4..8].copy_from_slice(&le.tsval.to_be_bytes());
        opts[8..12].copy_from_slice(&le.tsecr.to_be_bytes());
    }
}

/// Rewrite the head packet `m` of entry `le` to describe everything
/// merged onto it.
///
/// `m.pkthdr.lro` carries the merged payload length and the head's
/// own payload sum; `le` carries the appended payload sum and the
/// TCP fields of the last merged segment.
pub fn update_headers(le: &LroEntry, m: &mut Mbuf) {
    let pa = *le.tcp();
    let d_len = m.pkthdr.lro.tcp_d_len as usize;
    let d_csum = Checksum::from(u32::from(m.pkthdr.lro.tcp_d_csum));
    let l3_end = pa.hdr_end + d_len;
    let buf = m.first_mut();

    if buf.len() < pa.hdr_end {
        return;
    }

    // The outer UDP header and the bytes between it and the end of
    // the inner TCP header, summed before anything changes.
    let outer = le.inner.map(|_| le.outer);
    let old_outer = outer.map(|o| {
        let udp_len = [buf[o.l4_off + 4], buf[o.l4_off + 5]];
        let region = &buf[o.l4_off + UDP_HDR_SZ..pa.hdr_end];
        (udp_len, Checksum::compute(region))
    });

    // Inner, or only, level.
    let hdr = &mut buf[pa.l4_off..pa.hdr_end];
    update_tcp_fields(hdr, le);
    set_ip_len(buf, &pa, l3_end);

    let l4_len = (l3_end - pa.l4_off) as u16;
    let hdr = &buf[pa.l4_off..pa.hdr_end];
    let sum = pseudo_sum(buf, &pa, l4_len)
        + tcp::hdr_sum(hdr)
        + d_csum
        + le.append_csum;
    let th_sum = HeaderChecksum::from(sum).bytes();
    buf[pa.l4_off + 16..pa.l4_off + 18].copy_from_slice(&th_sum);

    let (Some(o), Some((old_udp_len, old_region))) = (outer, old_outer) else {
        return;
    };

    set_ip_len(buf, &o, l3_end);

    let udp_len = ((l3_end - o.l4_off) as u16).to_be_bytes();
    let new_region =
        Checksum::compute(&buf[o.l4_off + UDP_HDR_SZ..pa.hdr_end]);
    let Ok((udp, _)) = UdpHdrRaw::mut_from_prefix(&mut buf[o.l4_off..]) else {
        return;
    };

    udp.len = udp_len;

    if !udp.has_csum() {
        return;
    }

    // The UDP length appears in both the header and the
    // pseudo-header.
    let mut csum = Checksum::from(HeaderChecksum::wrap(udp.csum));
    csum.sub_bytes(&old_udp_len);
    csum.sub_bytes(&old_udp_len);
    csum -= old_region;
    csum.add_bytes(&udp_len);
    csum.add_bytes(&udp_len);
    csum += new_region;
    csum += le.append_csum;

    udp.csum = match HeaderChecksum::from(csum).bytes() {
        [0, 0] => [0xFF, 0xFF],
        bytes => bytes,
    };
}
