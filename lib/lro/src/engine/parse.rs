// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Header parsing.
//!
//! A frame is walked from the Ethernet header through an optional
//! 802.1Q tag, an IPv4 or IPv6 header, and a TCP or UDP header. A UDP
//! datagram to the VXLAN port is followed into its encapsulated frame,
//! which is walked the same way and must carry TCP.
//!
//! Parsing reads the frame but never writes to it. Offsets recorded in
//! an [`LroParser`] are relative to the start of the frame.

use super::ether::ETHER_HDR_SZ;
use super::ether::ETHER_TYPE_IPV4;
use super::ether::ETHER_TYPE_IPV6;
use super::ether::ETHER_TYPE_VLAN;
use super::ether::EtherHdrRaw;
use super::ether::VLAN_HDR_SZ;
use super::ether::VLAN_VID_MASK;
use super::ether::VlanHdrRaw;
use super::ip4::IPPROTO_TCP;
use super::ip4::IPPROTO_UDP;
use super::ip4::IPV4_HDR_SZ;
use super::ip4::IPV4_VERSION;
use super::ip4::Ipv4HdrRaw;
use super::ip6::IPV6_HDR_SZ;
use super::ip6::IPV6_VERSION;
use super::ip6::Ipv6HdrRaw;
use super::tcp::TCP_HDR_SZ;
use super::tcp::TcpHdrRaw;
use super::udp::UDP_HDR_SZ;
use super::udp::UdpHdrRaw;
use super::udp::VXLAN_HDR_SZ;
use super::udp::VxlanHdrRaw;
use crate::ddi::mbuf::CsumFlags;
use crate::ddi::mbuf::MbufFlags;
use crate::ddi::mbuf::PktHdr;
use lro_api::FlowKey;
use lro_api::LroError;
use lro_api::LroType;
use lro_api::VXLAN_PORT;
use std::net::IpAddr;
use zerocopy::FromBytes;

/// The largest header stack the parser can walk: a tagged IPv6/UDP
/// VXLAN frame carrying a tagged IPv6/TCP frame with full options.
pub const MAX_HDR_LEN: usize = 2 * (ETHER_HDR_SZ + VLAN_HDR_SZ + IPV6_HDR_SZ)
    + UDP_HDR_SZ
    + VXLAN_HDR_SZ
    + 60;

/// One parsed encapsulation level.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct LroParser {
    pub data: FlowKey,
    pub l3_off: usize,
    pub l4_off: usize,
    /// End of the transport header, options included.
    pub hdr_end: usize,
    /// The IP datagram length: header plus payload.
    pub ip_len: usize,
}

impl LroParser {
    pub fn is_ipv6(&self) -> bool {
        self.data.lro_type.is_ipv6()
    }

    /// End of the IP datagram, relative to the start of the frame.
    pub fn l3_end(&self) -> usize {
        self.l3_off + self.ip_len
    }
}

#[derive(Clone, Copy, Debug)]
pub struct ParsedHeaders {
    pub outer: LroParser,
    pub inner: Option<LroParser>,
}

impl ParsedHeaders {
    /// The level carrying the TCP segment.
    pub fn tcp(&self) -> &LroParser {
        self.inner.as_ref().unwrap_or(&self.outer)
    }

    pub fn total_hdr_len(&self) -> usize {
        self.tcp().hdr_end
    }
}

/// Walk one Ethernet/IP/L4 stack starting at `off`.
fn parse_level(
    buf: &[u8],
    off: usize,
    vlan_tag: Option<u16>,
) -> Option<LroParser> {
    let (eth, _) = EtherHdrRaw::ref_from_prefix(buf.get(off..)?).ok()?;
    let mut ether_type = eth.ether_type();
    let mut pos = off + ETHER_HDR_SZ;
    let mut vlan_id = 0;

    if ether_type == ETHER_TYPE_VLAN {
        let (vlan, _) = VlanHdrRaw::ref_from_prefix(buf.get(pos..)?).ok()?;
        vlan_id = vlan.vid();
        ether_type = vlan.ether_type();
        pos += VLAN_HDR_SZ;
    }

    // A tag stripped by the NIC takes the place of an in-frame one.
    if let Some(tag) = vlan_tag {
        vlan_id = tag & VLAN_VID_MASK;
    }

    let l3_off = pos;
    let (v6, proto, src_addr, dst_addr, ip_len, l4_off) = match ether_type {
        ETHER_TYPE_IPV4 => {
            let (ip, _) = Ipv4HdrRaw::ref_from_prefix(buf.get(pos..)?).ok()?;

            // No options and no fragments.
            if ip.version() != IPV4_VERSION
                || ip.hdr_len() != IPV4_HDR_SZ
                || ip.is_fragment()
            {
                return None;
            }

            (
                false,
                ip.proto,
                IpAddr::V4(ip.src()),
                IpAddr::V4(ip.dst()),
                usize::from(ip.total_len()),
                pos + IPV4_HDR_SZ,
            )
        }

        ETHER_TYPE_IPV6 => {
            let (ip, _) = Ipv6HdrRaw::ref_from_prefix(buf.get(pos..)?).ok()?;

            if ip.version() != IPV6_VERSION {
                return None;
            }

            (
                true,
                ip.next_hdr,
                IpAddr::V6(ip.src()),
                IpAddr::V6(ip.dst()),
                IPV6_HDR_SZ + usize::from(ip.payload_len()),
                pos + IPV6_HDR_SZ,
            )
        }

        _ => return None,
    };

    let (lro_type, src_port, dst_port, hdr_end) = match proto {
        IPPROTO_TCP => {
            let (tcp, _) =
                TcpHdrRaw::ref_from_prefix(buf.get(l4_off..)?).ok()?;
            let hdr_end = l4_off + tcp.hdr_len();

            if tcp.hdr_len() < TCP_HDR_SZ || hdr_end > buf.len() {
                return None;
            }

            let ty = if v6 { LroType::Ipv6Tcp } else { LroType::Ipv4Tcp };
            (ty, tcp.src_port(), tcp.dst_port(), hdr_end)
        }

        IPPROTO_UDP => {
            let (udp, _) =
                UdpHdrRaw::ref_from_prefix(buf.get(l4_off..)?).ok()?;
            let ty = if v6 { LroType::Ipv6Udp } else { LroType::Ipv4Udp };
            (ty, udp.src_port(), udp.dst_port(), l4_off + UDP_HDR_SZ)
        }

        _ => return None,
    };

    if ip_len < hdr_end - l3_off {
        return None;
    }

    Some(LroParser {
        data: FlowKey {
            lro_type,
            src_addr,
            dst_addr,
            src_port,
            dst_port,
            vlan_id,
            vxlan_vni: None,
            decrypted: false,
        },
        l3_off,
        l4_off,
        hdr_end,
        ip_len,
    })
}

/// Classify a frame.
///
/// `buf` must hold every header contiguously; the caller pulls up
/// [`MAX_HDR_LEN`] bytes (or the whole frame, if shorter) first.
pub fn parse_frame(
    buf: &[u8],
    meta: &PktHdr,
    flags: MbufFlags,
) -> Result<ParsedHeaders, LroError> {
    let vlan_tag =
        flags.contains(MbufFlags::VLANTAG).then_some(meta.ether_vtag);
    let mut outer =
        parse_level(buf, 0, vlan_tag).ok_or(LroError::NotSupported)?;
    outer.data.decrypted =
        meta.csum_flags.contains(CsumFlags::TLS_DECRYPTED);

    if outer.data.lro_type.is_tcp() {
        return Ok(ParsedHeaders { outer, inner: None });
    }

    if outer.data.dst_port != VXLAN_PORT {
        return Err(LroError::NotSupported);
    }

    let (vxlan, _) = buf
        .get(outer.hdr_end..)
        .and_then(|b| VxlanHdrRaw::ref_from_prefix(b).ok())
        .ok_or(LroError::NotSupported)?;

    if !vxlan.vni_valid() {
        return Err(LroError::NotSupported);
    }

    let vni = vxlan.vni();
    outer.data.vxlan_vni = Some(vni);

    let mut inner = parse_level(buf, outer.hdr_end + VXLAN_HDR_SZ, None)
        .ok_or(LroError::NotSupported)?;

    if !inner.data.lro_type.is_tcp() {
        return Err(LroError::NotSupported);
    }

    inner.data.vxlan_vni = Some(vni);
    Ok(ParsedHeaders { outer, inner: Some(inner) })
}

#[cfg(test)]
mod test {
    use super::*;
    use lro_test_utils::frames::FlowSpec;
    use lro_test_utils::frames::TcpSeg;
    use lro_test_utils::frames::build_frame;

    fn meta() -> PktHdr {
        PktHdr::default()
    }

    #[test]
    fn plain_ipv4_tcp() {
        let flow = FlowSpec::v4();
        let frame = build_frame(&flow, &TcpSeg::data(1000, b"hello"));
        let p = parse_frame(&frame, &meta(), MbufFlags::empty()).unwrap();
        assert!(p.inner.is_none());
        assert_eq!(p.outer.data.lro_type, LroType::Ipv4Tcp);
        assert_eq!(p.outer.data.src_port, flow.src_port);
        assert_eq!(p.outer.l3_off, ETHER_HDR_SZ);
        assert_eq!(p.outer.l4_off, ETHER_HDR_SZ + IPV4_HDR_SZ);
        assert_eq!(p.total_hdr_len(), ETHER_HDR_SZ + IPV4_HDR_SZ + TCP_HDR_SZ);
        assert_eq!(p.outer.l3_end(), frame.len());
    }

    #[test]
    fn ipv6_with_vlan_and_timestamp() {
        let flow = FlowSpec::v6().with_vlan(42);
        let seg = TcpSeg::data(7, &[0u8; 10]).with_ts(1, 2);
        let frame = build_frame(&flow, &seg);
        let p = parse_frame(&frame, &meta(), MbufFlags::empty()).unwrap();
        assert_eq!(p.outer.data.lro_type, LroType::Ipv6Tcp);
        assert_eq!(p.outer.data.vlan_id, 42);
        assert_eq!(p.outer.hdr_end - p.outer.l4_off, TCP_HDR_SZ + 12);
    }

    #[test]
    fn hardware_tag_overrides_frame_tag() {
        let flow = FlowSpec::v4().with_vlan(42);
        let frame = build_frame(&flow, &TcpSeg::ack(1, 1));
        let mut m = meta();
        m.ether_vtag = 0x2007;
        let p = parse_frame(&frame, &m, MbufFlags::VLANTAG).unwrap();
        assert_eq!(p.outer.data.vlan_id, 7);
    }

    #[test]
    fn vxlan_inner_tcp() {
        let flow = FlowSpec::v4().with_vxlan(FlowSpec::v6(), 0xABCDE);
        let frame = build_frame(&flow, &TcpSeg::data(1, b"x"));
        let p = parse_frame(&frame, &meta(), MbufFlags::empty()).unwrap();
        assert_eq!(p.outer.data.lro_type, LroType::Ipv4Udp);
        assert_eq!(p.outer.data.vxlan_vni, Some(0xABCDE));
        let inner = p.inner.unwrap();
        assert_eq!(inner.data.lro_type, LroType::Ipv6Tcp);
        assert_eq!(inner.data.vxlan_vni, Some(0xABCDE));
        assert_eq!(p.tcp().l3_end(), frame.len());
    }

    #[test]
    fn rejects_ipv4_options_and_fragments() {
        let flow = FlowSpec::v4();
        let mut frame = build_frame(&flow, &TcpSeg::data(1, b"abc"));
        frame[ETHER_HDR_SZ] = 0x46;
        assert_eq!(
            parse_frame(&frame, &meta(), MbufFlags::empty()).unwrap_err(),
            LroError::NotSupported
        );

        let mut frame = build_frame(&flow, &TcpSeg::data(1, b"abc"));
        frame[ETHER_HDR_SZ + 6] = 0x20;
        assert!(parse_frame(&frame, &meta(), MbufFlags::empty()).is_err());
    }

    #[test]
    fn rejects_plain_udp() {
        let flow = FlowSpec::v4();
        let mut frame = build_frame(&flow, &TcpSeg::data(1, b"abc"));
        frame[ETHER_HDR_SZ + 9] = IPPROTO_UDP;
        assert!(parse_frame(&frame, &meta(), MbufFlags::empty()).is_err());
    }

    #[test]
    fn rejects_truncated() {
        let frame = build_frame(&FlowSpec::v4(), &TcpSeg::data(1, b"abc"));
        let short = &frame[..ETHER_HDR_SZ + IPV4_HDR_SZ + 10];
        assert!(parse_frame(short, &meta(), MbufFlags::empty()).is_err());
    }
}
