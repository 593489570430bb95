// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Checksum verification with smoltcp, as a second opinion on the
//! engine's incremental updates.

use crate::frames::ETHER_TYPE_IPV6;
use crate::frames::ETHER_TYPE_VLAN;
use crate::frames::IPPROTO_UDP;
use smoltcp::wire::IpAddress;
use smoltcp::wire::IpProtocol;
use smoltcp::wire::Ipv4Packet;
use smoltcp::wire::Ipv6Packet;
use smoltcp::wire::TcpPacket;
use smoltcp::wire::UdpPacket;

/// Verify every IP, UDP, and TCP checksum in an Ethernet frame,
/// descending into VXLAN.
pub fn verify_frame(frame: &[u8]) -> Result<(), String> {
    let mut off = 12;
    let mut etype = u16::from_be_bytes([frame[off], frame[off + 1]]);
    if etype == ETHER_TYPE_VLAN {
        off += 4;
        etype = u16::from_be_bytes([frame[off], frame[off + 1]]);
    }
    verify_ip(&frame[off + 2..], etype == ETHER_TYPE_IPV6)
}

/// As [`verify_frame`], for a packet starting at its IP header.
pub fn verify_ip(pkt: &[u8], v6: bool) -> Result<(), String> {
    let (src, dst, proto, payload) = if v6 {
        let ip = Ipv6Packet::new_checked(pkt).map_err(|e| e.to_string())?;
        (
            IpAddress::Ipv6(ip.src_addr()),
            IpAddress::Ipv6(ip.dst_addr()),
            ip.next_header(),
            ip.payload(),
        )
    } else {
        let ip = Ipv4Packet::new_checked(pkt).map_err(|e| e.to_string())?;
        if !ip.verify_checksum() {
            return Err("bad IPv4 header checksum".into());
        }
        (
            IpAddress::Ipv4(ip.src_addr()),
            IpAddress::Ipv4(ip.dst_addr()),
            ip.next_header(),
            ip.payload(),
        )
    };

    match proto {
        IpProtocol::Tcp => {
            let tcp =
                TcpPacket::new_checked(payload).map_err(|e| e.to_string())?;
            if !tcp.verify_checksum(&src, &dst) {
                return Err("bad TCP checksum".into());
            }
            Ok(())
        }

        IpProtocol::Udp => {
            let udp =
                UdpPacket::new_checked(payload).map_err(|e| e.to_string())?;
            if udp.checksum() != 0 && !udp.verify_checksum(&src, &dst) {
                return Err("bad UDP checksum".into());
            }
            // Skip the VXLAN header to the inner frame.
            verify_frame(&udp.payload()[8..])
        }

        p => Err(format!("unexpected protocol {p} ({})", u8::from(p))),
    }
}

/// Whether a frame's outer UDP checksum is absent.
pub fn outer_udp_csum_is_zero(frame: &[u8]) -> bool {
    let mut off = 14;
    if u16::from_be_bytes([frame[12], frame[13]]) == ETHER_TYPE_VLAN {
        off += 4;
    }
    let v6 = frame[off] >> 4 == 6;
    let (l4, proto) = if v6 {
        (off + 40, frame[off + 6])
    } else {
        (off + usize::from(frame[off] & 0x0F) * 4, frame[off + 9])
    };
    assert_eq!(proto, IPPROTO_UDP);
    frame[l4 + 6] == 0 && frame[l4 + 7] == 0
}
