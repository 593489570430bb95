// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

use core::fmt;
use core::fmt::Display;
use serde::Deserialize;
use serde::Serialize;
use std::net::IpAddr;
use std::net::Ipv4Addr;

/// The well-known UDP destination port for VXLAN.
pub const VXLAN_PORT: u16 = 4789;

/// The classification of a parsed L3/L4 header pair.
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize,
)]
pub enum LroType {
    #[default]
    None,
    Ipv4Tcp,
    Ipv6Tcp,
    Ipv4Udp,
    Ipv6Udp,
}

impl LroType {
    pub fn is_tcp(self) -> bool {
        matches!(self, Self::Ipv4Tcp | Self::Ipv6Tcp)
    }

    pub fn is_udp(self) -> bool {
        matches!(self, Self::Ipv4Udp | Self::Ipv6Udp)
    }

    pub fn is_ipv6(self) -> bool {
        matches!(self, Self::Ipv6Tcp | Self::Ipv6Udp)
    }
}

impl Display for LroType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Self::None => "NONE",
            Self::Ipv4Tcp => "TCP4",
            Self::Ipv6Tcp => "TCP6",
            Self::Ipv4Udp => "UDP4",
            Self::Ipv6Udp => "UDP6",
        };
        write!(f, "{s}")
    }
}

/// The identity of one direction of one transport flow, as seen at a
/// single encapsulation level.
///
/// A packet carried inside VXLAN has two keys: the outer one names
/// the UDP tunnel and the inner one the TCP connection. Both must
/// match for two packets to belong to the same LRO entry.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct FlowKey {
    pub lro_type: LroType,
    pub src_addr: IpAddr,
    pub dst_addr: IpAddr,
    pub src_port: u16,
    pub dst_port: u16,
    pub vlan_id: u16,
    pub vxlan_vni: Option<u32>,
    pub decrypted: bool,
}

impl Default for FlowKey {
    fn default() -> Self {
        Self {
            lro_type: LroType::None,
            src_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            dst_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            src_port: 0,
            dst_port: 0,
            vlan_id: 0,
            vxlan_vni: None,
            decrypted: false,
        }
    }
}

fn addr_words(addr: &IpAddr) -> u32 {
    match addr {
        IpAddr::V4(ip) => u32::from_be_bytes(ip.octets()),
        IpAddr::V6(ip) => ip
            .octets()
            .chunks_exact(4)
            .map(|w| u32::from_be_bytes([w[0], w[1], w[2], w[3]]))
            .fold(0u32, |acc, w| acc.wrapping_add(w)),
    }
}

impl FlowKey {
    pub fn is_none(&self) -> bool {
        self.lro_type == LroType::None
    }

    /// A cheap software hash used to pick a bucket when the NIC did
    /// not supply a flow id: the wrapping sum of the address words
    /// and both ports.
    pub fn hash_words(&self) -> u32 {
        addr_words(&self.src_addr)
            .wrapping_add(addr_words(&self.dst_addr))
            .wrapping_add(u32::from(self.src_port))
            .wrapping_add(u32::from(self.dst_port))
    }
}

impl Display for FlowKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} {}:{} -> {}:{}",
            self.lro_type,
            self.src_addr,
            self.src_port,
            self.dst_addr,
            self.dst_port
        )?;

        if self.vlan_id != 0 {
            write!(f, " vlan {}", self.vlan_id)?;
        }

        if let Some(vni) = self.vxlan_vni {
            write!(f, " vni {vni}")?;
        }

        Ok(())
    }
}
