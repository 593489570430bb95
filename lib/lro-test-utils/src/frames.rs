// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Building test frames, and reading them back.
//!
//! Everything here is computed from scratch with a plain RFC 1071
//! checksum, independently of the engine's incremental arithmetic.

use lro_api::FlowKey;
use lro_api::LroType;
use lro_api::VXLAN_PORT;
use std::net::IpAddr;
use std::net::Ipv4Addr;
use std::net::Ipv6Addr;

pub const ETHER_TYPE_IPV4: u16 = 0x0800;
pub const ETHER_TYPE_IPV6: u16 = 0x86DD;
pub const ETHER_TYPE_VLAN: u16 = 0x8100;
pub const IPPROTO_TCP: u8 = 6;
pub const IPPROTO_UDP: u8 = 17;

pub const TH_FIN: u8 = 0x01;
pub const TH_SYN: u8 = 0x02;
pub const TH_RST: u8 = 0x04;
pub const TH_PSH: u8 = 0x08;
pub const TH_ACK: u8 = 0x10;
pub const TH_URG: u8 = 0x20;
pub const TH_ECE: u8 = 0x40;
pub const TH_CWR: u8 = 0x80;

/// The VXLAN encapsulation of a flow.
#[derive(Clone, Debug)]
pub struct Vxlan {
    pub inner: Box<FlowSpec>,
    pub vni: u32,
    /// Compute the outer UDP checksum instead of leaving it zero.
    pub udp_csum: bool,
}

/// The addressing of one direction of a flow.
#[derive(Clone, Debug)]
pub struct FlowSpec {
    pub src_mac: [u8; 6],
    pub dst_mac: [u8; 6],
    pub src_ip: IpAddr,
    pub dst_ip: IpAddr,
    pub src_port: u16,
    pub dst_port: u16,
    pub vlan: Option<u16>,
    pub tos: u8,
    pub ip_id: u16,
    pub vxlan: Option<Vxlan>,
}

impl FlowSpec {
    pub fn v4() -> Self {
        Self {
            src_mac: [0x02, 0, 0, 0, 0, 0x01],
            dst_mac: [0x02, 0, 0, 0, 0, 0x02],
            src_ip: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
            dst_ip: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)),
            src_port: 5201,
            dst_port: 40000,
            vlan: None,
            tos: 0,
            ip_id: 0x1234,
            vxlan: None,
        }
    }

    pub fn v6() -> Self {
        Self {
            src_ip: IpAddr::V6("fd00::1".parse().unwrap()),
            dst_ip: IpAddr::V6("fd00::2".parse().unwrap()),
            ..Self::v4()
        }
    }

    /// The same flow with a different source port.
    pub fn with_src_port(mut self, port: u16) -> Self {
        self.src_port = port;
        self
    }

    pub fn with_vlan(mut self, vid: u16) -> Self {
        self.vlan = Some(vid);
        self
    }

    pub fn with_tos(mut self, tos: u8) -> Self {
        self.tos = tos;
        self
    }

    /// Carry `inner` over this flow as VXLAN. The outer ports become
    /// the UDP ports of the tunnel.
    pub fn with_vxlan(mut self, inner: FlowSpec, vni: u32) -> Self {
        self.dst_port = VXLAN_PORT;
        self.vxlan =
            Some(Vxlan { inner: Box::new(inner), vni, udp_csum: false });
        self
    }

    pub fn with_udp_csum(mut self) -> Self {
        if let Some(vx) = self.vxlan.as_mut() {
            vx.udp_csum = true;
        }
        self
    }

    /// The key the engine derives for this flow's TCP level.
    pub fn key(&self) -> FlowKey {
        if let Some(vx) = &self.vxlan {
            return FlowKey { vxlan_vni: Some(vx.vni), ..vx.inner.key() };
        }

        FlowKey {
            lro_type: self.tcp_type(),
            src_addr: self.src_ip,
            dst_addr: self.dst_ip,
            src_port: self.src_port,
            dst_port: self.dst_port,
            vlan_id: self.vlan.unwrap_or(0),
            vxlan_vni: None,
            decrypted: false,
        }
    }

    fn tcp_type(&self) -> LroType {
        match self.src_ip {
            IpAddr::V4(_) => LroType::Ipv4Tcp,
            IpAddr::V6(_) => LroType::Ipv6Tcp,
        }
    }
}

/// One TCP segment.
#[derive(Clone, Debug)]
pub struct TcpSeg {
    pub seq: u32,
    pub ack: u32,
    pub flags: u8,
    pub window: u16,
    pub ts: Option<(u32, u32)>,
    pub sack: Option<(u32, u32)>,
    /// Further raw option bytes, padded to a word with NOPs.
    pub opts: Vec<u8>,
    pub payload: Vec<u8>,
}

impl TcpSeg {
    /// A data segment with ACK set.
    pub fn data(seq: u32, payload: &[u8]) -> Self {
        Self {
            seq,
            ack: 1,
            flags: TH_ACK,
            window: 512,
            ts: None,
            sack: None,
            opts: vec![],
            payload: payload.to_vec(),
        }
    }

    /// A pure ACK.
    pub fn ack(seq: u32, ack: u32) -> Self {
        Self { ack, ..Self::data(seq, &[]) }
    }

    pub fn with_ack(mut self, ack: u32) -> Self {
        self.ack = ack;
        self
    }

    pub fn with_flags(mut self, flags: u8) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_window(mut self, window: u16) -> Self {
        self.window = window;
        self
    }

    pub fn with_ts(mut self, val: u32, ecr: u32) -> Self {
        self.ts = Some((val, ecr));
        self
    }

    pub fn with_sack(mut self, left: u32, right: u32) -> Self {
        self.sack = Some((left, right));
        self
    }

    pub fn with_opts(mut self, opts: &[u8]) -> Self {
        self.opts = opts.to_vec();
        self
    }

    fn options(&self) -> Vec<u8> {
        let mut o = vec![];
        if let Some((val, ecr)) = self.ts {
            o.extend_from_slice(&[1, 1, 8, 10]);
            o.extend_from_slice(&val.to_be_bytes());
            o.extend_from_slice(&ecr.to_be_bytes());
        }
        if let Some((l, r)) = self.sack {
            o.extend_from_slice(&[1, 1, 5, 10]);
            o.extend_from_slice(&l.to_be_bytes());
            o.extend_from_slice(&r.to_be_bytes());
        }
        o.extend_from_slice(&self.opts);
        while o.len() % 4 != 0 {
            o.push(1);
        }
        o
    }
}

/// Sum `bytes` as big-endian words onto `sum`, RFC 1071 style.
pub fn ones_sum(mut sum: u64, bytes: &[u8]) -> u64 {
    let mut words = bytes.chunks_exact(2);
    for w in &mut words {
        sum += u64::from(u16::from_be_bytes([w[0], w[1]]));
    }
    if let [b] = words.remainder() {
        sum += u64::from(*b) << 8;
    }
    sum
}

pub fn fold(mut sum: u64) -> u16 {
    while sum > 0xFFFF {
        sum = (sum >> 16) + (sum & 0xFFFF);
    }
    sum as u16
}

fn addr_bytes(ip: &IpAddr) -> Vec<u8> {
    match ip {
        IpAddr::V4(ip) => ip.octets().to_vec(),
        IpAddr::V6(ip) => ip.octets().to_vec(),
    }
}

/// The checksum of a transport segment whose checksum field is zero.
pub fn l4_checksum(src: &IpAddr, dst: &IpAddr, proto: u8, seg: &[u8]) -> u16 {
    let mut sum = ones_sum(0, &addr_bytes(src));
    sum = ones_sum(sum, &addr_bytes(dst));
    sum += u64::from(proto);
    sum += seg.len() as u64;
    let csum = !fold(ones_sum(sum, seg));
    if proto == IPPROTO_UDP && csum == 0 { 0xFFFF } else { csum }
}

pub fn ipv4_checksum(hdr: &[u8]) -> u16 {
    let mut h = hdr.to_vec();
    h[10] = 0;
    h[11] = 0;
    !fold(ones_sum(0, &h))
}

fn tcp_segment(flow: &FlowSpec, seg: &TcpSeg) -> Vec<u8> {
    let opts = seg.options();
    let hlen = 20 + opts.len();
    let mut b = Vec::with_capacity(hlen + seg.payload.len());
    b.extend_from_slice(&flow.src_port.to_be_bytes());
    b.extend_from_slice(&flow.dst_port.to_be_bytes());
    b.extend_from_slice(&seg.seq.to_be_bytes());
    b.extend_from_slice(&seg.ack.to_be_bytes());
    b.push(((hlen / 4) as u8) << 4);
    b.push(seg.flags);
    b.extend_from_slice(&seg.window.to_be_bytes());
    b.extend_from_slice(&[0, 0, 0, 0]);
    b.extend_from_slice(&opts);
    b.extend_from_slice(&seg.payload);

    let csum = l4_checksum(&flow.src_ip, &flow.dst_ip, IPPROTO_TCP, &b);
    b[16..18].copy_from_slice(&csum.to_be_bytes());
    b
}

/// Wrap a transport segment in IP and Ethernet headers.
fn ip_frame(flow: &FlowSpec, proto: u8, l4: &[u8]) -> Vec<u8> {
    let mut b = vec![];
    b.extend_from_slice(&flow.dst_mac);
    b.extend_from_slice(&flow.src_mac);
    if let Some(vid) = flow.vlan {
        b.extend_from_slice(&ETHER_TYPE_VLAN.to_be_bytes());
        b.extend_from_slice(&(vid & 0x0FFF).to_be_bytes());
    }

    match (flow.src_ip, flow.dst_ip) {
        (IpAddr::V4(src), IpAddr::V4(dst)) => {
            b.extend_from_slice(&ETHER_TYPE_IPV4.to_be_bytes());
            let start = b.len();
            let total = (20 + l4.len()) as u16;
            b.extend_from_slice(&[0x45, flow.tos]);
            b.extend_from_slice(&total.to_be_bytes());
            b.extend_from_slice(&flow.ip_id.to_be_bytes());
            b.extend_from_slice(&[0x40, 0x00, 64, proto, 0, 0]);
            b.extend_from_slice(&src.octets());
            b.extend_from_slice(&dst.octets());
            let csum = ipv4_checksum(&b[start..start + 20]);
            b[start + 10..start + 12].copy_from_slice(&csum.to_be_bytes());
        }

        (IpAddr::V6(src), IpAddr::V6(dst)) => {
            b.extend_from_slice(&ETHER_TYPE_IPV6.to_be_bytes());
            b.push(0x60 | (flow.tos >> 4));
            b.extend_from_slice(&[(flow.tos & 0x0F) << 4, 0, 0]);
            b.extend_from_slice(&(l4.len() as u16).to_be_bytes());
            b.extend_from_slice(&[proto, 64]);
            b.extend_from_slice(&src.octets());
            b.extend_from_slice(&dst.octets());
        }

        _ => panic!("mixed address families in {flow:?}"),
    }

    b.extend_from_slice(l4);
    b
}

/// Build the complete frame carrying `seg` over `flow`, checksums
/// and all.
pub fn build_frame(flow: &FlowSpec, seg: &TcpSeg) -> Vec<u8> {
    let Some(vx) = &flow.vxlan else {
        return ip_frame(flow, IPPROTO_TCP, &tcp_segment(flow, seg));
    };

    let inner = build_frame(&vx.inner, seg);
    let mut udp = vec![];
    udp.extend_from_slice(&flow.src_port.to_be_bytes());
    udp.extend_from_slice(&flow.dst_port.to_be_bytes());
    udp.extend_from_slice(&((8 + 8 + inner.len()) as u16).to_be_bytes());
    udp.extend_from_slice(&[0, 0]);
    udp.extend_from_slice(&[0x08, 0, 0, 0]);
    udp.extend_from_slice(&(vx.vni << 8).to_be_bytes());
    udp.extend_from_slice(&inner);

    if vx.udp_csum {
        let csum = l4_checksum(&flow.src_ip, &flow.dst_ip, IPPROTO_UDP, &udp);
        udp[6..8].copy_from_slice(&csum.to_be_bytes());
    }

    ip_frame(flow, IPPROTO_UDP, &udp)
}

/// The TCP segment a receiver would see if `segs`, consecutive and in
/// order, had been sent as one: the first segment's sequence number,
/// the last one's ACK, window, and timestamp, every flag, and all the
/// payload.
pub fn coalesce(segs: &[TcpSeg]) -> TcpSeg {
    let mut out = segs[0].clone();
    for s in &segs[1..] {
        out.ack = s.ack;
        out.window = s.window;
        out.flags |= s.flags;
        out.ts = s.ts.or(out.ts);
        out.payload.extend_from_slice(&s.payload);
    }
    out
}

/// Consecutive data segments of the given payload lengths, starting
/// at `seq`, with recognizable payload bytes.
pub fn data_run(seq: u32, lens: &[usize]) -> Vec<TcpSeg> {
    let mut next = seq;
    lens.iter()
        .map(|&len| {
            let payload: Vec<u8> =
                (0..len).map(|i| (next as usize + i) as u8 ^ 0x5A).collect();
            let seg = TcpSeg::data(next, &payload);
            next = next.wrapping_add(len as u32);
            seg
        })
        .collect()
}

/// What a test wants to know about a TCP frame.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TcpView {
    pub l3_off: usize,
    pub tcp_off: usize,
    pub v6: bool,
    pub src_ip: IpAddr,
    pub dst_ip: IpAddr,
    pub seq: u32,
    pub ack: u32,
    pub flags: u8,
    pub window: u16,
    pub csum: u16,
    pub ts: Option<(u32, u32)>,
    pub payload: Vec<u8>,
}

fn be16(b: &[u8], off: usize) -> u16 {
    u16::from_be_bytes([b[off], b[off + 1]])
}

fn be32(b: &[u8], off: usize) -> u32 {
    u32::from_be_bytes([b[off], b[off + 1], b[off + 2], b[off + 3]])
}

/// Read back the innermost TCP segment of an Ethernet frame. Panics
/// on anything else.
pub fn tcp_view(frame: &[u8]) -> TcpView {
    let mut off = 12;
    let mut etype = be16(frame, off);
    if etype == ETHER_TYPE_VLAN {
        off += 4;
        etype = be16(frame, off);
    }
    tcp_view_l3(frame, off + 2, etype == ETHER_TYPE_IPV6)
}

/// As [`tcp_view`], for a packet starting at its IP header.
pub fn tcp_view_ip(pkt: &[u8]) -> TcpView {
    tcp_view_l3(pkt, 0, pkt[0] >> 4 == 6)
}

fn tcp_view_l3(b: &[u8], l3: usize, v6: bool) -> TcpView {
    let (l4, end, proto, src_ip, dst_ip) = if v6 {
        let src: [u8; 16] = b[l3 + 8..l3 + 24].try_into().unwrap();
        let dst: [u8; 16] = b[l3 + 24..l3 + 40].try_into().unwrap();
        (
            l3 + 40,
            l3 + 40 + usize::from(be16(b, l3 + 4)),
            b[l3 + 6],
            IpAddr::V6(Ipv6Addr::from(src)),
            IpAddr::V6(Ipv6Addr::from(dst)),
        )
    } else {
        let src: [u8; 4] = b[l3 + 12..l3 + 16].try_into().unwrap();
        let dst: [u8; 4] = b[l3 + 16..l3 + 20].try_into().unwrap();
        (
            l3 + usize::from(b[l3] & 0x0F) * 4,
            l3 + usize::from(be16(b, l3 + 2)),
            b[l3 + 9],
            IpAddr::V4(Ipv4Addr::from(src)),
            IpAddr::V4(Ipv4Addr::from(dst)),
        )
    };

    if proto == IPPROTO_UDP {
        assert_eq!(be16(b, l4 + 2), VXLAN_PORT, "not a VXLAN frame");
        return tcp_view(&b[l4 + 16..end]);
    }
    assert_eq!(proto, IPPROTO_TCP);

    let hlen = usize::from(b[l4 + 12] >> 4) * 4;
    let opts = &b[l4 + 20..l4 + hlen];
    let ts = (opts.len() >= 12 && opts[..4] == [1, 1, 8, 10])
        .then(|| (be32(opts, 4), be32(opts, 8)));

    TcpView {
        l3_off: l3,
        tcp_off: l4,
        v6,
        src_ip,
        dst_ip,
        seq: be32(b, l4 + 4),
        ack: be32(b, l4 + 8),
        flags: b[l4 + 13],
        window: be16(b, l4 + 14),
        csum: be16(b, l4 + 16),
        ts,
        payload: b[l4 + hlen..end].to_vec(),
    }
}
