// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Reading and writing packet capture files.

use crate::Error;
use pcap_parser::Linktype;
use pcap_parser::ToVec;
use pcap_parser::pcap;
use pcap_parser::pcap::LegacyPcapBlock;
use pcap_parser::pcap::PcapHeader;
use std::io::Write;

const PCAP_MAGIC: u32 = 0xa1b2c3d4;
const SNAPLEN: u32 = 65535;

/// One captured Ethernet frame.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Frame {
    pub ts_sec: u32,
    pub ts_usec: u32,
    pub data: Vec<u8>,
}

/// Parse every frame of a capture held in `buf`.
///
/// Only Ethernet captures are accepted, and every frame must have been
/// captured whole.
pub fn read_pcap(buf: &[u8]) -> Result<Vec<Frame>, Error> {
    let (mut rest, hdr) = pcap::parse_pcap_header(buf)
        .map_err(|e| Error::Capture(format!("bad header: {e:?}")))?;

    if hdr.network != Linktype::ETHERNET {
        return Err(Error::Capture(format!(
            "unsupported link type {:?}",
            hdr.network
        )));
    }

    let mut frames = vec![];
    while !rest.is_empty() {
        let res = if hdr.is_bigendian() {
            pcap::parse_pcap_frame_be(rest)
        } else {
            pcap::parse_pcap_frame(rest)
        };

        let (next, block) = res.map_err(|e| {
            Error::Capture(format!("bad frame {}: {e:?}", frames.len()))
        })?;

        if block.caplen != block.origlen {
            return Err(Error::Capture(format!(
                "frame {} truncated to {} of {} bytes",
                frames.len(),
                block.caplen,
                block.origlen
            )));
        }

        frames.push(Frame {
            ts_sec: block.ts_sec,
            ts_usec: block.ts_usec,
            data: block.data.to_vec(),
        });
        rest = next;
    }

    Ok(frames)
}

/// Build a packet capture from a series of frames.
pub struct PcapWriter<W: Write> {
    out: W,
}

impl<W: Write> PcapWriter<W> {
    pub fn new(mut out: W) -> Result<Self, Error> {
        let mut hdr = PcapHeader {
            magic_number: PCAP_MAGIC,
            version_major: 2,
            version_minor: 4,
            thiszone: 0,
            sigfigs: 0,
            snaplen: SNAPLEN,
            network: Linktype::ETHERNET,
        };

        let bytes =
            hdr.to_vec().map_err(|e| Error::Serialize(format!("{e:?}")))?;
        out.write_all(&bytes)?;
        Ok(Self { out })
    }

    /// Append a frame stamped with `ts_sec`/`ts_usec`.
    pub fn add(
        &mut self,
        data: &[u8],
        ts_sec: u32,
        ts_usec: u32,
    ) -> Result<(), Error> {
        let len = u32::try_from(data.len()).map_err(|_| {
            Error::Capture(format!("{} byte frame", data.len()))
        })?;
        let mut block = LegacyPcapBlock {
            ts_sec,
            ts_usec,
            caplen: len,
            origlen: len,
            data,
        };

        let bytes =
            block.to_vec().map_err(|e| Error::Serialize(format!("{e:?}")))?;
        self.out.write_all(&bytes)?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}
