// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

use libc::c_int;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

/// Reasons the LRO engine declined a packet.
///
/// Apart from `BadChecksum`, every variant leaves the packet with the
/// caller, who is expected to hand it to ordinary input processing.
#[derive(Clone, Debug, Deserialize, Eq, Error, PartialEq, Serialize)]
pub enum LroError {
    #[error("packet cannot be aggregated")]
    CannotProcess,

    #[error("packet headers are not supported")]
    NotSupported,

    #[error("flow entry pool exhausted")]
    NoEntries,

    #[error("packet failed checksum validation")]
    BadChecksum,

    #[error("invalid LRO configuration: {0}")]
    BadConfig(String),
}

impl LroError {
    /// Convert to an errno value.
    pub fn to_errno(&self) -> c_int {
        match self {
            Self::CannotProcess => libc::EINVAL,
            Self::NotSupported => libc::EOPNOTSUPP,
            Self::NoEntries => libc::ENOSPC,
            Self::BadChecksum => libc::EBADMSG,
            Self::BadConfig(_) => libc::EINVAL,
        }
    }
}

/// Errors from the hardware rate-limit selector.
///
/// These are reported to the TCP output path, which falls back to
/// software pacing; none of them prevents a connection from sending.
#[derive(Clone, Debug, Deserialize, Eq, Error, PartialEq, Serialize)]
pub enum RlError {
    #[error("out of memory allocating rate state")]
    NoMem,

    #[error("interface cannot pace in hardware")]
    NoDev,

    #[error("interface flow limit reached")]
    NoSpace,

    #[error("interface does not support rate limiting")]
    NotSupported,

    #[error("no suitable hardware rate")]
    NoEnt,

    #[error("invalid pacing request")]
    Inval,

    #[error("driver error: errno {0}")]
    Hardware(c_int),
}

impl RlError {
    /// Convert to an errno value.
    pub fn to_errno(&self) -> c_int {
        match self {
            Self::NoMem => libc::ENOMEM,
            Self::NoDev => libc::ENODEV,
            Self::NoSpace => libc::ENOSPC,
            Self::NotSupported => libc::EOPNOTSUPP,
            Self::NoEnt => libc::ENOENT,
            Self::Inval => libc::EINVAL,
            Self::Hardware(errno) => *errno,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn errno_mapping() {
        assert_eq!(RlError::NoMem.to_errno(), libc::ENOMEM);
        assert_eq!(RlError::NoDev.to_errno(), libc::ENODEV);
        assert_eq!(RlError::NoSpace.to_errno(), libc::ENOSPC);
        assert_eq!(RlError::NotSupported.to_errno(), libc::EOPNOTSUPP);
        assert_eq!(RlError::Hardware(libc::EIO).to_errno(), libc::EIO);
        assert_eq!(LroError::NoEntries.to_errno(), libc::ENOSPC);
    }

    #[test]
    fn serde_round_trip() {
        let e = LroError::BadConfig("entries must be non-zero".into());
        let s = serde_json::to_string(&e).unwrap();
        let back: LroError = serde_json::from_str(&s).unwrap();
        assert_eq!(e, back);
    }
}
