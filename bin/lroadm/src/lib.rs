// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! LRO administration library.
//!
//! Everything here runs the engine in-process: captures are replayed
//! through an [`lro::engine::LroCtrl`] delivering into a recording
//! stack, and rate selection runs against an interface described by a
//! capability file.

pub mod capture;
pub mod pacing;
pub mod replay;

use lro::api::LroCfg;
use lro::api::LroError;
use lro::api::RlError;
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed capture: {0}")]
    Capture(String),

    #[error("failed to parse {path}: {err}")]
    Parse { path: String, err: toml::de::Error },

    #[error("failed to serialize: {0}")]
    Serialize(String),

    #[error(transparent)]
    Lro(#[from] LroError),

    #[error(transparent)]
    RateLimit(#[from] RlError),
}

/// Read a TOML file into `T`.
pub fn load_toml<T: serde::de::DeserializeOwned>(
    path: &Path,
) -> Result<T, Error> {
    let text = fs::read_to_string(path)?;
    toml::from_str(&text).map_err(|err| Error::Parse {
        path: path.display().to_string(),
        err,
    })
}

/// The engine configuration in `path`, or the defaults. Fields the
/// file leaves out take their default values.
pub fn load_cfg(path: Option<&Path>) -> Result<LroCfg, Error> {
    let cfg = match path {
        Some(path) => load_toml(path)?,
        None => LroCfg::default(),
    };

    cfg.validate()?;
    Ok(cfg)
}

/// Render a configuration the way [`load_cfg`] reads it.
pub fn cfg_to_toml(cfg: &LroCfg) -> Result<String, Error> {
    toml::to_string(cfg).map_err(|e| Error::Serialize(e.to_string()))
}
