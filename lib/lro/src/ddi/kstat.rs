// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Named statistics.
//!
//! A statistics struct is a set of [`KStatU64`] fields with
//! `#[derive(KStatProvider)]`, which also generates a plain snapshot
//! type for reporting.
use core::sync::atomic::AtomicU64;
use core::sync::atomic::Ordering;

pub use kstat_macro::KStatProvider;

/// A type which can be registered as a named set of statistics.
pub trait KStatProvider {
    const NUM_FIELDS: u32;
    type Snap;

    fn new() -> Self;
    fn snapshot(&self) -> Self::Snap;
    fn reset(&mut self);
}

/// A [`KStatProvider`] registered under a module and a name.
pub struct KStatNamed<T: KStatProvider> {
    module: String,
    name: String,
    pub vals: T,
}

impl<T: KStatProvider> KStatNamed<T> {
    pub fn new(module: &str, name: &str) -> Self {
        Self {
            module: module.to_string(),
            name: name.to_string(),
            vals: T::new(),
        }
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn snapshot(&self) -> T::Snap {
        self.vals.snapshot()
    }
}

/// A 64-bit unsigned named counter.
///
/// Single-owner paths bump it with `+=`; shared paths use
/// [`KStatU64::incr`] through a shared reference.
#[derive(Debug)]
pub struct KStatU64 {
    name: &'static str,
    value: AtomicU64,
}

impl KStatU64 {
    pub fn new(name: &'static str) -> Self {
        Self { name, value: AtomicU64::new(0) }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn incr(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    pub fn decr(&self, n: u64) {
        self.value.fetch_sub(n, Ordering::Relaxed);
    }

    pub fn set(&mut self, val: u64) {
        *self.value.get_mut() = val;
    }

    pub fn val(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

impl core::ops::AddAssign<u64> for KStatU64 {
    fn add_assign(&mut self, other: u64) {
        *self.value.get_mut() += other;
    }
}

impl core::ops::SubAssign<u64> for KStatU64 {
    fn sub_assign(&mut self, other: u64) {
        *self.value.get_mut() -= other;
    }
}
