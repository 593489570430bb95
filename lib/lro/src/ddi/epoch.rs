// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Deferred reclamation.
//!
//! Readers bracket lock-free access to shared objects with an
//! [`EpochGuard`]. A writer that has unlinked an object hands its
//! teardown to [`NetEpoch::call`], which runs it once no guard is
//! outstanding. Memory safety of the object itself comes from `Arc`;
//! the epoch orders the *teardown side effects* (releasing hardware
//! resources) after every reader that might still act on them.
use crate::ddi::sync::KMutex;
use core::sync::atomic::AtomicUsize;
use core::sync::atomic::Ordering;

type Deferred = Box<dyn FnOnce() + Send>;

pub struct NetEpoch {
    readers: AtomicUsize,
    deferred: KMutex<Vec<Deferred>>,
}

/// An active read-side section. Dropping the last guard runs any
/// teardown queued while readers were present.
pub struct EpochGuard<'a> {
    epoch: &'a NetEpoch,
}

impl Drop for EpochGuard<'_> {
    fn drop(&mut self) {
        if self.epoch.readers.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.epoch.run_deferred();
        }
    }
}

impl NetEpoch {
    pub fn new() -> Self {
        Self { readers: AtomicUsize::new(0), deferred: KMutex::new(vec![]) }
    }

    pub fn enter(&self) -> EpochGuard<'_> {
        self.readers.fetch_add(1, Ordering::AcqRel);
        EpochGuard { epoch: self }
    }

    /// Run `f` once no read-side section is active.
    pub fn call<F: FnOnce() + Send + 'static>(&self, f: F) {
        self.deferred.lock().push(Box::new(f));

        if self.readers.load(Ordering::Acquire) == 0 {
            self.run_deferred();
        }
    }

    /// Number of callbacks still waiting on readers.
    pub fn pending(&self) -> usize {
        self.deferred.lock().len()
    }

    fn run_deferred(&self) {
        // Take the queue under the lock but run it outside, so a
        // callback may itself defer more work.
        let work = core::mem::take(&mut *self.deferred.lock());
        for f in work {
            f();
        }
    }
}

impl Default for NetEpoch {
    fn default() -> Self {
        Self::new()
    }
}
