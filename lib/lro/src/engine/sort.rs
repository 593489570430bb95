// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! The batch sorter.
//!
//! A burst of received packets is ordered by a 64-bit key built from
//! the NIC's flow hash and the arrival index, so that each flow's
//! packets are fed to the engine back to back and in arrival order.
//!
//! This is a most-significant-bit-first radix partition. Each pass
//! finds the highest bit which is not the same in every key, moves
//! keys with that bit clear in front of those with it set, and
//! recurses into both halves. Every level of recursion works on
//! strictly lower bits than its parent, so there are at most 64
//! levels of O(N) work each. Short runs are finished by insertion
//! sort.

use crate::ddi::mbuf::Mbuf;

const INSERTION_SORT_MAX: usize = 12;

pub trait SortKey {
    fn sort_key(&self) -> u64;
}

impl SortKey for u64 {
    fn sort_key(&self) -> u64 {
        *self
    }
}

/// A packet waiting in the engine's batch buffer.
#[derive(Debug)]
pub struct LroMbufSort {
    pub seq: u64,
    pub mb: Mbuf,
}

impl SortKey for LroMbufSort {
    fn sort_key(&self) -> u64 {
        self.seq
    }
}

fn insertion_sort<T: SortKey>(arr: &mut [T]) {
    for x in 1..arr.len() {
        let mut y = x;
        while y > 0 && arr[y].sort_key() < arr[y - 1].sort_key() {
            arr.swap(y, y - 1);
            y -= 1;
        }
    }
}

/// Sort `arr` by key, returning the number of partition levels used.
pub fn lro_sort<T: SortKey>(arr: &mut [T]) -> u32 {
    if arr.len() <= INSERTION_SORT_MAX {
        insertion_sort(arr);
        return 0;
    }

    let mut ones = 0u64;
    let mut zeros = 0u64;
    for e in arr.iter() {
        ones |= e.sort_key();
        zeros |= !e.sort_key();
    }

    // Bits which differ between at least two keys.
    let varying = ones & zeros;
    if varying == 0 {
        return 0;
    }

    let msb = 1u64 << (63 - varying.leading_zeros());

    let mut x = 0;
    for y in 0..arr.len() {
        if arr[y].sort_key() & msb == 0 {
            arr.swap(x, y);
            x += 1;
        }
    }

    debug_assert!(x != 0 && x != arr.len());
    let (lo, hi) = arr.split_at_mut(x);
    1 + lro_sort(lo).max(lro_sort(hi))
}
