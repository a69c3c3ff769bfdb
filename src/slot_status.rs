// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Bit-packed atomic slot status cell.
//!
//! One [`SlotStatusAtomic`] sits alongside each data-slot payload in shared
//! memory. It encodes, in a single lock-free 64-bit word, everything a
//! writer or reader needs to know about that slot without ever taking a
//! lock: whether it is free, in the middle of being written, or published
//! with a timestamp and live reference count.

use crate::ids::{Timestamp, TIMESTAMP_INVALID, TIMESTAMP_MAX};
use std::sync::atomic::{AtomicU64, Ordering};

const REFCOUNT_BITS: u32 = 16;
const REFCOUNT_MASK: u64 = (1 << REFCOUNT_BITS) - 1;
const IN_WRITING_BIT: u64 = 1 << 16;
const INVALID_BIT: u64 = 1 << 17;
const TIMESTAMP_SHIFT: u32 = 32;

/// Decoded view of a [`SlotStatusAtomic`]'s value at one instant.
///
/// This is a snapshot, not a handle — the underlying atomic may have
/// changed again by the time code inspects this value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotStatus {
    raw: u64,
}

impl SlotStatus {
    /// The canonical "slot is free" value: invalid, no writer, no readers,
    /// timestamp sentinel.
    pub const FREE: SlotStatus = SlotStatus {
        raw: INVALID_BIT | ((TIMESTAMP_INVALID as u64) << TIMESTAMP_SHIFT),
    };

    fn encode(timestamp: Timestamp, refcount: u16, in_writing: bool, invalid: bool) -> u64 {
        let mut raw = (timestamp as u64) << TIMESTAMP_SHIFT;
        raw |= refcount as u64 & REFCOUNT_MASK;
        if in_writing {
            raw |= IN_WRITING_BIT;
        }
        if invalid {
            raw |= INVALID_BIT;
        }
        raw
    }

    /// Value for a slot that has just been reserved for writing.
    #[must_use]
    pub fn in_writing() -> Self {
        Self {
            raw: Self::encode(TIMESTAMP_INVALID, 0, true, false),
        }
    }

    /// Value for a freshly published slot: given timestamp, zero references.
    #[must_use]
    pub fn ready(timestamp: Timestamp) -> Self {
        Self {
            raw: Self::encode(timestamp, 0, false, false),
        }
    }

    #[must_use]
    fn from_raw(raw: u64) -> Self {
        Self { raw }
    }

    #[must_use]
    pub fn timestamp(self) -> Timestamp {
        (self.raw >> TIMESTAMP_SHIFT) as Timestamp
    }

    #[must_use]
    pub fn refcount(self) -> u16 {
        (self.raw & REFCOUNT_MASK) as u16
    }

    #[must_use]
    pub fn is_in_writing(self) -> bool {
        self.raw & IN_WRITING_BIT != 0
    }

    #[must_use]
    pub fn is_invalid(self) -> bool {
        self.raw & INVALID_BIT != 0
    }

    /// A slot is eligible for reference acquisition or reallocation when it
    /// is neither mid-write nor marked invalid.
    #[must_use]
    pub fn is_usable(self) -> bool {
        !self.is_in_writing() && !self.is_invalid()
    }

    /// Whether `self`'s timestamp lies strictly after `reference` and
    /// strictly before `upper_limit`. Free/invalid/in-writing slots never
    /// match: a free slot's timestamp sentinel is `TIMESTAMP_INVALID` (0),
    /// which cannot be `> reference` for any `reference` a caller would pass
    /// (callers start scans from 0 or a previously observed timestamp).
    ///
    /// The upper bound must stay exclusive: `reference_next_event` narrows
    /// `upper_limit` down to the timestamp of the slot it just picked on
    /// each successive call, and an inclusive bound would re-select that
    /// same slot forever instead of walking further down.
    #[must_use]
    pub fn is_timestamp_between(self, reference: Timestamp, upper_limit: Timestamp) -> bool {
        self.is_usable() && self.timestamp() > reference && self.timestamp() < upper_limit
    }

    /// `self` with its refcount lane incremented by one, timestamp and flags
    /// unchanged. Callers are responsible for checking `refcount() !=
    /// u16::MAX` first; this mirrors the bit arithmetic `try_increment_refcount`
    /// already performs, exposed for CAS loops that compute the next value
    /// themselves (`ReferenceSpecificEvent`/`ReferenceNextEvent`).
    #[must_use]
    pub fn incremented_refcount(self) -> Self {
        Self { raw: self.raw + 1 }
    }
}

/// Lock-free, `repr(C)` shared-memory cell holding one slot's [`SlotStatus`].
///
/// Every mutation is either a plain atomic store (writer side, single
/// writer invariant) or a compare-and-swap (reader side, contended).
#[repr(C)]
pub struct SlotStatusAtomic {
    raw: AtomicU64,
}

impl SlotStatusAtomic {
    #[must_use]
    pub fn new(status: SlotStatus) -> Self {
        Self {
            raw: AtomicU64::new(status.raw),
        }
    }

    #[must_use]
    pub fn free() -> Self {
        Self::new(SlotStatus::FREE)
    }

    /// Relaxed load — used for advisory scans (`GetNumNewEvents`,
    /// `AllocateNextSlot`'s candidate search, `ReferenceNextEvent`'s scan).
    #[must_use]
    pub fn load_relaxed(&self) -> SlotStatus {
        SlotStatus::from_raw(self.raw.load(Ordering::Relaxed))
    }

    /// Acquire load, used where a reader must observe a happens-before
    /// relationship with the writer's `EventReady` release store.
    #[must_use]
    pub fn load_acquire(&self) -> SlotStatus {
        SlotStatus::from_raw(self.raw.load(Ordering::Acquire))
    }

    /// Plain store with release ordering. Only the single skeleton writer
    /// may call this — there is no CAS because no other participant ever
    /// mutates an in-writing slot.
    pub fn store_release(&self, status: SlotStatus) {
        self.raw.store(status.raw, Ordering::Release);
    }

    /// Attempt to transition from `current` to `new` via CAS.
    ///
    /// Returns `Ok(())` on success, `Err(actual)` with the observed value on
    /// failure so callers can decide whether to retry against fresh state.
    pub fn compare_exchange(
        &self,
        current: SlotStatus,
        new: SlotStatus,
        success: Ordering,
        failure: Ordering,
    ) -> Result<(), SlotStatus> {
        self.raw
            .compare_exchange(current.raw, new.raw, success, failure)
            .map(|_| ())
            .map_err(SlotStatus::from_raw)
    }

    /// Increment the refcount by one via CAS against a freshly-loaded
    /// current value, failing if the slot is not usable or the refcount
    /// would overflow its 16-bit lane.
    pub fn try_increment_refcount(&self) -> Option<SlotStatus> {
        let current = self.load_acquire();
        if !current.is_usable() {
            return None;
        }
        if current.refcount() == u16::MAX {
            return None;
        }
        let next = SlotStatus {
            raw: current.raw + 1,
        };
        self.compare_exchange(current, next, Ordering::AcqRel, Ordering::Relaxed)
            .ok()?;
        Some(next)
    }

    /// Decrement the refcount by one, release ordering, fetch-style (no CAS
    /// needed: only the refcount lane changes and subtraction never
    /// produces a borrow across lane boundaries as long as refcount > 0).
    pub fn decrement_refcount(&self) -> SlotStatus {
        let prev = self.raw.fetch_sub(1, Ordering::AcqRel);
        SlotStatus::from_raw(prev - 1)
    }

    /// Mark an in-writing slot invalid via CAS. Returns `false` if the slot
    /// was not found still in-writing (meaning it was already published —
    /// caller must leave it untouched).
    pub fn mark_invalid_if_in_writing(&self) -> bool {
        let current = self.load_acquire();
        if !current.is_in_writing() {
            return false;
        }
        let new = SlotStatus {
            raw: SlotStatus::encode(TIMESTAMP_INVALID, 0, false, true),
        };
        self.compare_exchange(current, new, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
    }

    /// Clear the in-writing flag via CAS against an observed value, used by
    /// `RemoveAllocationsForWriting`. Returns `false` (and leaves the cell
    /// untouched) if the slot was not in-writing, and `None` semantics are
    /// left to the caller: a CAS failure here (the value changed under us)
    /// is the condition the caller treats as fatal.
    pub fn clear_in_writing(&self) -> Result<bool, SlotStatus> {
        let current = self.load_acquire();
        if !current.is_in_writing() {
            return Ok(false);
        }
        let new = SlotStatus {
            raw: SlotStatus::encode(TIMESTAMP_INVALID, 0, false, true),
        };
        self.compare_exchange(current, new, Ordering::AcqRel, Ordering::Relaxed)
            .map(|()| true)
    }
}
