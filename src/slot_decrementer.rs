// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! RAII reference guard and the `SamplePtr` handed back to applications.

use crate::event_data_control::EventDataControl;
use crate::ids::{SlotIndex, TransactionLogIndex};
use std::ops::Deref;

/// Owns one live reference acquired via `ReferenceNextEvent`/`ReferenceSpecificEvent`.
///
/// Dereferences the slot on drop. Rust's move semantics already give this
/// the "moved-from guard does nothing" behavior the original hand-rolls via
/// a nulled-out pointer, so there is nothing left to null out here.
pub struct SlotDecrementer<'a> {
    event_data_control: &'a EventDataControl,
    slot_index: SlotIndex,
    transaction_log_index: TransactionLogIndex,
}

impl<'a> SlotDecrementer<'a> {
    #[must_use]
    pub fn new(event_data_control: &'a EventDataControl, slot_index: SlotIndex, transaction_log_index: TransactionLogIndex) -> Self {
        Self {
            event_data_control,
            slot_index,
            transaction_log_index,
        }
    }

    #[must_use]
    pub fn slot_index(&self) -> SlotIndex {
        self.slot_index
    }
}

impl Drop for SlotDecrementer<'_> {
    fn drop(&mut self) {
        self.event_data_control.dereference_event(self.slot_index, self.transaction_log_index);
    }
}

/// Handle to one received sample, returned to applications by `GetNewSamples`.
///
/// Borrows the sample's payload for as long as it lives; dropping it
/// releases the underlying slot reference via its embedded
/// [`SlotDecrementer`]. There is no owned-copy constructor by design — a
/// `SamplePtr` is valid only for as long as the shared-memory mapping it
/// borrows from is.
pub struct SamplePtr<'a, T> {
    inner: Option<(&'a T, SlotDecrementer<'a>)>,
}

impl<'a, T> SamplePtr<'a, T> {
    /// An invalid `SamplePtr` owning no managed object.
    #[must_use]
    pub fn invalid() -> Self {
        Self { inner: None }
    }

    #[must_use]
    pub fn new(value: &'a T, decrementer: SlotDecrementer<'a>) -> Self {
        Self {
            inner: Some((value, decrementer)),
        }
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.inner.is_some()
    }

    #[must_use]
    pub fn get(&self) -> Option<&'a T> {
        self.inner.as_ref().map(|(value, _)| *value)
    }

    #[must_use]
    pub fn slot_index(&self) -> Option<SlotIndex> {
        self.inner.as_ref().map(|(_, decrementer)| decrementer.slot_index())
    }
}

impl<T> Default for SamplePtr<'_, T> {
    fn default() -> Self {
        Self::invalid()
    }
}

impl<'a, T> Deref for SamplePtr<'a, T> {
    type Target = T;

    /// Panics if this `SamplePtr` is invalid — matching the original's
    /// `operator*` contract, which is only ever called after an
    /// `operator bool()` validity check.
    fn deref(&self) -> &T {
        self.get().expect("SamplePtr::deref called on an invalid SamplePtr")
    }
}
