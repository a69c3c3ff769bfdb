// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-participant write-ahead log of in-flight reference mutations.
//!
//! A [`TransactionLog`] is what lets a survivor correctly roll back a
//! crashed peer's in-flight refcount and subscription mutations: every
//! mutation of shared state is journaled here *before* the CAS that
//! commits it, so a process that dies mid-mutation leaves an unambiguous
//! trace of exactly how far it got.

use crate::error::LolaError;
use crate::ids::{MaxSampleCount, SlotIndex};
use std::sync::atomic::{AtomicBool, Ordering};

/// Two independent atomic booleans recording one slot's begin/end markers.
///
/// `(false, false)` idle, `(true, false)` increment-in-progress,
/// `(true, true)` reference held, `(false, true)` decrement-in-progress.
/// Any state but the first two represents a legal committed/in-flight point;
/// a log left in increment- or decrement-in-progress when its owner is
/// found dead means the mutation cannot be unambiguously reversed.
#[repr(C)]
pub struct TransactionLogSlot {
    begin: AtomicBool,
    end: AtomicBool,
}

impl TransactionLogSlot {
    #[must_use]
    pub fn new() -> Self {
        Self {
            begin: AtomicBool::new(false),
            end: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn get_begin(&self) -> bool {
        self.begin.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn get_end(&self) -> bool {
        self.end.load(Ordering::Acquire)
    }

    pub fn set_begin(&self, value: bool) {
        self.begin.store(value, Ordering::Release);
    }

    pub fn set_end(&self, value: bool) {
        self.end.store(value, Ordering::Release);
    }
}

impl Default for TransactionLogSlot {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-participant transaction log: one [`TransactionLogSlot`] per data
/// slot, plus a dedicated subscribe/unsubscribe marker and the
/// `max_sample_count` that marker's eventual unsubscribe callback needs.
pub struct TransactionLog {
    reference_count_slots: Vec<TransactionLogSlot>,
    subscribe_marker: TransactionLogSlot,
    subscription_max_sample_count: Option<MaxSampleCount>,
}

impl TransactionLog {
    #[must_use]
    pub fn new(number_of_slots: usize) -> Self {
        Self {
            reference_count_slots: (0..number_of_slots).map(|_| TransactionLogSlot::new()).collect(),
            subscribe_marker: TransactionLogSlot::new(),
            subscription_max_sample_count: None,
        }
    }

    pub fn subscribe_transaction_begin(&mut self, max_sample_count: MaxSampleCount) {
        debug_assert!(!self.subscribe_marker.get_begin());
        debug_assert!(!self.subscribe_marker.get_end());
        self.subscribe_marker.set_begin(true);
        self.subscription_max_sample_count = Some(max_sample_count);
    }

    pub fn subscribe_transaction_commit(&self) {
        debug_assert!(self.subscribe_marker.get_begin());
        debug_assert!(!self.subscribe_marker.get_end());
        self.subscribe_marker.set_end(true);
    }

    pub fn subscribe_transaction_abort(&self) {
        debug_assert!(self.subscribe_marker.get_begin());
        debug_assert!(!self.subscribe_marker.get_end());
        self.subscribe_marker.set_begin(false);
    }

    pub fn unsubscribe_transaction_begin(&self) {
        debug_assert!(self.subscribe_marker.get_begin());
        debug_assert!(self.subscribe_marker.get_end());
        self.subscribe_marker.set_end(false);
    }

    pub fn unsubscribe_transaction_commit(&mut self) {
        debug_assert!(self.subscribe_marker.get_begin());
        debug_assert!(!self.subscribe_marker.get_end());
        self.subscription_max_sample_count = None;
        self.subscribe_marker.set_begin(false);
    }

    pub fn reference_transaction_begin(&self, slot_index: SlotIndex) {
        let slot = &self.reference_count_slots[slot_index];
        debug_assert!(!slot.get_begin());
        debug_assert!(!slot.get_end());
        slot.set_begin(true);
    }

    pub fn reference_transaction_commit(&self, slot_index: SlotIndex) {
        let slot = &self.reference_count_slots[slot_index];
        debug_assert!(slot.get_begin());
        debug_assert!(!slot.get_end());
        slot.set_end(true);
    }

    pub fn reference_transaction_abort(&self, slot_index: SlotIndex) {
        let slot = &self.reference_count_slots[slot_index];
        debug_assert!(slot.get_begin());
        debug_assert!(!slot.get_end());
        slot.set_begin(false);
    }

    pub fn dereference_transaction_begin(&self, slot_index: SlotIndex) {
        let slot = &self.reference_count_slots[slot_index];
        debug_assert!(slot.get_begin());
        debug_assert!(slot.get_end());
        slot.set_begin(false);
    }

    pub fn dereference_transaction_commit(&self, slot_index: SlotIndex) {
        let slot = &self.reference_count_slots[slot_index];
        debug_assert!(!slot.get_begin());
        debug_assert!(slot.get_end());
        slot.set_end(false);
    }

    /// Roll back every increment this log recorded, then the subscription
    /// itself, calling `dereference_slot` / `unsubscribe` for each
    /// successfully-committed transaction found. Used when recreating a
    /// proxy service element after its previous incarnation crashed.
    pub fn rollback_proxy_element_log(
        &mut self,
        mut dereference_slot: impl FnMut(SlotIndex),
        mut unsubscribe: impl FnMut(MaxSampleCount),
    ) -> Result<(), LolaError> {
        let no_subscribe_recorded = !self.subscribe_marker.get_begin() && !self.subscribe_marker.get_end();
        if no_subscribe_recorded {
            debug_assert!(
                !does_log_contain_increment_or_decrement_transactions(&self.reference_count_slots),
                "all slot increment transactions should be reversed before calling unsubscribe"
            );
        }

        self.rollback_increment_transactions(&mut dereference_slot)?;
        self.rollback_subscribe_transactions(&mut unsubscribe)
    }

    /// Roll back every increment this log recorded, without touching the
    /// subscription marker. Used for the skeleton-tracing log, which never
    /// subscribes.
    pub fn rollback_skeleton_tracing_element_log(
        &mut self,
        mut dereference_slot: impl FnMut(SlotIndex),
    ) -> Result<(), LolaError> {
        self.rollback_increment_transactions(&mut dereference_slot)
    }

    fn rollback_increment_transactions(
        &self,
        dereference_slot: &mut impl FnMut(SlotIndex),
    ) -> Result<(), LolaError> {
        for slot_idx in 0..self.reference_count_slots.len() {
            let slot = &self.reference_count_slots[slot_idx];
            let was_successfully_incremented = slot.get_begin() && slot.get_end();
            let crashed_while_incrementing = slot.get_begin() && !slot.get_end();
            let crashed_while_decrementing = !slot.get_begin() && slot.get_end();

            if was_successfully_incremented {
                self.dereference_transaction_begin(slot_idx);
                dereference_slot(slot_idx);
                self.dereference_transaction_commit(slot_idx);
            } else if crashed_while_incrementing {
                log::error!(
                    "could not rollback transaction log: peer crashed while incrementing slot {slot_idx}"
                );
                return Err(LolaError::CouldNotRestartProxy);
            } else if crashed_while_decrementing {
                log::error!(
                    "could not rollback transaction log: peer crashed while decrementing slot {slot_idx}"
                );
                return Err(LolaError::CouldNotRestartProxy);
            }
        }
        Ok(())
    }

    fn rollback_subscribe_transactions(
        &mut self,
        unsubscribe: &mut impl FnMut(MaxSampleCount),
    ) -> Result<(), LolaError> {
        let was_successfully_recorded = self.subscribe_marker.get_begin() && self.subscribe_marker.get_end();
        let crashed_while_subscribing = self.subscribe_marker.get_begin() && !self.subscribe_marker.get_end();
        let crashed_while_unsubscribing = !self.subscribe_marker.get_begin() && self.subscribe_marker.get_end();

        if was_successfully_recorded {
            self.unsubscribe_transaction_begin();
            unsubscribe(self.subscription_max_sample_count.expect(
                "subscription_max_sample_count set whenever subscribe marker is (true, true)",
            ));
            self.unsubscribe_transaction_commit();
        } else if crashed_while_subscribing {
            log::error!("could not rollback transaction log: peer crashed while calling Subscribe");
            return Err(LolaError::CouldNotRestartProxy);
        } else if crashed_while_unsubscribing {
            log::error!("could not rollback transaction log: peer crashed while calling Unsubscribe");
            return Err(LolaError::CouldNotRestartProxy);
        }
        Ok(())
    }

    /// Whether any subscribe or reference transaction remains unfinished.
    /// Must be false before the log can be reused by a new registration.
    #[must_use]
    pub fn contains_transactions(&self) -> bool {
        let contains_subscribe = self.subscribe_marker.get_begin() || self.subscribe_marker.get_end();
        contains_subscribe || does_log_contain_increment_or_decrement_transactions(&self.reference_count_slots)
    }
}

fn does_log_contain_increment_or_decrement_transactions(slots: &[TransactionLogSlot]) -> bool {
    slots.iter().any(|slot| slot.get_begin() || slot.get_end())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_log_has_no_transactions() {
        let log = TransactionLog::new(4);
        assert!(!log.contains_transactions());
    }

    #[test]
    fn test_reference_begin_commit_marks_transactions() {
        let mut log = TransactionLog::new(4);
        log.reference_transaction_begin(0);
        assert!(log.contains_transactions());
        log.reference_transaction_commit(0);
        assert!(log.contains_transactions());
        log.dereference_transaction_begin(0);
        log.dereference_transaction_commit(0);
        assert!(!log.contains_transactions());
    }

    #[test]
    fn test_subscribe_lifecycle_clears_marker() {
        let mut log = TransactionLog::new(4);
        log.subscribe_transaction_begin(2);
        assert!(log.contains_transactions());
        log.subscribe_transaction_commit();
        assert!(log.contains_transactions());
        log.unsubscribe_transaction_begin();
        log.unsubscribe_transaction_commit();
        assert!(!log.contains_transactions());
    }

    #[test]
    fn test_rollback_committed_reference_calls_dereference_once() {
        let mut log = TransactionLog::new(4);
        log.reference_transaction_begin(1);
        log.reference_transaction_commit(1);

        let mut dereferenced = Vec::new();
        let result = log.rollback_skeleton_tracing_element_log(|idx| dereferenced.push(idx));

        assert!(result.is_ok());
        assert_eq!(dereferenced, vec![1]);
        assert!(!log.contains_transactions());
    }

    #[test]
    fn test_rollback_crashed_mid_increment_fails() {
        let mut log = TransactionLog::new(4);
        log.reference_transaction_begin(2);

        let result = log.rollback_skeleton_tracing_element_log(|_| {});
        assert_eq!(result, Err(LolaError::CouldNotRestartProxy));
    }

    #[test]
    fn test_rollback_crashed_mid_decrement_fails() {
        let mut log = TransactionLog::new(4);
        log.reference_transaction_begin(2);
        log.reference_transaction_commit(2);
        log.dereference_transaction_begin(2);

        let result = log.rollback_skeleton_tracing_element_log(|_| {});
        assert_eq!(result, Err(LolaError::CouldNotRestartProxy));
    }

    #[test]
    fn test_rollback_proxy_element_log_subscribed_with_refs() {
        let mut log = TransactionLog::new(4);
        log.subscribe_transaction_begin(2);
        log.subscribe_transaction_commit();
        log.reference_transaction_begin(0);
        log.reference_transaction_commit(0);
        log.reference_transaction_begin(1);
        log.reference_transaction_commit(1);

        let mut dereferenced = Vec::new();
        let mut unsubscribed_counts = Vec::new();
        let result = log.rollback_proxy_element_log(
            |idx| dereferenced.push(idx),
            |count| unsubscribed_counts.push(count),
        );

        assert!(result.is_ok());
        assert_eq!(dereferenced, vec![0, 1]);
        assert_eq!(unsubscribed_counts, vec![2]);
        assert!(!log.contains_transactions());
    }

    #[test]
    fn test_rollback_proxy_element_log_crashed_while_subscribing() {
        let mut log = TransactionLog::new(4);
        log.subscribe_transaction_begin(2);

        let result = log.rollback_proxy_element_log(|_| {}, |_| {});
        assert_eq!(result, Err(LolaError::CouldNotRestartProxy));
    }
}
