// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Slot state array, allocation, publication, and reference management.
//!
//! [`EventDataControl`] is the core of the core: a fixed-length array of
//! [`SlotStatusAtomic`] cells shared by every participant mapping a service
//! instance's region, co-located with the [`TransactionLogSet`] that makes
//! reference mutations crash-recoverable. Every operation here is wait-free
//! with a bounded CAS retry budget; none of them ever block.

use crate::ids::{SlotIndex, Timestamp, TransactionLogIndex, TIMESTAMP_MAX};
use crate::slot_status::{SlotStatus, SlotStatusAtomic};
use crate::transaction_log_set::TransactionLogSet;
use std::sync::atomic::{AtomicU64, Ordering};

/// Bound on `AllocateNextSlot`'s CAS retries, engineered around the product
/// of max parallel actions and the number of transaction phases so
/// contention alone cannot starve the single writer.
const MAX_ALLOCATE_RETRIES: u32 = 100;
/// Bound on `ReferenceSpecificEvent`/`ReferenceNextEvent`'s CAS retries.
const MAX_REFERENCE_RETRIES: u32 = 100;

/// Diagnostic counters for CAS-retry exhaustion, tracked per instance
/// (the original implementation uses process-wide statics; an instance
/// field here avoids assuming a single `EventDataControl` per process).
#[derive(Default)]
pub struct PerformanceCounters {
    alloc_misses: AtomicU64,
    ref_misses: AtomicU64,
    alloc_retries: AtomicU64,
    ref_retries: AtomicU64,
}

impl PerformanceCounters {
    #[must_use]
    pub fn alloc_misses(&self) -> u64 {
        self.alloc_misses.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn ref_misses(&self) -> u64 {
        self.ref_misses.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn alloc_retries(&self) -> u64 {
        self.alloc_retries.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn ref_retries(&self) -> u64 {
        self.ref_retries.load(Ordering::Relaxed)
    }
}

/// Owns the slot array and the [`TransactionLogSet`] for a single
/// event/field. Lives in shared memory alongside a parallel data array of
/// the same cardinality (not modeled here — out of scope per the payload
/// allocator being an external collaborator).
pub struct EventDataControl {
    state_slots: Vec<SlotStatusAtomic>,
    transaction_log_set: TransactionLogSet,
    counters: PerformanceCounters,
}

impl EventDataControl {
    #[must_use]
    pub fn new(max_slots: usize, max_number_combined_subscribers: usize) -> Self {
        Self {
            state_slots: (0..max_slots).map(|_| SlotStatusAtomic::free()).collect(),
            transaction_log_set: TransactionLogSet::new(max_number_combined_subscribers, max_slots),
            counters: PerformanceCounters::default(),
        }
    }

    #[must_use]
    pub fn transaction_log_set(&self) -> &TransactionLogSet {
        &self.transaction_log_set
    }

    #[must_use]
    pub fn counters(&self) -> &PerformanceCounters {
        &self.counters
    }

    /// Read a slot's current status without acquiring any reference.
    #[must_use]
    pub fn slot_status(&self, slot_index: SlotIndex) -> SlotStatus {
        self.state_slots[slot_index].load_acquire()
    }

    /// Reserve the oldest unused slot for writing.
    ///
    /// Must be called only by the single skeleton writer for this event;
    /// concurrent skeleton writers are not supported. Returns `None` if no
    /// slot could be allocated within [`MAX_ALLOCATE_RETRIES`] attempts,
    /// which indicates misconfiguration (see the eviction policy note on
    /// `slot_count`), not transient contention under correct configuration.
    pub fn allocate_next_slot(&self) -> Option<SlotIndex> {
        let mut retry_counter = 0u32;
        let mut selected_index = None;

        while retry_counter <= MAX_ALLOCATE_RETRIES {
            selected_index = self.find_oldest_unused_slot();

            let Some(index) = selected_index else {
                retry_counter += 1;
                continue;
            };

            let status = self.state_slots[index].load_acquire();
            if status.refcount() != 0 || status.is_in_writing() {
                retry_counter += 1;
                continue;
            }

            let new_status = SlotStatus::in_writing();
            if self.state_slots[index]
                .compare_exchange(status, new_status, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                break;
            }

            retry_counter += 1;
        }

        self.counters.alloc_retries.fetch_add(retry_counter as u64, Ordering::Relaxed);

        if retry_counter >= MAX_ALLOCATE_RETRIES {
            self.counters.alloc_misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        selected_index
    }

    /// Oldest-first eviction candidate: the first `Invalid` slot encountered
    /// (short-circuit), otherwise the usable slot with the smallest
    /// timestamp.
    fn find_oldest_unused_slot(&self) -> Option<SlotIndex> {
        let mut oldest_timestamp = TIMESTAMP_MAX;
        let mut selected_index = None;

        for (index, slot) in self.state_slots.iter().enumerate() {
            let status = slot.load_acquire();

            if status.is_invalid() {
                return Some(index);
            }

            if status.refcount() == 0 && !status.is_in_writing() && status.timestamp() < oldest_timestamp {
                oldest_timestamp = status.timestamp();
                selected_index = Some(index);
            }
        }

        selected_index
    }

    /// Publish a previously allocated slot with release ordering. No CAS
    /// needed — only the single writer ever touches an in-writing slot.
    pub fn event_ready(&self, slot_index: SlotIndex, timestamp: Timestamp) {
        self.state_slots[slot_index].store_release(SlotStatus::ready(timestamp));
    }

    /// Invalidate a still-in-writing slot. A slot already published by
    /// `event_ready` is left untouched — a reader may already have observed
    /// it.
    pub fn discard(&self, slot_index: SlotIndex) {
        self.state_slots[slot_index].mark_invalid_if_in_writing();
    }

    /// Increment a specific slot's refcount, used by the skeleton-side
    /// tracing self-reference rather than the ordinary consumer path
    /// (which uses `reference_next_event`).
    pub fn reference_specific_event(&self, slot_index: SlotIndex, transaction_log_index: TransactionLogIndex) -> bool {
        // SAFETY: the transaction log at this index is owned exclusively by
        // the caller's registered subscription/tracing element for the
        // duration of this call, per the subscription state machine's
        // external serialization contract.
        let transaction_log = unsafe { self.transaction_log_set.get_transaction_log(transaction_log_index) };

        for _ in 0..MAX_REFERENCE_RETRIES {
            let current = self.state_slots[slot_index].load_acquire();
            if current.is_in_writing() || current.is_invalid() {
                return false;
            }
            if current.refcount() == u16::MAX {
                return false;
            }

            transaction_log.reference_transaction_begin(slot_index);

            let next = current.incremented_refcount();

            if self.state_slots[slot_index]
                .compare_exchange(current, next, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                transaction_log.reference_transaction_commit(slot_index);
                return true;
            }
            transaction_log.reference_transaction_abort(slot_index);
        }

        false
    }

    /// Scan for the slot with the maximum timestamp in `(last_search_time,
    /// upper_limit)` and CAS-increment its refcount.
    ///
    /// The scan ratchets its lower bound up to the best candidate found so
    /// far on every pass, which converges on the maximum rather than
    /// minimum timestamp in range — this is what lets
    /// [`SlotCollector`](crate::slot_collector::SlotCollector) narrow
    /// `upper_limit` downward across repeated calls and still make
    /// progress.
    pub fn reference_next_event(
        &self,
        last_search_time: Timestamp,
        transaction_log_index: TransactionLogIndex,
        upper_limit: Timestamp,
    ) -> Option<SlotIndex> {
        // SAFETY: see reference_specific_event.
        let transaction_log = unsafe { self.transaction_log_set.get_transaction_log(transaction_log_index) };

        let mut possible_index = None;
        let mut counter = 0u32;

        while counter < MAX_REFERENCE_RETRIES {
            possible_index = None;
            let mut candidate_timestamp = last_search_time;
            let mut candidate_status = None;

            for (index, slot) in self.state_slots.iter().enumerate() {
                let status = slot.load_relaxed();
                if status.is_timestamp_between(candidate_timestamp, upper_limit) {
                    possible_index = Some(index);
                    candidate_timestamp = status.timestamp();
                    candidate_status = Some(status);
                }
            }

            let Some(index) = possible_index else {
                return None;
            };
            let candidate = candidate_status.expect("candidate_status set whenever possible_index is");

            let next = candidate.incremented_refcount();

            transaction_log.reference_transaction_begin(index);
            if self.state_slots[index]
                .compare_exchange(candidate, next, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                transaction_log.reference_transaction_commit(index);
                break;
            }
            transaction_log.reference_transaction_abort(index);

            counter += 1;
        }

        self.counters.ref_retries.fetch_add(counter as u64, Ordering::Relaxed);

        if counter < MAX_REFERENCE_RETRIES {
            possible_index
        } else {
            self.counters.ref_misses.fetch_add(1, Ordering::Relaxed);
            None
        }
    }

    /// Approximate, lock-free count of slots whose timestamp lies in
    /// `(reference_time, TIMESTAMP_MAX)`. Raced publications may appear or
    /// disappear between calls.
    #[must_use]
    pub fn get_num_new_events(&self, reference_time: Timestamp) -> usize {
        self.state_slots
            .iter()
            .filter(|slot| slot.load_relaxed().is_timestamp_between(reference_time, TIMESTAMP_MAX))
            .count()
    }

    /// Decrement a slot's refcount, bracketed by a TransactionLog
    /// dereference-begin/commit pair.
    pub fn dereference_event(&self, slot_index: SlotIndex, transaction_log_index: TransactionLogIndex) {
        // SAFETY: see reference_specific_event.
        let transaction_log = unsafe { self.transaction_log_set.get_transaction_log(transaction_log_index) };
        transaction_log.dereference_transaction_begin(slot_index);
        self.dereference_event_without_transaction_logging(slot_index);
        transaction_log.dereference_transaction_commit(slot_index);
    }

    /// Decrement a slot's refcount without touching any TransactionLog.
    /// Used by the rollback machinery, which is itself the logging
    /// authority for the mutation it's replaying.
    pub fn dereference_event_without_transaction_logging(&self, slot_index: SlotIndex) {
        self.state_slots[slot_index].decrement_refcount();
    }

    /// Clear every lingering `InWriting` flag after recovering a
    /// crashed-predecessor region. Must only be called by a skeleton, and
    /// only when certain no live predecessor writer remains — a CAS
    /// failure here means that precondition was violated.
    pub fn remove_allocations_for_writing(&self) {
        for slot in &self.state_slots {
            match slot.clear_in_writing() {
                Ok(_) => {}
                Err(_) => crate::error::fatal(
                    "RemoveAllocationsForWriting observed a concurrent mutation: a live predecessor writer exists",
                ),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_next_slot_returns_free_slot() {
        let control = EventDataControl::new(4, 4);
        let slot = control.allocate_next_slot().expect("should allocate");
        assert!(control.slot_status(slot).is_in_writing());
    }

    #[test]
    fn test_allocate_event_ready_roundtrip() {
        let control = EventDataControl::new(4, 4);
        let slot = control.allocate_next_slot().unwrap();
        control.event_ready(slot, 10);
        let status = control.slot_status(slot);
        assert_eq!(status.timestamp(), 10);
        assert_eq!(status.refcount(), 0);
    }

    #[test]
    fn test_discard_in_writing_slot_marks_invalid() {
        let control = EventDataControl::new(4, 4);
        let slot = control.allocate_next_slot().unwrap();
        control.discard(slot);
        assert!(control.slot_status(slot).is_invalid());
    }

    #[test]
    fn test_discard_published_slot_is_noop() {
        let control = EventDataControl::new(4, 4);
        let slot = control.allocate_next_slot().unwrap();
        control.event_ready(slot, 7);
        control.discard(slot);
        assert_eq!(control.slot_status(slot).timestamp(), 7);
        assert!(!control.slot_status(slot).is_invalid());
    }

    #[test]
    fn test_scenario_b_oldest_first_eviction() {
        // Scenario B: 5 slots all ready, ts=1..5, no references, allocator
        // returns slot 0 (ts=1).
        let control = EventDataControl::new(5, 4);
        for i in 0..5 {
            let slot = control.allocate_next_slot().unwrap();
            control.event_ready(slot, (i + 1) as Timestamp);
        }
        let next = control.allocate_next_slot().expect("slot with smallest timestamp");
        assert_eq!(next, 0);
    }

    #[test]
    fn test_scenario_a_single_producer_single_consumer() {
        let control = EventDataControl::new(5, 4);
        let log_idx = control.transaction_log_set.register_proxy_element(1).unwrap();

        let slot = control.allocate_next_slot().unwrap();
        control.event_ready(slot, 10);

        assert_eq!(control.get_num_new_events(0), 1);

        let referenced = control.reference_next_event(0, log_idx, TIMESTAMP_MAX).unwrap();
        assert_eq!(referenced, slot);
        assert_eq!(control.slot_status(slot).refcount(), 1);

        control.dereference_event(slot, log_idx);
        assert_eq!(control.slot_status(slot).refcount(), 0);
        assert_eq!(control.get_num_new_events(10), 0);
    }

    #[test]
    fn test_reference_next_event_picks_maximum_in_range() {
        // reference_next_event converges on the maximum timestamp in
        // (last_ts, upper_limit), not the minimum.
        let control = EventDataControl::new(5, 4);
        let log_idx = control.transaction_log_set.register_proxy_element(1).unwrap();

        for ts in [1u32, 2, 3] {
            let slot = control.allocate_next_slot().unwrap();
            control.event_ready(slot, ts);
        }

        let picked = control.reference_next_event(0, log_idx, TIMESTAMP_MAX).unwrap();
        assert_eq!(control.slot_status(picked).timestamp(), 3);
    }

    #[test]
    fn test_reference_next_event_respects_upper_limit() {
        let control = EventDataControl::new(5, 4);
        let log_idx = control.transaction_log_set.register_proxy_element(1).unwrap();

        for ts in [1u32, 2, 3] {
            let slot = control.allocate_next_slot().unwrap();
            control.event_ready(slot, ts);
        }

        let picked = control.reference_next_event(0, log_idx, 3).unwrap();
        assert_eq!(control.slot_status(picked).timestamp(), 2);
    }

    #[test]
    fn test_reference_next_event_none_when_out_of_range() {
        let control = EventDataControl::new(5, 4);
        let log_idx = control.transaction_log_set.register_proxy_element(1).unwrap();

        let slot = control.allocate_next_slot().unwrap();
        control.event_ready(slot, 5);

        assert!(control.reference_next_event(10, log_idx, TIMESTAMP_MAX).is_none());
    }

    #[test]
    fn test_remove_allocations_for_writing_clears_in_writing_slots() {
        let control = EventDataControl::new(4, 4);
        let slot = control.allocate_next_slot().unwrap();
        control.remove_allocations_for_writing();
        assert!(control.slot_status(slot).is_invalid());
        assert!(!control.slot_status(slot).is_in_writing());
    }

    #[test]
    fn test_performance_counters_start_at_zero() {
        let control = EventDataControl::new(4, 4);
        assert_eq!(control.counters().alloc_misses(), 0);
        assert_eq!(control.counters().ref_misses(), 0);
    }
}
