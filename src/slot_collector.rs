// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-subscription cursor over an [`EventDataControl`]'s published slots.
//!
//! A [`SlotCollector`] is the proxy-side component that turns repeated
//! `ReferenceNextEvent` calls into an ordered batch: each call to
//! [`SlotCollector::collect_new_samples`] walks backwards from the newest
//! unseen sample to the oldest, then hands the caller the slots in
//! publication order (oldest first).

use crate::event_data_control::EventDataControl;
use crate::ids::{SlotIndex, Timestamp, TransactionLogIndex, TIMESTAMP_MAX};

/// Tracks one subscriber's read position into an event's slot array.
///
/// Not `Sync`: the original's contract ("may be called from different
/// threads, but calls must be externally synchronized") is reflected here
/// by requiring `&mut self` on every method — the compiler enforces the
/// serialization the original left to documentation.
pub struct SlotCollector<'a> {
    event_data_control: &'a EventDataControl,
    max_slots: usize,
    last_timestamp: Timestamp,
    transaction_log_index: TransactionLogIndex,
}

impl<'a> SlotCollector<'a> {
    #[must_use]
    pub fn new(event_data_control: &'a EventDataControl, max_slots: usize, transaction_log_index: TransactionLogIndex) -> Self {
        Self {
            event_data_control,
            max_slots,
            last_timestamp: 0,
            transaction_log_index,
        }
    }

    /// Number of samples a call to [`Self::collect_new_samples`] would
    /// currently return, ignoring its `max_count` cap.
    #[must_use]
    pub fn num_new_samples_available(&self) -> usize {
        self.event_data_control.get_num_new_events(self.last_timestamp)
    }

    /// Reference up to `max_count` new slots and return them oldest-first.
    ///
    /// Each returned index already holds a live reference acquired via
    /// `ReferenceNextEvent` on the caller's transaction log; the caller owns
    /// dereferencing it once done (typically by wrapping it in a
    /// [`SlotDecrementer`](crate::slot_decrementer::SlotDecrementer)).
    pub fn collect_new_samples(&mut self, max_count: usize) -> Vec<SlotIndex> {
        let limit = max_count.min(self.max_slots);
        let mut collected = Vec::with_capacity(limit);
        let mut current_highest = TIMESTAMP_MAX;

        while collected.len() < limit {
            let Some(slot) =
                self.event_data_control
                    .reference_next_event(self.last_timestamp, self.transaction_log_index, current_highest)
            else {
                break;
            };

            current_highest = self.event_data_control.slot_status(slot).timestamp();
            collected.push(slot);
        }

        let highest_delivered = collected
            .iter()
            .map(|&slot| self.event_data_control.slot_status(slot).timestamp())
            .max()
            .unwrap_or(self.last_timestamp);
        self.last_timestamp = highest_delivered;

        collected.reverse();
        collected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_num_new_samples_available_tracks_publications() {
        let control = EventDataControl::new(5, 4);
        let log_idx = control.transaction_log_set().register_proxy_element(1).unwrap();
        let collector = SlotCollector::new(&control, 5, log_idx);
        assert_eq!(collector.num_new_samples_available(), 0);

        let slot = control.allocate_next_slot().unwrap();
        control.event_ready(slot, 1);
        assert_eq!(collector.num_new_samples_available(), 1);
    }

    #[test]
    fn test_collect_new_samples_returns_oldest_first() {
        let control = EventDataControl::new(5, 4);
        let log_idx = control.transaction_log_set().register_proxy_element(1).unwrap();

        for ts in [1u32, 2, 3] {
            let slot = control.allocate_next_slot().unwrap();
            control.event_ready(slot, ts);
        }

        let mut collector = SlotCollector::new(&control, 5, log_idx);
        let collected = collector.collect_new_samples(10);

        let timestamps: Vec<Timestamp> = collected.iter().map(|&s| control.slot_status(s).timestamp()).collect();
        assert_eq!(timestamps, vec![1, 2, 3]);
    }

    #[test]
    fn test_collect_new_samples_respects_max_count() {
        let control = EventDataControl::new(5, 4);
        let log_idx = control.transaction_log_set().register_proxy_element(1).unwrap();

        for ts in [1u32, 2, 3] {
            let slot = control.allocate_next_slot().unwrap();
            control.event_ready(slot, ts);
        }

        let mut collector = SlotCollector::new(&control, 5, log_idx);
        let collected = collector.collect_new_samples(2);

        let timestamps: Vec<Timestamp> = collected.iter().map(|&s| control.slot_status(s).timestamp()).collect();
        assert_eq!(timestamps, vec![2, 3]);
    }

    #[test]
    fn test_collect_new_samples_advances_cursor_across_calls() {
        let control = EventDataControl::new(5, 4);
        let log_idx = control.transaction_log_set().register_proxy_element(1).unwrap();

        for ts in [1u32, 2] {
            let slot = control.allocate_next_slot().unwrap();
            control.event_ready(slot, ts);
        }

        let mut collector = SlotCollector::new(&control, 5, log_idx);
        let first = collector.collect_new_samples(10);
        assert_eq!(first.len(), 2);

        for &slot in &first {
            control.dereference_event(slot, log_idx);
        }

        assert!(collector.collect_new_samples(10).is_empty());

        let slot = control.allocate_next_slot().unwrap();
        control.event_ready(slot, 3);
        let second = collector.collect_new_samples(10);
        assert_eq!(second.len(), 1);
        assert_eq!(control.slot_status(second[0]).timestamp(), 3);
    }
}
