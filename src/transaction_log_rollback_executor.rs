// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Drives crash rollback for every event of a service instance on proxy
//! construction.
//!
//! One [`TransactionLogRollbackExecutor`] is built per `Proxy` instance.
//! Its job is to (1) detect whether a previous process under the same
//! participant UID left transaction logs behind, (2) mark those logs
//! needing rollback exactly once per crash, and (3) actually replay the
//! rollback against every event's [`TransactionLogSet`](crate::transaction_log_set::TransactionLogSet).
//!
//! Two or more `Proxy` instances in the same process share one
//! [`ServiceInstanceControl`] identity; the process-wide synchronization set
//! below ensures only the first of them does the marking work, matching the
//! original's `synchronisation_data_set`.

use crate::error::Result;
use crate::ids::TransactionLogId;
use crate::receive_handler::{AsilLevel, EventNotificationChannel};
use crate::service_instance::ServiceInstanceControl;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::OnceLock;

/// Process-wide set of service instances whose rollback has already been
/// prepared by some `Proxy` in this process. Keyed by the
/// [`ServiceInstanceControl`]'s address, which is stable for as long as the
/// proxy holding it keeps the shared-memory mapping alive.
///
/// Lazily initialized under a mutex; there is no teardown — process exit
/// is the only destructor.
static ROLLBACK_SYNCHRONIZATION: OnceLock<Mutex<HashSet<usize>>> = OnceLock::new();

fn rollback_synchronization_set() -> &'static Mutex<HashSet<usize>> {
    ROLLBACK_SYNCHRONIZATION.get_or_init(|| Mutex::new(HashSet::new()))
}

/// Prepares and executes transaction-log rollback for one service instance,
/// on behalf of one `TransactionLogId` (the local participant's UID).
pub struct TransactionLogRollbackExecutor<'a> {
    service_instance: &'a ServiceInstanceControl<'a>,
    asil_level: AsilLevel,
    provider_pid: u32,
    transaction_log_id: TransactionLogId,
}

impl<'a> TransactionLogRollbackExecutor<'a> {
    #[must_use]
    pub fn new(
        service_instance: &'a ServiceInstanceControl<'a>,
        asil_level: AsilLevel,
        provider_pid: u32,
        transaction_log_id: TransactionLogId,
    ) -> Self {
        Self {
            service_instance,
            asil_level,
            provider_pid,
            transaction_log_id,
        }
    }

    fn identity(&self) -> usize {
        std::ptr::from_ref(self.service_instance) as usize
    }

    /// Registers this process's pid for `transaction_log_id` in the
    /// instance's `uid -> pid` table and marks every event's transaction
    /// logs for this UID as needing rollback.
    ///
    /// A no-op if another `Proxy` in this process already prepared rollback
    /// for the same service instance — detected via the process-wide
    /// synchronization set, not anything in shared memory.
    pub fn prepare_rollback(&self, channel: &dyn EventNotificationChannel) {
        let mut prepared = rollback_synchronization_set().lock();
        if prepared.contains(&self.identity()) {
            return;
        }

        let current_pid = std::process::id();
        let previous_pid = self
            .service_instance
            .uid_pid_map()
            .register_pid(self.transaction_log_id, current_pid)
            .unwrap_or_else(|| crate::error::fatal("could not register current pid for uid within shared memory"));

        if previous_pid != current_pid {
            channel.notify_outdated_node_id(self.asil_level, previous_pid, self.provider_pid);
        }

        for (_, event_control) in self.service_instance.events() {
            event_control
                .data
                .transaction_log_set()
                .mark_transaction_logs_need_rollback(self.transaction_log_id);
        }

        prepared.insert(self.identity());
    }

    /// Replays rollback for every event of the service instance.
    ///
    /// Always calls [`Self::prepare_rollback`] first, so callers need not
    /// sequence the two calls themselves. Stops at the first event whose
    /// rollback fails and surfaces that error — matching the original,
    /// which does not attempt partial recovery across events once one
    /// returns an unrollable log.
    pub fn rollback_transaction_logs(&self, channel: &dyn EventNotificationChannel) -> Result<()> {
        self.prepare_rollback(channel);

        for (_, event_control) in self.service_instance.events() {
            let data = event_control.data;
            let subscription = event_control.subscription;
            data.transaction_log_set().rollback_proxy_transactions(
                self.transaction_log_id,
                |slot_index| data.dereference_event_without_transaction_logging(slot_index),
                |max_sample_count| subscription.unsubscribe(max_sample_count),
            )?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LolaError;
    use crate::event_control::EventControl;
    use crate::event_data_control::EventDataControl;
    use crate::event_subscription_control::EventSubscriptionControl;
    use crate::ids::ElementFqId;
    use crate::receive_handler::test_support::RecordingChannel;
    use crate::uid_pid_map::UidPidMap;

    fn fq_id(n: u16) -> ElementFqId {
        ElementFqId {
            service_id: 1,
            instance_id: 1,
            element_id: n,
        }
    }

    #[test]
    fn test_prepare_rollback_marks_every_event_for_uid() {
        let data_a = EventDataControl::new(5, 4);
        let subs_a = EventSubscriptionControl::new(4, 100, false);
        let data_b = EventDataControl::new(5, 4);
        let subs_b = EventSubscriptionControl::new(4, 100, false);
        let uid_pid_map = UidPidMap::new(4);

        let log_idx_a = data_a.transaction_log_set().register_proxy_element(77).unwrap();
        let log_idx_b = data_b.transaction_log_set().register_proxy_element(77).unwrap();

        let events = [
            (fq_id(1), EventControl::new(&data_a, &subs_a)),
            (fq_id(2), EventControl::new(&data_b, &subs_b)),
        ];
        let instance = ServiceInstanceControl::new(&events, &uid_pid_map);
        let channel = RecordingChannel::default();

        let executor = TransactionLogRollbackExecutor::new(&instance, 0, 1234, 77);
        executor.prepare_rollback(&channel);

        // SAFETY: single-threaded test, registrations above are the only
        // live handles to these indices.
        unsafe {
            assert!(!data_a.transaction_log_set().get_transaction_log(log_idx_a).contains_transactions());
            assert!(!data_b.transaction_log_set().get_transaction_log(log_idx_b).contains_transactions());
        }
        assert_eq!(uid_pid_map.lookup(77), Some(std::process::id()));
    }

    #[test]
    fn test_prepare_rollback_is_idempotent_within_process() {
        let data = EventDataControl::new(5, 4);
        let subs = EventSubscriptionControl::new(4, 100, false);
        let uid_pid_map = UidPidMap::new(4);
        data.transaction_log_set().register_proxy_element(55).unwrap();

        let events = [(fq_id(1), EventControl::new(&data, &subs))];
        let instance = ServiceInstanceControl::new(&events, &uid_pid_map);
        let channel = RecordingChannel::default();

        let executor = TransactionLogRollbackExecutor::new(&instance, 0, 1, 55);
        executor.prepare_rollback(&channel);
        executor.prepare_rollback(&channel);

        // register_pid is only ever called once per service-instance identity
        // within this process, so the uid stays mapped to our own pid with
        // no re-registration churn.
        assert_eq!(uid_pid_map.lookup(55), Some(std::process::id()));
    }

    #[test]
    fn test_rollback_transaction_logs_dereferences_and_unsubscribes() {
        let data = EventDataControl::new(5, 4);
        let subs = EventSubscriptionControl::new(4, 100, false);
        let uid_pid_map = UidPidMap::new(4);

        let log_idx = data.transaction_log_set().register_proxy_element(9).unwrap();
        subs.subscribe(2);

        let slot_a = data.allocate_next_slot().unwrap();
        data.event_ready(slot_a, 1);
        let slot_b = data.allocate_next_slot().unwrap();
        data.event_ready(slot_b, 2);

        // reference_next_event picks the *newest* matching slot, so walk
        // down by narrowing upper_limit (as SlotCollector does) rather than
        // raising last_search_time, to reference slot_b then slot_a.
        data.reference_next_event(0, log_idx, crate::ids::TIMESTAMP_MAX).unwrap();
        data.reference_next_event(0, log_idx, 2).unwrap();

        // SAFETY: single-threaded test.
        unsafe {
            let log = data.transaction_log_set().get_transaction_log(log_idx);
            log.subscribe_transaction_begin(2);
            log.subscribe_transaction_commit();
        }

        let events = [(fq_id(1), EventControl::new(&data, &subs))];
        let instance = ServiceInstanceControl::new(&events, &uid_pid_map);
        let channel = RecordingChannel::default();

        let executor = TransactionLogRollbackExecutor::new(&instance, 0, 1, 9);
        executor.rollback_transaction_logs(&channel).expect("rollback succeeds");

        assert_eq!(data.slot_status(slot_a).refcount(), 0);
        assert_eq!(data.slot_status(slot_b).refcount(), 0);
        assert_eq!(subs.subscriber_count(), 0);
    }

    #[test]
    fn test_rollback_transaction_logs_propagates_unrollable_error() {
        let data = EventDataControl::new(5, 4);
        let subs = EventSubscriptionControl::new(4, 100, false);
        let uid_pid_map = UidPidMap::new(4);

        let log_idx = data.transaction_log_set().register_proxy_element(3).unwrap();
        // Simulate a crash mid-increment: begin recorded, commit never ran.
        // SAFETY: single-threaded test, sole owner of this index.
        unsafe {
            data.transaction_log_set().get_transaction_log(log_idx).reference_transaction_begin(0);
        }
        data.transaction_log_set().mark_transaction_logs_need_rollback(3);

        let events = [(fq_id(1), EventControl::new(&data, &subs))];
        let instance = ServiceInstanceControl::new(&events, &uid_pid_map);
        let channel = RecordingChannel::default();

        let executor = TransactionLogRollbackExecutor::new(&instance, 0, 1, 3);
        let result = executor.rollback_transaction_logs(&channel);
        assert_eq!(result, Err(LolaError::CouldNotRestartProxy));
    }
}
