// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Collection of per-subscription transaction logs plus crash rollback.
//!
//! One [`TransactionLogSet`] sits alongside an
//! [`EventDataControl`](crate::event_data_control::EventDataControl) in
//! shared memory. Each active proxy subscription owns one
//! [`TransactionLogNode`]; there is additionally one distinguished
//! skeleton-tracing node reserved under [`TransactionLogSet::SKELETON_INDEX_SENTINEL`].
//!
//! Registration, unregistration and rollback are low-frequency lifecycle
//! operations serialized by an [`InterprocessMutex`](crate::shm::InterprocessMutex).
//! `get_transaction_log`, the high-frequency path used on every reference
//! mutation, is lock-free by design: its safety rests on the subscription
//! state machine never calling it concurrently with `unregister` on the
//! same index, not on any lock held here.

use crate::error::LolaError;
use crate::ids::{MaxSampleCount, SlotIndex, TransactionLogId, TransactionLogIndex};
use crate::shm::InterprocessMutex;
use crate::transaction_log::TransactionLog;
use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, Ordering};

/// One slot of the set: an identity, two status flags, and the log itself.
///
/// `transaction_log` is wrapped in an [`UnsafeCell`] rather than behind a
/// lock because [`TransactionLogSet::get_transaction_log`] is contractually
/// lock-free — callers (the subscription state machine) guarantee it is
/// never invoked concurrently with `unregister` on the same index.
pub struct TransactionLogNode {
    is_active: AtomicBool,
    needs_rollback: AtomicBool,
    transaction_log_id: UnsafeCell<TransactionLogId>,
    transaction_log: UnsafeCell<TransactionLog>,
}

// SAFETY: all fields are either atomics or accessed under the documented
// external serialization contract (mutex for registration/rollback, proxy
// single-ownership for get_transaction_log).
unsafe impl Send for TransactionLogNode {}
unsafe impl Sync for TransactionLogNode {}

impl TransactionLogNode {
    fn new(number_of_slots: usize) -> Self {
        Self {
            is_active: AtomicBool::new(false),
            needs_rollback: AtomicBool::new(false),
            transaction_log_id: UnsafeCell::new(0),
            transaction_log: UnsafeCell::new(TransactionLog::new(number_of_slots)),
        }
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.is_active.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn needs_rollback(&self) -> bool {
        self.needs_rollback.load(Ordering::Acquire)
    }

    fn mark_active(&self, value: bool) {
        self.is_active.store(value, Ordering::Release);
    }

    fn mark_needs_rollback(&self, value: bool) {
        self.needs_rollback.store(value, Ordering::Release);
    }

    fn set_transaction_log_id(&self, id: TransactionLogId) {
        // SAFETY: only mutated under the TransactionLogSet's mutex.
        unsafe {
            *self.transaction_log_id.get() = id;
        }
    }

    #[must_use]
    pub fn transaction_log_id(&self) -> TransactionLogId {
        // SAFETY: only mutated under the TransactionLogSet's mutex; reads
        // here happen either under the same mutex or as part of the
        // advisory id-matching scan, consistent with the original design.
        unsafe { *self.transaction_log_id.get() }
    }

    /// # Safety
    ///
    /// The caller must not hold any other live reference to this node's log
    /// obtained through this method, and must not call `unregister` on the
    /// owning index concurrently.
    #[allow(clippy::mut_from_ref)]
    unsafe fn transaction_log_mut(&self) -> &mut TransactionLog {
        &mut *self.transaction_log.get()
    }

    fn reset(&self) {
        // SAFETY: called only under the set's mutex, or (skeleton path)
        // with single-owner access; no concurrent transaction_log_mut().
        let log = unsafe { self.transaction_log_mut() };
        debug_assert!(
            !log.contains_transactions(),
            "cannot reset TransactionLog while it still contains transactions"
        );
        self.mark_active(false);
        self.mark_needs_rollback(false);
    }
}

/// Fixed-capacity set of per-subscription transaction logs plus the
/// skeleton-tracing log, guarded by an interprocess mutex for lifecycle
/// operations.
pub struct TransactionLogSet {
    proxy_logs: Vec<TransactionLogNode>,
    skeleton_tracing_log: TransactionLogNode,
    mutex: InterprocessMutex,
}

impl TransactionLogSet {
    /// Reserved index identifying the skeleton-tracing log; proxy capacity
    /// must stay strictly below this value.
    pub const SKELETON_INDEX_SENTINEL: TransactionLogIndex = TransactionLogIndex::MAX;

    #[must_use]
    pub fn new(max_number_of_logs: usize, number_of_slots: usize) -> Self {
        assert_ne!(
            max_number_of_logs,
            Self::SKELETON_INDEX_SENTINEL,
            "kSkeletonIndexSentinel is reserved; max_number_of_logs must be reduced"
        );

        // mutex.init() runs before the first lock() anywhere can observe
        // it, so the move implied by returning `set` by value is safe: the
        // mutex carries no address-dependent state until it is contended.
        let set = Self {
            proxy_logs: (0..max_number_of_logs)
                .map(|_| TransactionLogNode::new(number_of_slots))
                .collect(),
            skeleton_tracing_log: TransactionLogNode::new(number_of_slots),
            mutex: InterprocessMutex::default(),
        };
        set.mutex.init();
        set
    }

    fn is_skeleton_index(index: TransactionLogIndex) -> bool {
        index == Self::SKELETON_INDEX_SENTINEL
    }

    /// Set the needs-rollback flag on every active log owned by `id`.
    ///
    /// Set once by the first survivor of a given peer crash; subsequent
    /// calls by other survivors are no-ops because `RollbackProxyTransactions`
    /// clears the flag as part of a successful rollback.
    pub fn mark_transaction_logs_need_rollback(&self, id: TransactionLogId) {
        for node in &self.proxy_logs {
            if node.is_active() && node.transaction_log_id() == id {
                node.mark_needs_rollback(true);
            }
        }
    }

    /// Roll back every active log owned by `id` that is marked
    /// needs-rollback, trying each one in turn and returning the last error
    /// encountered if none succeed.
    pub fn rollback_proxy_transactions(
        &self,
        id: TransactionLogId,
        mut dereference_slot: impl FnMut(SlotIndex),
        mut unsubscribe: impl FnMut(MaxSampleCount),
    ) -> Result<(), LolaError> {
        let _guard = self.mutex.lock();

        let candidates: Vec<TransactionLogIndex> = self
            .proxy_logs
            .iter()
            .enumerate()
            .filter(|(_, node)| node.is_active() && node.transaction_log_id() == id && node.needs_rollback())
            .map(|(idx, _)| idx)
            .collect();

        let mut last_result = Ok(());
        for index in candidates {
            let node = &self.proxy_logs[index];
            // SAFETY: held under self.mutex, which serializes every other
            // registration/rollback call; GetTransactionLog callers (the
            // live subscription) don't touch a node mid-rollback because
            // rollback only targets crashed peers' logs.
            let log = unsafe { node.transaction_log_mut() };
            let result = log.rollback_proxy_element_log(&mut dereference_slot, &mut unsubscribe);
            if result.is_ok() {
                node.reset();
            }
            last_result = result;
        }
        last_result
    }

    /// Roll back the skeleton-tracing log, if it is active.
    pub fn rollback_skeleton_tracing_transactions(
        &self,
        dereference_slot: impl FnMut(SlotIndex),
    ) -> Result<(), LolaError> {
        if !self.skeleton_tracing_log.is_active() {
            return Ok(());
        }
        // SAFETY: the skeleton-tracing log is single-owner (the skeleton
        // process); no concurrent transaction_log_mut() call can race it.
        let log = unsafe { self.skeleton_tracing_log.transaction_log_mut() };
        log.rollback_skeleton_tracing_element_log(dereference_slot)?;
        self.skeleton_tracing_log.reset();
        Ok(())
    }

    /// Register a new proxy subscription's log under `id`, returning its
    /// index, or `MaxSubscribersExceeded` if every slot is active.
    pub fn register_proxy_element(&self, id: TransactionLogId) -> Result<TransactionLogIndex, LolaError> {
        let _guard = self.mutex.lock();

        let Some(index) = self.proxy_logs.iter().position(|node| !node.is_active()) else {
            return Err(LolaError::MaxSubscribersExceeded);
        };

        let node = &self.proxy_logs[index];
        node.set_transaction_log_id(id);
        node.mark_active(true);
        node.mark_needs_rollback(false);

        // SAFETY: held under self.mutex; node was just claimed so no other
        // participant holds a transaction_log_mut() reference to it.
        let log = unsafe { node.transaction_log_mut() };
        debug_assert!(
            !log.contains_transactions(),
            "cannot reuse TransactionLog while it still contains transactions"
        );

        Ok(index)
    }

    /// Register the single skeleton-tracing log, returning the sentinel
    /// index. Fatal if one is already active.
    pub fn register_skeleton_tracing_element(&self) -> TransactionLogIndex {
        if self.skeleton_tracing_log.is_active() {
            crate::error::fatal("skeleton tracing transaction log already registered");
        }
        self.skeleton_tracing_log.mark_active(true);
        Self::SKELETON_INDEX_SENTINEL
    }

    /// Clear the node at `index`. The skeleton-tracing index bypasses the
    /// mutex: it is single-owner and never contended.
    pub fn unregister(&self, index: TransactionLogIndex) {
        if Self::is_skeleton_index(index) {
            self.skeleton_tracing_log.reset();
            return;
        }
        let _guard = self.mutex.lock();
        self.proxy_logs[index].reset();
    }

    /// Get mutable access to the log at `index`.
    ///
    /// Lock-free by design. Must not be called concurrently with
    /// `unregister` on the same index — the subscription state machine's
    /// per-event mutex is what actually enforces this in practice, not
    /// anything in this type.
    ///
    /// # Safety
    ///
    /// The caller must ensure no other live reference to this index's log
    /// exists and that `unregister(index)` is not racing this call.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn get_transaction_log(&self, index: TransactionLogIndex) -> &mut TransactionLog {
        let node = if Self::is_skeleton_index(index) {
            &self.skeleton_tracing_log
        } else {
            &self.proxy_logs[index]
        };
        debug_assert!(node.is_active(), "transaction log must be registered before use");
        node.transaction_log_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_returns_distinct_indices() {
        let set = TransactionLogSet::new(4, 8);
        let a = set.register_proxy_element(100).unwrap();
        let b = set.register_proxy_element(200).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_register_exhausts_capacity() {
        let set = TransactionLogSet::new(2, 8);
        set.register_proxy_element(1).unwrap();
        set.register_proxy_element(2).unwrap();
        assert_eq!(set.register_proxy_element(3), Err(LolaError::MaxSubscribersExceeded));
    }

    #[test]
    fn test_unregister_frees_slot_for_reuse() {
        let set = TransactionLogSet::new(1, 8);
        let idx = set.register_proxy_element(1).unwrap();
        set.unregister(idx);
        assert!(set.register_proxy_element(2).is_ok());
    }

    #[test]
    fn test_mark_needs_rollback_matches_by_id_only() {
        let set = TransactionLogSet::new(4, 8);
        let idx_a = set.register_proxy_element(10).unwrap();
        let idx_b = set.register_proxy_element(20).unwrap();

        set.mark_transaction_logs_need_rollback(10);

        assert!(set.proxy_logs[idx_a].needs_rollback());
        assert!(!set.proxy_logs[idx_b].needs_rollback());
    }

    #[test]
    fn test_rollback_proxy_transactions_happy_path() {
        let set = TransactionLogSet::new(4, 8);
        let idx = set.register_proxy_element(42).unwrap();

        // SAFETY: single-threaded test, no concurrent access to this index.
        let log = unsafe { set.get_transaction_log(idx) };
        log.subscribe_transaction_begin(2);
        log.subscribe_transaction_commit();
        log.reference_transaction_begin(0);
        log.reference_transaction_commit(0);

        set.mark_transaction_logs_need_rollback(42);

        let mut dereferenced = Vec::new();
        let mut unsubscribed = Vec::new();
        let result = set.rollback_proxy_transactions(
            42,
            |slot| dereferenced.push(slot),
            |count| unsubscribed.push(count),
        );

        assert!(result.is_ok());
        assert_eq!(dereferenced, vec![0]);
        assert_eq!(unsubscribed, vec![2]);
        assert!(!set.proxy_logs[idx].is_active());

        // Rollback idempotence: a second call after the flag is cleared and
        // the node reset is a clean no-op (no matching candidates).
        let result2 = set.rollback_proxy_transactions(42, |_| {}, |_| {});
        assert!(result2.is_ok());
    }

    #[test]
    fn test_rollback_returns_last_error_when_none_succeed() {
        let set = TransactionLogSet::new(4, 8);
        let idx_a = set.register_proxy_element(7).unwrap();
        let idx_b = set.register_proxy_element(7).unwrap();

        // SAFETY: single-threaded test.
        unsafe {
            set.get_transaction_log(idx_a).reference_transaction_begin(0);
            set.get_transaction_log(idx_b).reference_transaction_begin(1);
        }

        set.mark_transaction_logs_need_rollback(7);

        let result = set.rollback_proxy_transactions(7, |_| {}, |_| {});
        assert_eq!(result, Err(LolaError::CouldNotRestartProxy));
        // Neither node got reset since neither rollback succeeded.
        assert!(set.proxy_logs[idx_a].is_active());
        assert!(set.proxy_logs[idx_b].is_active());
    }

    #[test]
    fn test_skeleton_tracing_register_and_rollback() {
        let set = TransactionLogSet::new(4, 8);
        let idx = set.register_skeleton_tracing_element();
        assert_eq!(idx, TransactionLogSet::SKELETON_INDEX_SENTINEL);

        // SAFETY: single-threaded test.
        unsafe {
            let log = set.get_transaction_log(idx);
            log.reference_transaction_begin(3);
            log.reference_transaction_commit(3);
        }

        let mut dereferenced = Vec::new();
        let result = set.rollback_skeleton_tracing_transactions(|slot| dereferenced.push(slot));
        assert!(result.is_ok());
        assert_eq!(dereferenced, vec![3]);
        assert!(!set.skeleton_tracing_log.is_active());
    }
}
