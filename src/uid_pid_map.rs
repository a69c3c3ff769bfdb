// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-service-instance `uid -> pid` mapping table used by crash recovery.
//!
//! Lives in shared memory alongside a service instance's event controls.
//! [`TransactionLogRollbackExecutor`](crate::transaction_log_rollback_executor::TransactionLogRollbackExecutor)
//! consults it on proxy construction to detect whether a previous process
//! under the same participant UID is still registered, so it can notify the
//! provider that the old pid is stale before preparing a rollback.

use crate::ids::TransactionLogId;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

struct Entry {
    occupied: AtomicBool,
    uid: AtomicU32,
    pid: AtomicU32,
}

impl Entry {
    fn new() -> Self {
        Self {
            occupied: AtomicBool::new(false),
            uid: AtomicU32::new(0),
            pid: AtomicU32::new(0),
        }
    }
}

/// Fixed-capacity, lock-free `uid -> pid` table.
///
/// Capacity equals the service instance's configured maximum subscriber
/// count: at most one live registration per participant UID is ever needed,
/// and the deployment already bounds how many distinct UIDs may subscribe.
#[repr(C)]
pub struct UidPidMap {
    entries: Vec<Entry>,
}

impl UidPidMap {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: (0..capacity).map(|_| Entry::new()).collect(),
        }
    }

    /// Register `pid` as the current owner of `uid`, returning the
    /// previously registered pid (or `pid` itself, if this is the UID's
    /// first registration). Returns `None` only if the table is full and
    /// `uid` was not already present — a misconfiguration the caller must
    /// treat as fatal, matching the original's `AMP_ASSERT_PRD_MESSAGE`.
    pub fn register_pid(&self, uid: TransactionLogId, pid: u32) -> Option<u32> {
        for entry in &self.entries {
            if entry.occupied.load(Ordering::Acquire) && entry.uid.load(Ordering::Relaxed) == uid as u32 {
                let previous = entry.pid.swap(pid, Ordering::AcqRel);
                return Some(previous);
            }
        }

        for entry in &self.entries {
            if entry
                .occupied
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                entry.uid.store(uid as u32, Ordering::Relaxed);
                entry.pid.store(pid, Ordering::Relaxed);
                return Some(pid);
            }
        }

        None
    }

    /// Look up the currently registered pid for `uid`, if any.
    #[must_use]
    pub fn lookup(&self, uid: TransactionLogId) -> Option<u32> {
        self.entries
            .iter()
            .find(|entry| entry.occupied.load(Ordering::Acquire) && entry.uid.load(Ordering::Relaxed) == uid as u32)
            .map(|entry| entry.pid.load(Ordering::Relaxed))
    }
}
