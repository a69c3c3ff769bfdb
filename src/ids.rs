// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Shared identifier and index types used across the core.

/// Index of a data slot within an [`crate::event_data_control::EventDataControl`]'s
/// fixed-length array. Stable for the lifetime of the service instance.
pub type SlotIndex = usize;

/// Monotonically increasing publication timestamp stored in a `SlotStatus`.
pub type Timestamp = u32;

/// Sentinel meaning "never delivered" — larger than any real timestamp.
pub const TIMESTAMP_MAX: Timestamp = Timestamp::MAX;

/// Sentinel meaning "slot is free/invalid".
pub const TIMESTAMP_INVALID: Timestamp = 0;

/// Upper bound on outstanding references to a single slot, and on the
/// sample budget a proxy may request in `Subscribe`.
pub type MaxSampleCount = u16;

/// Identity of a participating process: its UID, stable across the
/// lifetime of a service instance and shared by every proxy instance the
/// same OS user runs in that process.
pub type TransactionLogId = libc::uid_t;

/// Index into a [`crate::transaction_log_set::TransactionLogSet`].
pub type TransactionLogIndex = usize;

/// Fully-qualified identifier of a single event/field within a service
/// instance, used only for diagnostics (logging, fatal-error context).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ElementFqId {
    pub service_id: u16,
    pub instance_id: u16,
    pub element_id: u16,
}

impl std::fmt::Display for ElementFqId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.service_id, self.instance_id, self.element_id
        )
    }
}

/// Read the calling process's current UID, used to derive a
/// [`TransactionLogId`] for the local participant.
#[must_use]
pub fn current_transaction_log_id() -> TransactionLogId {
    // SAFETY: getuid() has no preconditions and cannot fail.
    unsafe { libc::getuid() }
}
