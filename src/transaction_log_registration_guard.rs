// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! RAII ownership of one [`TransactionLogSet`] registration.

use crate::ids::{TransactionLogId, TransactionLogIndex};
use crate::transaction_log_set::TransactionLogSet;

/// Owns a proxy's slot in a [`TransactionLogSet`] for as long as it lives.
///
/// Acquired by the subscription state machine's `Subscribe` path and
/// dropped by its teardown to `NotSubscribed`; dropping unregisters the
/// node, which is only safe once every in-flight reference on it has
/// already been released (the state machine enforces that ordering, not
/// this guard).
pub struct TransactionLogRegistrationGuard<'a> {
    transaction_log_set: &'a TransactionLogSet,
    index: TransactionLogIndex,
}

impl<'a> TransactionLogRegistrationGuard<'a> {
    pub fn register_proxy(transaction_log_set: &'a TransactionLogSet, id: TransactionLogId) -> crate::error::Result<Self> {
        let index = transaction_log_set.register_proxy_element(id)?;
        Ok(Self { transaction_log_set, index })
    }

    #[must_use]
    pub fn index(&self) -> TransactionLogIndex {
        self.index
    }
}

impl Drop for TransactionLogRegistrationGuard<'_> {
    fn drop(&mut self) {
        self.transaction_log_set.unregister(self.index);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_registers_and_unregisters_on_drop() {
        let set = TransactionLogSet::new(1, 4);
        {
            let guard = TransactionLogRegistrationGuard::register_proxy(&set, 7).unwrap();
            assert_eq!(set.register_proxy_element(8), Err(crate::error::LolaError::MaxSubscribersExceeded));
            drop(guard);
        }
        assert!(set.register_proxy_element(9).is_ok());
    }
}
