// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Interprocess-safe mutex for shared-memory-resident data structures.
//!
//! `parking_lot::Mutex` (used everywhere else in this crate for in-process
//! locking) stores its wait queue out of line and is not safe to place in
//! memory shared across processes. [`TransactionLogSet`](crate::transaction_log_set::TransactionLogSet)
//! needs a real cross-process primitive for its low-frequency
//! registration/unregistration/rollback path, so this wraps a raw
//! `pthread_mutex_t` configured with `PTHREAD_PROCESS_SHARED` and
//! `PTHREAD_MUTEX_ROBUST`.
//!
//! Robustness matters here specifically: the participant holding this lock
//! is, by construction, doing registration bookkeeping, not touching the hot
//! data path, but it can still be killed mid-critical-section. A robust
//! mutex lets the next locker detect that (`EOWNERDEAD`) and recover instead
//! of deadlocking every remaining participant forever.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;

/// A `pthread_mutex_t` configured for use across process boundaries.
///
/// A freshly constructed value (`Default`/`new`) holds a zeroed, inert
/// `pthread_mutex_t` — safe to move around while building up an enclosing
/// struct. Call [`InterprocessMutex::init`] once the value has reached its
/// final resting place (typically inside a `repr(C)` struct embedded in a
/// shared-memory mapping) and before the first `lock()`. Do not move the
/// value again after that: once contended, a waiter may block on this
/// exact address.
#[repr(C)]
pub struct InterprocessMutex {
    inner: UnsafeCell<libc::pthread_mutex_t>,
}

// SAFETY: the underlying pthread_mutex_t is designed for concurrent access
// from multiple threads/processes; all access goes through lock()/unlock().
unsafe impl Send for InterprocessMutex {}
unsafe impl Sync for InterprocessMutex {}

impl Default for InterprocessMutex {
    fn default() -> Self {
        // SAFETY: zero-initializing a pthread_mutex_t is not portable in
        // general, but the value is never locked before init() runs and
        // overwrites it in full via pthread_mutex_init.
        Self {
            inner: UnsafeCell::new(unsafe { MaybeUninit::zeroed().assume_init() }),
        }
    }
}

/// RAII guard releasing an [`InterprocessMutex`] on drop.
pub struct InterprocessMutexGuard<'a> {
    mutex: &'a InterprocessMutex,
}

impl InterprocessMutex {
    /// Initialize a mutex in place at `self`'s address.
    ///
    /// Must be called exactly once, by whichever participant creates the
    /// shared-memory region (the skeleton). Proxies that map an
    /// already-initialized region must never call this again.
    pub fn init(&self) {
        // SAFETY: self.inner is valid, uninitialized or previously destroyed
        // memory; pthread_mutexattr_t is a plain POD type safe to zero-init
        // via MaybeUninit + assume_init after the explicit init call below.
        unsafe {
            let mut attr = MaybeUninit::<libc::pthread_mutexattr_t>::uninit();
            let rc = libc::pthread_mutexattr_init(attr.as_mut_ptr());
            assert_eq!(rc, 0, "pthread_mutexattr_init failed");
            let mut attr = attr.assume_init();

            let rc = libc::pthread_mutexattr_setpshared(&mut attr, libc::PTHREAD_PROCESS_SHARED);
            assert_eq!(rc, 0, "pthread_mutexattr_setpshared failed");

            let rc = libc::pthread_mutexattr_setrobust(&mut attr, libc::PTHREAD_MUTEX_ROBUST);
            assert_eq!(rc, 0, "pthread_mutexattr_setrobust failed");

            let rc = libc::pthread_mutex_init(self.inner.get(), &attr);
            assert_eq!(rc, 0, "pthread_mutex_init failed");

            libc::pthread_mutexattr_destroy(&mut attr);
        }
    }

    /// Acquire the mutex, blocking the calling thread until it is free.
    ///
    /// If the previous owner died while holding the lock, this recovers the
    /// mutex (via `pthread_mutex_consistent`) rather than returning a
    /// poisoned state to the caller: the critical sections this mutex
    /// guards (registration bookkeeping) are idempotent enough that the new
    /// owner can simply re-run its operation from the top.
    pub fn lock(&self) -> InterprocessMutexGuard<'_> {
        // SAFETY: self.inner was initialized via init() before any lock()
        // call; the pointer is valid for the mutex's entire lifetime.
        let rc = unsafe { libc::pthread_mutex_lock(self.inner.get()) };

        if rc == libc::EOWNERDEAD {
            // SAFETY: rc == EOWNERDEAD implies we now hold the mutex per
            // POSIX semantics; marking it consistent is required before
            // any further lock/unlock cycle will succeed.
            unsafe {
                let mark_rc = libc::pthread_mutex_consistent(self.inner.get());
                assert_eq!(mark_rc, 0, "pthread_mutex_consistent failed");
            }
        } else if rc != 0 {
            crate::error::fatal(&format!("pthread_mutex_lock failed: errno {rc}"));
        }

        InterprocessMutexGuard { mutex: self }
    }
}

impl Drop for InterprocessMutex {
    fn drop(&mut self) {
        // SAFETY: no guard can outlive the mutex (borrow lifetime 'a ties
        // InterprocessMutexGuard to &self), so no lock is held at this point.
        unsafe {
            libc::pthread_mutex_destroy(self.inner.get());
        }
    }
}

impl Drop for InterprocessMutexGuard<'_> {
    fn drop(&mut self) {
        // SAFETY: this guard holds the lock acquired in InterprocessMutex::lock.
        unsafe {
            libc::pthread_mutex_unlock(self.mutex.inner.get());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn new_mutex() -> Box<InterprocessMutex> {
        let m = Box::<InterprocessMutex>::default();
        m.init();
        m
    }

    #[test]
    fn test_lock_unlock_uncontended() {
        let m = new_mutex();
        {
            let _g = m.lock();
        }
        let _g2 = m.lock();
    }

    #[test]
    fn test_mutual_exclusion_across_threads() {
        let m = Arc::new(new_mutex());
        let counter = Arc::new(std::sync::atomic::AtomicU64::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let m = Arc::clone(&m);
            let counter = Arc::clone(&counter);
            handles.push(thread::spawn(move || {
                for _ in 0..1000 {
                    let _g = m.lock();
                    counter.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                }
            }));
        }

        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(counter.load(std::sync::atomic::Ordering::Relaxed), 8000);
    }
}
