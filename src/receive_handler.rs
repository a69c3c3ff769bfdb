// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Scoped receive-handler registration against the (external) message-passing
//! control plane.
//!
//! The control plane itself — `RegisterEventNotification` and friends — is a
//! collaborator this crate consumes, not implements (it lives in the
//! message-passing layer). [`EventNotificationChannel`] is the seam: a real
//! binding supplies an implementation that talks to that layer; tests supply
//! a recording fake.

use crate::ids::ElementFqId;

/// ASIL integrity level the event notification channel distinguishes
/// independent message-passing queues by.
pub type AsilLevel = u8;

/// Opaque handle returned by a successful channel registration.
pub type RegistrationNo = u64;

/// Closure invoked when a new sample becomes available. Lives only in the
/// proxy process — never stored in shared memory.
pub type HandlerFn = Box<dyn FnMut() + Send>;

/// The message-passing layer's event-notification control plane, as seen by
/// this crate.
pub trait EventNotificationChannel: Send + Sync {
    fn register(&self, asil_level: AsilLevel, event_id: ElementFqId, provider_pid: u32) -> RegistrationNo;
    fn unregister(&self, asil_level: AsilLevel, event_id: ElementFqId, registration_no: RegistrationNo, provider_pid: u32);
    fn reregister(&self, asil_level: AsilLevel, event_id: ElementFqId, provider_pid: u32) -> RegistrationNo;
    fn notify_outdated_node_id(&self, asil_level: AsilLevel, stale_pid: u32, provider_pid: u32);
}

/// Manages the lifecycle of at most one active registration plus a stashed
/// handler set before a provider became available.
///
/// Expiring this manager (`Drop`) unregisters any live registration,
/// preventing new invocations; draining any in-flight invocation is the
/// channel implementation's responsibility, which crosses a boundary this
/// crate doesn't own.
pub struct ReceiveHandlerManager {
    handler: Option<HandlerFn>,
    registration: Option<RegistrationNo>,
}

impl ReceiveHandlerManager {
    #[must_use]
    pub fn new() -> Self {
        Self {
            handler: None,
            registration: None,
        }
    }

    #[must_use]
    pub fn is_registered(&self) -> bool {
        self.registration.is_some()
    }

    #[must_use]
    pub fn has_handler(&self) -> bool {
        self.handler.is_some()
    }

    /// Stash a handler without registering it with the channel yet.
    pub fn stash(&mut self, handler: HandlerFn) {
        self.handler = Some(handler);
    }

    /// Register the stashed handler (if any) with the channel immediately.
    pub fn register_now(
        &mut self,
        channel: &dyn EventNotificationChannel,
        asil_level: AsilLevel,
        event_id: ElementFqId,
        provider_pid: u32,
    ) {
        if self.handler.is_some() && self.registration.is_none() {
            self.registration = Some(channel.register(asil_level, event_id, provider_pid));
        }
    }

    /// Re-register an already-active registration against a new provider pid.
    pub fn reregister(
        &mut self,
        channel: &dyn EventNotificationChannel,
        asil_level: AsilLevel,
        event_id: ElementFqId,
        provider_pid: u32,
    ) {
        if let Some(old) = self.registration.take() {
            channel.unregister(asil_level, event_id, old, provider_pid);
        }
        if self.handler.is_some() {
            self.registration = Some(channel.reregister(asil_level, event_id, provider_pid));
        }
    }

    /// Unregister (if registered) and drop the stashed handler.
    pub fn unset(
        &mut self,
        channel: &dyn EventNotificationChannel,
        asil_level: AsilLevel,
        event_id: ElementFqId,
        provider_pid: u32,
    ) -> crate::error::Result<()> {
        let Some(registration) = self.registration.take() else {
            self.handler = None;
            return Err(crate::error::LolaError::SetHandlerNotSet);
        };
        channel.unregister(asil_level, event_id, registration, provider_pid);
        self.handler = None;
        Ok(())
    }
}

impl Default for ReceiveHandlerManager {
    fn default() -> Self {
        Self::new()
    }
}

/// An in-memory [`EventNotificationChannel`] fake, recording every call it
/// receives. Shipped unconditionally (not `#[cfg(test)]`) because both this
/// crate's unit tests and its `tests/` integration tests need it, and the
/// latter link against the library built without `cfg(test)`.
pub mod test_support {
    use super::{AsilLevel, EventNotificationChannel, RegistrationNo};
    use crate::ids::ElementFqId;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[derive(Default)]
    pub struct RecordingChannel {
        next: AtomicU64,
        pub events: Mutex<Vec<String>>,
    }

    impl EventNotificationChannel for RecordingChannel {
        fn register(&self, _asil_level: AsilLevel, _event_id: ElementFqId, provider_pid: u32) -> RegistrationNo {
            let no = self.next.fetch_add(1, Ordering::Relaxed) + 1;
            self.events.lock().push(format!("register({provider_pid})->{no}"));
            no
        }

        fn unregister(&self, _asil_level: AsilLevel, _event_id: ElementFqId, registration_no: RegistrationNo, provider_pid: u32) {
            self.events.lock().push(format!("unregister({registration_no},{provider_pid})"));
        }

        fn reregister(&self, _asil_level: AsilLevel, _event_id: ElementFqId, provider_pid: u32) -> RegistrationNo {
            let no = self.next.fetch_add(1, Ordering::Relaxed) + 1;
            self.events.lock().push(format!("reregister({provider_pid})->{no}"));
            no
        }

        fn notify_outdated_node_id(&self, _asil_level: AsilLevel, stale_pid: u32, provider_pid: u32) {
            self.events.lock().push(format!("notify_outdated({stale_pid},{provider_pid})"));
        }
    }
}
