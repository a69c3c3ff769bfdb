// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Proxy-side subscription state machine for a single event.
//!
//! A single tagged enum replaces the original's table of polymorphic state
//! objects, each of which held a back-reference into its owning container.
//! Transitions take ownership of the current state via
//! `std::mem::replace`, match on the owned value, and write back whatever
//! the transition produces — there is no per-state allocation and no
//! back-reference to anything.

use crate::error::{LolaError, Result};
use crate::event_control::EventControl;
use crate::event_subscription_control::SubscribeResult;
use crate::ids::{ElementFqId, MaxSampleCount, SlotIndex, TransactionLogId};
use crate::receive_handler::{AsilLevel, EventNotificationChannel, HandlerFn, ReceiveHandlerManager};
use crate::slot_collector::SlotCollector;
use crate::slot_decrementer::SlotDecrementer;
use crate::transaction_log_registration_guard::TransactionLogRegistrationGuard;
use parking_lot::Mutex;

/// Live per-subscription resources, common to `SubscriptionPending` and
/// `Subscribed`.
struct Active<'a> {
    max_sample_count: MaxSampleCount,
    slot_collector: SlotCollector<'a>,
    guard: TransactionLogRegistrationGuard<'a>,
    provider_pid: u32,
}

enum State<'a> {
    NotSubscribed { provider_available: bool },
    SubscriptionPending(Active<'a>),
    Subscribed(Active<'a>),
}

impl<'a> State<'a> {
    fn active(&self) -> Option<&Active<'a>> {
        match self {
            State::SubscriptionPending(a) | State::Subscribed(a) => Some(a),
            State::NotSubscribed { .. } => None,
        }
    }

    fn active_mut(&mut self) -> Option<&mut Active<'a>> {
        match self {
            State::SubscriptionPending(a) | State::Subscribed(a) => Some(a),
            State::NotSubscribed { .. } => None,
        }
    }
}

/// Sequences `EventDataControl`/`EventSubscriptionControl`/`TransactionLog`
/// operations behind the three-state machine described in the component
/// design. One [`parking_lot::Mutex`]-guarded `State` per event; all public
/// methods take `&self` and lock internally, matching the "one mutex
/// protects transitions" requirement without forcing every caller to manage
/// a guard.
pub struct SubscriptionStateMachine<'a> {
    event_id: ElementFqId,
    transaction_log_id: TransactionLogId,
    control: EventControl<'a>,
    state: Mutex<State<'a>>,
    receive_handler: Mutex<ReceiveHandlerManager>,
    asil_level: AsilLevel,
}

impl<'a> SubscriptionStateMachine<'a> {
    #[must_use]
    pub fn new(event_id: ElementFqId, transaction_log_id: TransactionLogId, control: EventControl<'a>, asil_level: AsilLevel) -> Self {
        Self {
            event_id,
            transaction_log_id,
            control,
            state: Mutex::new(State::NotSubscribed { provider_available: true }),
            receive_handler: Mutex::new(ReceiveHandlerManager::new()),
            asil_level,
        }
    }

    #[must_use]
    pub fn is_subscribed(&self) -> bool {
        matches!(*self.state.lock(), State::Subscribed(_))
    }

    #[must_use]
    pub fn is_subscription_pending(&self) -> bool {
        matches!(*self.state.lock(), State::SubscriptionPending(_))
    }

    /// Request a subscription for `max_sample_count` concurrent slots.
    pub fn subscribe(&self, max_sample_count: MaxSampleCount, channel: &dyn EventNotificationChannel) -> Result<()> {
        let mut state = self.state.lock();

        if let Some(active) = state.active() {
            return if active.max_sample_count == max_sample_count {
                Ok(())
            } else {
                Err(LolaError::MaxSampleCountNotRealizable)
            };
        }

        let provider_available = match &*state {
            State::NotSubscribed { provider_available } => *provider_available,
            State::SubscriptionPending(_) | State::Subscribed(_) => {
                unreachable!("state.active() returned None only for NotSubscribed")
            }
        };

        let guard = TransactionLogRegistrationGuard::register_proxy(
            self.control.data.transaction_log_set(),
            self.transaction_log_id,
        )?;
        let log_index = guard.index();

        // SAFETY: the guard above just registered this index; nothing else
        // can be holding a live reference to it yet.
        let log = unsafe { self.control.data.transaction_log_set().get_transaction_log(log_index) };
        log.subscribe_transaction_begin(max_sample_count);

        match self.control.subscription.subscribe(max_sample_count) {
            SubscribeResult::Success => {}
            SubscribeResult::MaxSubscribersOverflow => {
                log.subscribe_transaction_abort();
                return Err(LolaError::MaxSubscribersExceeded);
            }
            SubscribeResult::SlotOverflow | SubscribeResult::UpdateRetryFailure => {
                log.subscribe_transaction_abort();
                return Err(LolaError::MaxSampleCountNotRealizable);
            }
        }
        log.subscribe_transaction_commit();

        let slot_collector = SlotCollector::new(self.control.data, max_sample_count as usize, log_index);
        let active = Active {
            max_sample_count,
            slot_collector,
            guard,
            provider_pid: 0,
        };

        if provider_available {
            let mut handler = self.receive_handler.lock();
            if handler.has_handler() {
                handler.register_now(channel, self.asil_level, self.event_id, active.provider_pid);
            }
            *state = State::Subscribed(active);
        } else {
            *state = State::SubscriptionPending(active);
        }

        Ok(())
    }

    /// Tear down any active subscription. No-op from `NotSubscribed`.
    pub fn unsubscribe(&self, channel: &dyn EventNotificationChannel) {
        let mut state = self.state.lock();
        let previous = std::mem::replace(&mut *state, State::NotSubscribed { provider_available: true });

        let active = match previous {
            State::NotSubscribed { provider_available } => {
                *state = State::NotSubscribed { provider_available };
                return;
            }
            State::SubscriptionPending(active) | State::Subscribed(active) => active,
        };

        let log_index = active.guard.index();
        // SAFETY: sole owner of this index until `active.guard` drops below.
        let log = unsafe { self.control.data.transaction_log_set().get_transaction_log(log_index) };

        log.unsubscribe_transaction_begin();
        self.control.subscription.unsubscribe(active.max_sample_count);
        log.unsubscribe_transaction_commit();

        let _ = self.receive_handler.lock().unset(channel, self.asil_level, self.event_id, active.provider_pid);

        drop(active.slot_collector);
        drop(active.guard);

        *state = State::NotSubscribed { provider_available: true };
    }

    /// Provider stopped offering the service instance.
    pub fn stop_offer(&self) {
        let mut state = self.state.lock();
        let previous = std::mem::replace(&mut *state, State::NotSubscribed { provider_available: false });

        *state = match previous {
            State::NotSubscribed { .. } => State::NotSubscribed { provider_available: false },
            State::Subscribed(active) => State::SubscriptionPending(active),
            State::SubscriptionPending(active) => {
                *state = State::SubscriptionPending(active);
                crate::error::fatal("StopOffer is illegal while SubscriptionPending");
            }
        };
    }

    /// Provider (re)offered the service instance under `provider_pid`.
    pub fn re_offer(&self, provider_pid: u32, channel: &dyn EventNotificationChannel) {
        let mut state = self.state.lock();
        let previous = std::mem::replace(&mut *state, State::NotSubscribed { provider_available: true });

        *state = match previous {
            State::NotSubscribed { .. } => State::NotSubscribed { provider_available: true },
            State::SubscriptionPending(mut active) => {
                active.provider_pid = provider_pid;
                let mut handler = self.receive_handler.lock();
                handler.reregister(channel, self.asil_level, self.event_id, provider_pid);
                drop(handler);
                State::Subscribed(active)
            }
            State::Subscribed(mut active) => {
                log::warn!("ReOffer received while already Subscribed for {}", self.event_id);
                active.provider_pid = provider_pid;
                State::Subscribed(active)
            }
        };
    }

    pub fn set_receive_handler(&self, handler: HandlerFn, channel: &dyn EventNotificationChannel) {
        let state = self.state.lock();
        let mut manager = self.receive_handler.lock();
        manager.stash(handler);
        if let Some(active) = state.active() {
            if matches!(*state, State::Subscribed(_)) {
                manager.register_now(channel, self.asil_level, self.event_id, active.provider_pid);
            }
        }
    }

    pub fn unset_receive_handler(&self, channel: &dyn EventNotificationChannel) -> Result<()> {
        let state = self.state.lock();
        let provider_pid = state.active().map_or(0, |a| a.provider_pid);
        self.receive_handler.lock().unset(channel, self.asil_level, self.event_id, provider_pid)
    }

    pub fn get_num_new_samples_available(&self) -> usize {
        self.state.lock().active().map_or(0, Active::num_new_samples_available)
    }

    pub fn get_new_samples_slot_indices(&self, max_count: usize) -> Vec<SlotIndex> {
        self.state
            .lock()
            .active_mut()
            .map(|active| active.slot_collector.collect_new_samples(max_count))
            .unwrap_or_default()
    }

    pub fn make_slot_decrementer(&self, slot_index: SlotIndex) -> Option<SlotDecrementer<'a>> {
        self.state
            .lock()
            .active()
            .map(|active| SlotDecrementer::new(self.control.data, slot_index, active.guard.index()))
    }
}

impl Active<'_> {
    fn num_new_samples_available(&self) -> usize {
        self.slot_collector.num_new_samples_available()
    }
}
