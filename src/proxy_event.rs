// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-event proxy controller: the public surface applications call through.
//!
//! A [`ProxyEvent`] composes a [`SubscriptionStateMachine`] with the
//! identity and shared-memory handles it needs, and forwards every public
//! operation to it. It owns no state of its own beyond what's needed to
//! construct a [`SamplePtr`] from a raw slot index, since the payload array
//! itself lives outside this crate (see [`crate::shm`]).

use crate::error::Result;
use crate::event_control::EventControl;
use crate::ids::{ElementFqId, MaxSampleCount, SlotIndex, TransactionLogId};
use crate::receive_handler::{AsilLevel, EventNotificationChannel, HandlerFn};
use crate::slot_decrementer::SamplePtr;
use crate::subscription::SubscriptionStateMachine;

/// Application-facing handle to one event/field of a service instance.
///
/// `T` is the payload type stored in the parallel data array the binding
/// maps alongside this event's [`EventControl`]; this crate never reads or
/// writes it directly, only hands back typed references once a slot has
/// been referenced.
pub struct ProxyEvent<'a, T> {
    event_id: ElementFqId,
    state_machine: SubscriptionStateMachine<'a>,
    samples: &'a [T],
}

impl<'a, T> ProxyEvent<'a, T> {
    #[must_use]
    pub fn new(event_id: ElementFqId, control: EventControl<'a>, transaction_log_id: TransactionLogId, asil_level: AsilLevel, samples: &'a [T]) -> Self {
        Self {
            event_id,
            state_machine: SubscriptionStateMachine::new(event_id, transaction_log_id, control, asil_level),
            samples,
        }
    }

    #[must_use]
    pub fn event_id(&self) -> ElementFqId {
        self.event_id
    }

    #[must_use]
    pub fn is_subscribed(&self) -> bool {
        self.state_machine.is_subscribed()
    }

    pub fn subscribe(&self, max_sample_count: MaxSampleCount, channel: &dyn EventNotificationChannel) -> Result<()> {
        self.state_machine.subscribe(max_sample_count, channel)
    }

    pub fn unsubscribe(&self, channel: &dyn EventNotificationChannel) {
        self.state_machine.unsubscribe(channel);
    }

    pub fn stop_offer(&self) {
        self.state_machine.stop_offer();
    }

    pub fn re_offer(&self, provider_pid: u32, channel: &dyn EventNotificationChannel) {
        self.state_machine.re_offer(provider_pid, channel);
    }

    pub fn set_receive_handler(&self, handler: HandlerFn, channel: &dyn EventNotificationChannel) {
        self.state_machine.set_receive_handler(handler, channel);
    }

    pub fn unset_receive_handler(&self, channel: &dyn EventNotificationChannel) -> Result<()> {
        self.state_machine.unset_receive_handler(channel)
    }

    #[must_use]
    pub fn get_num_new_samples_available(&self) -> usize {
        self.state_machine.get_num_new_samples_available()
    }

    /// Reference up to `max_count` new samples and return them oldest-first,
    /// each wrapped in a [`SamplePtr`] borrowing this event's payload array.
    pub fn get_new_samples(&self, max_count: usize) -> Vec<SamplePtr<'a, T>> {
        self.state_machine
            .get_new_samples_slot_indices(max_count)
            .into_iter()
            .filter_map(|slot_index| self.sample_ptr_for(slot_index))
            .collect()
    }

    fn sample_ptr_for(&self, slot_index: SlotIndex) -> Option<SamplePtr<'a, T>> {
        let payload = self.samples.get(slot_index)?;
        let decrementer = self.state_machine.make_slot_decrementer(slot_index)?;
        Some(SamplePtr::new(payload, decrementer))
    }
}
