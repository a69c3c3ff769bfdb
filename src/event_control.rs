// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Bundles one event's data-plane and admission-control cells.
//!
//! Both halves are co-located in the same shared-memory mapping; this is
//! just a convenience handle so callers (the subscription state machine,
//! the rollback executor) don't have to thread two references everywhere.

use crate::event_data_control::EventDataControl;
use crate::event_subscription_control::EventSubscriptionControl;

pub struct EventControl<'a> {
    pub data: &'a EventDataControl,
    pub subscription: &'a EventSubscriptionControl,
}

impl<'a> EventControl<'a> {
    #[must_use]
    pub fn new(data: &'a EventDataControl, subscription: &'a EventSubscriptionControl) -> Self {
        Self { data, subscription }
    }
}
