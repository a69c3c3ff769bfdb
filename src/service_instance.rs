// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Aggregates every event/field control block of one service instance.
//!
//! A proxy maps one shared-memory region per service instance; this type is
//! the handle it walks when preparing crash rollback, since rollback is not
//! scoped to a single event but to every event the instance offers.

use crate::event_control::EventControl;
use crate::ids::ElementFqId;
use crate::uid_pid_map::UidPidMap;

/// Non-owning view over a service instance's event controls and its
/// `uid -> pid` mapping table, all of which live in the same shared-memory
/// region.
pub struct ServiceInstanceControl<'a> {
    events: &'a [(ElementFqId, EventControl<'a>)],
    uid_pid_map: &'a UidPidMap,
}

impl<'a> ServiceInstanceControl<'a> {
    #[must_use]
    pub fn new(events: &'a [(ElementFqId, EventControl<'a>)], uid_pid_map: &'a UidPidMap) -> Self {
        Self { events, uid_pid_map }
    }

    pub fn events(&self) -> impl Iterator<Item = &(ElementFqId, EventControl<'a>)> {
        self.events.iter()
    }

    #[must_use]
    pub fn uid_pid_map(&self) -> &'a UidPidMap {
        self.uid_pid_map
    }
}
