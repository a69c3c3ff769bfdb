// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Parsed configuration for one event/field, and the service instance that
//! owns it.
//!
//! The JSON deployment-configuration parser that would normally produce
//! these values is an external collaborator (§1's "out of scope": the
//! `ServiceIdentifier`/`InstanceSpecifier` data model and configuration
//! parser) — this module is the parsed result such a parser would hand to
//! the core, constructible directly by callers and tests. Validation here
//! enforces the sizing invariant §4.1 depends on: the writer must always be
//! able to find a free slot.

use std::fmt;

/// Per-event/field deployment configuration.
///
/// Mirrors the fields enumerated in §6 ("Configuration inputs"):
/// `number_of_sample_slots`, `max_subscribers`, `enforce_max_samples`,
/// `max_concurrent_allocations`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventConfig {
    /// Fixed slot-array length for this event's `EventDataControl`.
    pub number_of_sample_slots: u16,
    /// Capacity of the event's `TransactionLogSet` (one log per subscriber).
    pub max_subscribers: u16,
    /// Whether `EventSubscriptionControl::subscribe` enforces
    /// `max_subscribable_slots`.
    pub enforce_max_samples: bool,
    /// Upper bound on concurrent `AllocateNextSlot` calls the deployment
    /// expects from the skeleton side; used only for validation here, since
    /// this core supports exactly one concurrent writer per event (§4.1).
    pub max_concurrent_allocations: u16,
    /// Sum, across all subscribers, of the maximum concurrent references a
    /// single subscriber's `max_sample_count` may hold. Used to validate
    /// §4.1's sizing invariant: `slot_count >= 1 + sum(max concurrent refs)`.
    pub max_subscribable_slots: u16,
}

/// Reasons an [`EventConfig`] fails validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// `number_of_sample_slots` is too small for the configured subscriber
    /// load: §4.1 requires `slot_count >= 1 + sum(max concurrent refs)` so
    /// the writer is guaranteed a free slot.
    InsufficientSlotCount { required: u32, configured: u16 },
    /// `max_concurrent_allocations` is zero or exceeds the single-writer
    /// model this core supports (§4.1: "concurrent skeleton writers are not
    /// supported").
    UnsupportedConcurrentAllocations(u16),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InsufficientSlotCount { required, configured } => write!(
                f,
                "number_of_sample_slots={configured} is insufficient: at least {required} slots are \
                 required for the configured subscriber load (1 + sum of max concurrent references)"
            ),
            Self::UnsupportedConcurrentAllocations(n) => write!(
                f,
                "max_concurrent_allocations={n} is not supported: this core allows exactly one \
                 concurrent skeleton writer per event"
            ),
        }
    }
}

impl std::error::Error for ConfigError {}

impl EventConfig {
    /// Validate the sizing invariant from §4.1: the writer must always find
    /// a free slot in the absence of misconfiguration, which requires
    /// `number_of_sample_slots >= 1 + max_subscribable_slots`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the slot count is insufficient or
    /// concurrent allocation is requested (unsupported by this core).
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent_allocations != 1 {
            return Err(ConfigError::UnsupportedConcurrentAllocations(self.max_concurrent_allocations));
        }

        let required = 1u32 + self.max_subscribable_slots as u32;
        if (self.number_of_sample_slots as u32) < required {
            return Err(ConfigError::InsufficientSlotCount {
                required,
                configured: self.number_of_sample_slots,
            });
        }

        Ok(())
    }
}

/// ASIL (Automotive Safety Integrity Level) criticality tag, used to select
/// independent message-passing channels and resource pools.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsilLevel {
    /// Quality Managed — the default, non-safety-rated channel.
    Qm,
    /// ASIL B — the higher-criticality channel.
    B,
}

impl AsilLevel {
    /// Numeric channel selector matching the `u8` `AsilLevel` alias used
    /// by [`crate::receive_handler::EventNotificationChannel`].
    #[must_use]
    pub fn as_channel_id(self) -> u8 {
        match self {
            Self::Qm => 0,
            Self::B => 1,
        }
    }
}

/// Per-service-instance deployment configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceInstanceConfig {
    pub instance_id: u16,
    pub asil_level: AsilLevel,
    pub shared_memory_size: usize,
    /// UIDs of processes permitted to map this instance's region as a
    /// consumer. Enforcement is the responsibility of the shared-memory
    /// segment's filesystem permissions and an external access-control
    /// collaborator; this list is carried through for diagnostics and
    /// future enforcement hooks, matching §6's "allowed_consumer" input.
    pub allowed_consumer: Vec<u32>,
    /// UIDs of processes permitted to create/offer this instance.
    pub allowed_provider: Vec<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(slots: u16, subscribable: u16) -> EventConfig {
        EventConfig {
            number_of_sample_slots: slots,
            max_subscribers: 5,
            enforce_max_samples: true,
            max_concurrent_allocations: 1,
            max_subscribable_slots: subscribable,
        }
    }

    #[test]
    fn test_validate_accepts_sufficient_slot_count() {
        assert!(config(11, 10).validate().is_ok());
    }

    #[test]
    fn test_validate_accepts_exact_minimum() {
        assert!(config(6, 5).validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_insufficient_slot_count() {
        let err = config(5, 5).validate().unwrap_err();
        assert_eq!(
            err,
            ConfigError::InsufficientSlotCount {
                required: 6,
                configured: 5
            }
        );
    }

    #[test]
    fn test_validate_rejects_concurrent_allocations() {
        let mut cfg = config(10, 5);
        cfg.max_concurrent_allocations = 2;
        assert_eq!(cfg.validate().unwrap_err(), ConfigError::UnsupportedConcurrentAllocations(2));
    }

    #[test]
    fn test_asil_level_channel_ids_are_distinct() {
        assert_ne!(AsilLevel::Qm.as_channel_id(), AsilLevel::B.as_channel_id());
    }
}
