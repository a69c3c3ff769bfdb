// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Wait-free shared-memory IPC core for service-oriented middleware.
//!
//! This crate implements the data-plane primitives a skeleton/proxy pair
//! needs to exchange samples through a shared-memory region without
//! entering the kernel on the hot path: slot allocation and eviction
//! ([`event_data_control`]), lock-free subscription admission control
//! ([`event_subscription_control`]), crash-safe transaction logging and
//! rollback ([`transaction_log`], [`transaction_log_set`],
//! [`transaction_log_rollback_executor`]), and the proxy-side subscription
//! state machine ([`subscription`], [`proxy_event`]).
//!
//! ## What this crate is not
//!
//! It does not implement service discovery, the wire protocol between
//! processes (message-passing/event-notification plumbing beyond the
//! [`receive_handler::EventNotificationChannel`] seam), or deployment
//! configuration parsing ([`config`] models the parsed result, not the
//! parser). Those are collaborators a binding assembles around this core.
//!
//! ## Module map
//!
//! - [`slot_status`]: the packed atomic cell each sample slot's lifecycle
//!   state lives in.
//! - [`event_data_control`]: the slot array plus allocation/reference
//!   bookkeeping for one event or field.
//! - [`event_subscription_control`]: packed atomic admission control
//!   shared by every subscriber of an event.
//! - [`event_control`]: the pair of the above, as the proxy/skeleton see it.
//! - [`transaction_log`] / [`transaction_log_set`]: the write-ahead log
//!   each subscription uses to make its in-flight mutations crash-safe,
//!   and the fixed-capacity set of them an event owns.
//! - [`transaction_log_registration_guard`]: RAII registration against a
//!   [`transaction_log_set::TransactionLogSet`].
//! - [`uid_pid_map`] / [`service_instance`] /
//!   [`transaction_log_rollback_executor`]: the per-service-instance
//!   `uid -> pid` table and the rollback driver that consults it on proxy
//!   construction.
//! - [`subscription`]: the proxy-side subscribe/unsubscribe state machine.
//! - [`slot_collector`]: converts newly-visible slots into a fixed-size
//!   index buffer in delivery order.
//! - [`slot_decrementer`] / [`proxy_event`]: RAII sample handles and the
//!   per-event façade a generated proxy binds to.
//! - [`receive_handler`]: scoped registration against the external
//!   event-notification control plane.
//! - [`config`]: parsed deployment configuration for one event/field and
//!   one service instance.
//! - [`shm`]: the POSIX shared-memory segment, interprocess mutex, and
//!   futex primitives the above are built on.
//! - [`error`]: the crate-wide error type and fatal-abort convention.
//! - [`ids`]: shared type aliases and identifiers.
//! - [`logging`]: the feature-gated logging macros used throughout.

pub mod config;
pub mod error;
pub mod event_control;
pub mod event_data_control;
pub mod event_subscription_control;
pub mod ids;
pub mod logging;
pub mod proxy_event;
pub mod receive_handler;
pub mod service_instance;
pub mod shm;
pub mod slot_collector;
pub mod slot_decrementer;
pub mod slot_status;
pub mod subscription;
pub mod transaction_log;
pub mod transaction_log_registration_guard;
pub mod transaction_log_rollback_executor;
pub mod transaction_log_set;
pub mod uid_pid_map;

pub use config::{AsilLevel, ConfigError, EventConfig, ServiceInstanceConfig};
pub use error::{LolaError, Result};
pub use event_control::EventControl;
pub use event_data_control::EventDataControl;
pub use event_subscription_control::{EventSubscriptionControl, SubscribeResult};
pub use proxy_event::ProxyEvent;
pub use service_instance::ServiceInstanceControl;
pub use slot_decrementer::{SamplePtr, SlotDecrementer};
pub use subscription::SubscriptionStateMachine;
pub use transaction_log_rollback_executor::TransactionLogRollbackExecutor;
pub use uid_pid_map::UidPidMap;
