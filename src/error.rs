// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error taxonomy surfaced by the shared-memory IPC core.
//!
//! Three tiers exist side by side, matching the failure semantics of the
//! underlying primitives:
//!
//! - Hot-path wait-free operations ([`crate::event_data_control`],
//!   [`crate::event_subscription_control`]) return `Option`/`bool` and never
//!   this error type — a CAS-retry exhaustion is transient and diagnostic-only.
//! - State-machine and lifecycle operations return `Result<T, LolaError>`.
//! - Contract violations call [`fatal`], which logs and aborts the process;
//!   they are not represented as `LolaError` variants because there is no
//!   caller to hand a `Result` back to.

use std::fmt;

/// Recoverable errors surfaced to subscription/proxy callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LolaError {
    /// Operation requires an active subscription but none exists.
    NotSubscribed,
    /// `TransactionLogSet` has no free slot for a new proxy registration.
    MaxSubscribersExceeded,
    /// `Subscribe` was called with a `max_sample_count` that conflicts with
    /// an already-subscribed or already-pending value.
    MaxSampleCountNotRealizable,
    /// Caller is holding more `SamplePtr`s than `max_sample_count` allows.
    MaxSamplesReached,
    /// The binding detected a local failure unrelated to the above.
    BindingFailure,
    /// A crashed peer left transaction logs that could not be rolled back
    /// unambiguously; the proxy cannot be (re)constructed.
    CouldNotRestartProxy,
    /// `UnsetReceiveHandler` called without a prior `SetReceiveHandler`.
    SetHandlerNotSet,
    /// Unregistering a receive handler with the message-passing layer failed.
    UnsetFailure,
}

impl fmt::Display for LolaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Self::NotSubscribed => "request invalid: event proxy is not subscribed to the event",
            Self::MaxSubscribersExceeded => "subscriber count exceeded",
            Self::MaxSampleCountNotRealizable => "provided max_sample_count not realizable",
            Self::MaxSamplesReached => "application holds more SamplePtrs than committed in subscribe",
            Self::BindingFailure => "local failure has been detected by the binding",
            Self::CouldNotRestartProxy => "could not recreate proxy after previous crash",
            Self::SetHandlerNotSet => "set-handler has not been registered",
            Self::UnsetFailure => "failure has been detected by unset operation",
        };
        f.write_str(msg)
    }
}

impl std::error::Error for LolaError {}

/// Result alias for lifecycle operations that can fail recoverably.
pub type Result<T> = std::result::Result<T, LolaError>;

/// Report a detected contract violation and terminate the process.
///
/// Used for conditions considered unrecoverable contract violations:
/// unsubscribe underflow, a `RemoveAllocationsForWriting` CAS race with a live peer,
/// double-registration of the skeleton tracing log, and illegal
/// state-machine events such as `StopOffer` while `SubscriptionPending`.
/// These are contract violations by a co-resident participant, not
/// conditions a caller can recover from.
pub fn fatal(context: &str) -> ! {
    log::error!("fatal contract violation: {context}");
    std::process::abort();
}
