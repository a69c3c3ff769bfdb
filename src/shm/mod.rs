// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Low-level shared-memory primitives: POSIX segment mapping and
//! futex-based cross-process waiting.
//!
//! Everything above this module (slot status cells, transaction logs,
//! the subscription state machine) is built out of these two building
//! blocks plus plain atomics. Nothing in here is LoLa-specific; it is
//! the same machinery any shared-memory transport needs.

mod futex;
mod ipc_mutex;
mod segment;

pub use futex::{futex_wait, futex_wake, futex_wake_all, futex_wake_one};
pub use ipc_mutex::{InterprocessMutex, InterprocessMutexGuard};
pub use segment::{cleanup_stale_segments, ShmSegment, SEGMENT_PREFIX};

use std::fmt;
use std::io;

/// Errors that can occur while creating or mapping a shared-memory segment.
#[derive(Debug)]
pub enum ShmError {
    /// Shared memory segment creation failed.
    SegmentCreate(io::Error),
    /// Shared memory segment open failed.
    SegmentOpen(io::Error),
    /// Memory mapping failed.
    Mmap(io::Error),
    /// Invalid segment name.
    InvalidName(String),
    /// Segment not found.
    NotFound(String),
}

impl fmt::Display for ShmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SegmentCreate(e) => write!(f, "shared memory segment creation failed: {e}"),
            Self::SegmentOpen(e) => write!(f, "shared memory segment open failed: {e}"),
            Self::Mmap(e) => write!(f, "memory mapping failed: {e}"),
            Self::InvalidName(name) => write!(f, "invalid segment name: {name}"),
            Self::NotFound(name) => write!(f, "segment not found: {name}"),
        }
    }
}

impl std::error::Error for ShmError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::SegmentCreate(e) | Self::SegmentOpen(e) | Self::Mmap(e) => Some(e),
            _ => None,
        }
    }
}

/// Result type for raw shared-memory operations.
pub type Result<T> = std::result::Result<T, ShmError>;
