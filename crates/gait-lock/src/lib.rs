// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]

//! The `LockManager` capability abstraction for cross-file coordination.
//!
//! Job and session state is mutated only while holding the corresponding
//! lock. Callers depend on the [`LockManager`] trait, not on a concrete
//! backend, so the same job/session code runs against real advisory file
//! locks in production and an in-memory mutex map in tests.

mod fs;
mod memory;

use std::time::Duration;

use gait_error::GaitError;

pub use fs::FsLockManager;
pub use memory::InMemoryLockManager;

/// A held lock. Dropping the guard releases the lock.
pub trait LockGuard: Send {}

/// Acquires and releases advisory locks keyed by an opaque string (e.g. a
/// job id or session name).
pub trait LockManager: Send + Sync {
    /// Acquire the lock for `key`, waiting up to `timeout` before failing
    /// with `ErrorCode::LockContention`.
    fn acquire(&self, key: &str, timeout: Duration) -> Result<Box<dyn LockGuard>, GaitError>;
}
