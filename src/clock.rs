//! Time source for key expiration.
//!
//! Storage asks a `Clock` for the current instant instead of calling
//! `Instant::now()` directly, so tests can move time forward without sleeping.

use std::time::Instant;

/// Source of the current instant
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Monotonic system clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

#[cfg(test)]
pub use manual::ManualClock;
