//! Clock adapters for time operations.
//!
//! Provides SystemClock implementation for production use. See `MockClock`
//! (in `crate::infrastructure::mocks`) for a controllable test clock,
//! available with the `test-helpers` feature or in test builds.

use crate::application::ports::Clock;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// System clock backed by `Instant::now()` and `SystemTime::now()`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    /// Create a new system clock.
    pub fn new() -> Self {
        Self
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn unix_now(&self) -> u64 {
        // A system time before the epoch means a badly misconfigured host;
        // report zero rather than panic.
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_secs())
    }
}
