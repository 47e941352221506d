//! Mock clock for testing.

use crate::application::ports::Clock;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Base Unix timestamp reported by a fresh [`MockClock`].
const MOCK_BASE_UNIX: u64 = 1_000_000;

/// Mock clock for testing.
///
/// Allows tests to control time progression explicitly, enabling
/// deterministic testing of windows, recovery timeouts and reset times.
/// Both the monotonic instant and the Unix timestamp advance together.
///
/// # Thread Safety
///
/// `MockClock` is thread-safe and can be cloned to share across threads.
/// All clones share the same underlying time value, so advancing time in
/// one clone affects all clones.
#[derive(Debug, Clone)]
pub struct MockClock {
    start: Instant,
    offset: Arc<Mutex<Duration>>,
}

impl MockClock {
    /// Create a mock clock at offset zero.
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            offset: Arc::new(Mutex::new(Duration::ZERO)),
        }
    }

    /// Advance the clock by a duration.
    pub fn advance(&self, duration: Duration) {
        let mut offset = self
            .offset
            .lock()
            .expect("MockClock mutex poisoned - a test thread panicked while holding the lock");
        *offset += duration;
    }

    fn offset(&self) -> Duration {
        *self
            .offset
            .lock()
            .expect("MockClock mutex poisoned - a test thread panicked while holding the lock")
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MockClock {
    fn now(&self) -> Instant {
        self.start + self.offset()
    }

    fn unix_now(&self) -> u64 {
        MOCK_BASE_UNIX + self.offset().as_secs()
    }
}
