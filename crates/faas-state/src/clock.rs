//! An injectable clock so idleness/staleness windows (§4.B "Staleness model")
//! can be tested without real sleeps, the way `llm-pyexec`'s timeout tests
//! use short real durations rather than mocking time — here the windows
//! (minutes) are too long for that trick, so the clock itself is the seam.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// A source of monotonic instants.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// The real wall clock, used everywhere outside tests.
#[derive(Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock that only moves when told to. Starts at its own construction
/// time and is advanced by [`ManualClock::advance`].
pub struct ManualClock {
    origin: Instant,
    offset_millis: AtomicU64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset_millis: AtomicU64::new(0),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.offset_millis
            .fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + Duration::from_millis(self.offset_millis.load(Ordering::SeqCst))
    }
}
