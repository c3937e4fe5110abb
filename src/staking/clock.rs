//! Time Source
//!
//! Every time-dependent operation reads `now()` from an explicitly passed
//! [`Clock`]. Production wiring uses [`SystemClock`]; tests and the scenario
//! simulator use [`ManualClock`] so that runs are reproducible.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Unix timestamp in seconds.
pub type Timestamp = u64;

pub trait Clock {
    fn now(&self) -> Timestamp;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        chrono::Utc::now().timestamp().max(0) as Timestamp
    }
}

/// Manually driven clock. Clones share the same underlying time, so a test
/// can keep a handle while the pool owns another.
///
/// # Determinism Contract
/// - `now()` only changes through `set`, `advance_to` or `advance_by`
/// - `advance_to()` only moves forward (debug-asserted)
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    current: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new(start: Timestamp) -> Self {
        Self {
            current: Arc::new(AtomicU64::new(start)),
        }
    }

    /// Jump to an arbitrary time, backwards included.
    pub fn set(&self, time: Timestamp) {
        self.current.store(time, Ordering::SeqCst);
    }

    /// Advance to a new time. Panics in debug builds if time would go backward.
    pub fn advance_to(&self, time: Timestamp) {
        let current = self.current.load(Ordering::SeqCst);
        debug_assert!(
            time >= current,
            "ManualClock: cannot go backward from {} to {}",
            current,
            time
        );
        self.current.store(time, Ordering::SeqCst);
    }

    pub fn advance_by(&self, delta: Timestamp) {
        self.current.fetch_add(delta, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        self.current.load(Ordering::SeqCst)
    }
}

impl fmt::Display for ManualClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}s", self.now())
    }
}
