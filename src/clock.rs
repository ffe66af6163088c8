//! Clock abstraction for all time sampling inside the store.
//!
//! Every timestamp the engine uses — registration times, command times,
//! vacuum eligibility checks — comes from a [`Clock`] rather than from ad-hoc
//! wall-clock reads. Production code uses [`SystemClock`]; tests drive a
//! [`ManualClock`] so time-dependent behavior is deterministic.

use std::sync::atomic::{AtomicI64, Ordering};

/// Source of the current time in milliseconds since the Unix epoch.
pub trait Clock: Send + Sync + 'static {
    /// Current time in milliseconds.
    fn now_millis(&self) -> i64;
}

/// Wall clock backed by the system time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Manually advanced clock for deterministic tests.
///
/// Time never moves unless the test moves it. Shared freely across threads;
/// all updates are atomic.
#[derive(Debug)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    /// Create a clock frozen at `start_millis`.
    pub fn new(start_millis: i64) -> Self {
        Self {
            now: AtomicI64::new(start_millis),
        }
    }

    /// Move the clock forward by `millis`.
    pub fn advance(&self, millis: i64) {
        self.now.fetch_add(millis, Ordering::SeqCst);
    }

    /// Jump the clock to an absolute time.
    pub fn set(&self, millis: i64) {
        self.now.store(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_starts_frozen() {
        let clock = ManualClock::new(5_000);
        assert_eq!(clock.now_millis(), 5_000);
        assert_eq!(clock.now_millis(), 5_000);
    }

    #[test]
    fn manual_clock_advance_and_set() {
        let clock = ManualClock::new(0);
        clock.advance(250);
        assert_eq!(clock.now_millis(), 250);
        clock.set(10_000);
        assert_eq!(clock.now_millis(), 10_000);
    }

    #[test]
    fn system_clock_is_monotonic_enough() {
        let clock = SystemClock;
        let a = clock.now_millis();
        let b = clock.now_millis();
        assert!(b >= a);
    }
}
