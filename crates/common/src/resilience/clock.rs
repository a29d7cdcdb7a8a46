//! Time abstraction for deterministic breaker timing
//!
//! Every timeout comparison a breaker makes goes through a single [`Clock`]
//! supplied at construction. Production code uses [`SystemClock`]; tests use
//! [`MockClock`] (or any `Fn() -> u64` closure) so that OPEN cooldowns can be
//! crossed instantly and reproducibly.
//!
//! # Examples
//!
//! ```
//! use std::time::Duration;
//!
//! use storefront_common::resilience::{Clock, MockClock};
//!
//! let clock = MockClock::at(1_000);
//! clock.advance(Duration::from_millis(250));
//! assert_eq!(clock.millis_since_epoch(), 1_250);
//!
//! // Closures work as clocks too.
//! let fixed = || 42_u64;
//! assert_eq!(fixed.millis_since_epoch(), 42);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Source of the current time in milliseconds since the UNIX epoch.
pub trait Clock: Send + Sync {
    /// Current time as milliseconds since the UNIX epoch.
    fn millis_since_epoch(&self) -> u64;
}

/// Wall clock used by default.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn millis_since_epoch(&self) -> u64 {
        let elapsed = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
        u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
    }
}

impl<F> Clock for F
where
    F: Fn() -> u64 + Send + Sync,
{
    fn millis_since_epoch(&self) -> u64 {
        self()
    }
}

/// Manually driven clock for tests.
///
/// Clones share the same underlying time, so a test can hand one clone to a
/// breaker and keep another to advance time.
#[derive(Debug, Clone, Default)]
pub struct MockClock {
    millis: Arc<AtomicU64>,
}

impl MockClock {
    /// Create a mock clock at the epoch (time zero).
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a mock clock at a fixed epoch-millisecond timestamp.
    pub fn at(millis: u64) -> Self {
        Self { millis: Arc::new(AtomicU64::new(millis)) }
    }

    /// Advance the clock by `duration`.
    pub fn advance(&self, duration: Duration) {
        let delta = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        self.advance_millis(delta);
    }

    /// Advance the clock by `millis` milliseconds.
    pub fn advance_millis(&self, millis: u64) {
        let _ = self.millis.fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
            Some(current.saturating_add(millis))
        });
    }

    /// Jump to an absolute timestamp (may move backwards).
    pub fn set_millis(&self, millis: u64) {
        self.millis.store(millis, Ordering::Release);
    }
}

impl Clock for MockClock {
    fn millis_since_epoch(&self) -> u64 {
        self.millis.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Validates the system clock returns a plausible wall-clock time.
    ///
    /// Assertions:
    /// - Ensures the timestamp is after 2020-01-01 (1_577_836_800_000 ms).
    #[test]
    fn test_system_clock_is_after_2020() {
        assert!(SystemClock.millis_since_epoch() > 1_577_836_800_000);
    }

    #[test]
    fn test_mock_clock_starts_at_zero() {
        assert_eq!(MockClock::new().millis_since_epoch(), 0);
    }

    /// Validates `MockClock::advance` and `advance_millis` accumulate.
    ///
    /// Assertions:
    /// - Confirms the clock reads `1_000 + 5_000 + 250`.
    #[test]
    fn test_mock_clock_advance() {
        let clock = MockClock::at(1_000);
        clock.advance(Duration::from_secs(5));
        clock.advance_millis(250);
        assert_eq!(clock.millis_since_epoch(), 6_250);
    }

    /// Validates clones observe the same time.
    ///
    /// Assertions:
    /// - Confirms advancing one clone is visible through the other.
    #[test]
    fn test_mock_clock_clones_share_time() {
        let clock1 = MockClock::at(10);
        let clock2 = clock1.clone();

        clock2.advance_millis(5);
        assert_eq!(clock1.millis_since_epoch(), 15);

        clock1.set_millis(3);
        assert_eq!(clock2.millis_since_epoch(), 3);
    }

    #[test]
    fn test_mock_clock_advance_saturates() {
        let clock = MockClock::at(u64::MAX - 1);
        clock.advance_millis(10);
        assert_eq!(clock.millis_since_epoch(), u64::MAX);
    }

    #[test]
    fn test_closure_and_shared_clocks() {
        let closure = || 7_u64;
        assert_eq!(closure.millis_since_epoch(), 7);

        let shared: Arc<dyn Clock> = Arc::new(MockClock::at(99));
        assert_eq!(shared.millis_since_epoch(), 99);
    }
}
