//! Time source
//!
//! Freshness (`max_age`) and cache retention (`gc_max_age`) are compared
//! against millisecond timestamps taken from an injectable [`Clock`], so tests
//! can move time forward deterministically.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Source of "now" in milliseconds.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> u64;
}

/// Wall clock (milliseconds since the Unix epoch).
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default()
    }
}

/// Manually advanced clock for tests and simulations.
///
/// Clones share the same time axis.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new(start: u64) -> Self {
        Self {
            now: Arc::new(AtomicU64::new(start)),
        }
    }

    pub fn advance(&self, delta: Duration) {
        self.now.fetch_add(millis(delta), Ordering::SeqCst);
    }

    pub fn set(&self, now: u64) {
        self.now.store(now, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Duration in whole milliseconds, saturating at `u64::MAX` (unlimited).
pub(crate) fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Absolute deadline `now + age`; unlimited ages map to `u64::MAX`.
pub(crate) fn deadline(now: u64, age: Duration) -> u64 {
    match millis(age) {
        u64::MAX => u64::MAX,
        age => now.saturating_add(age),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_advances() {
        let clock = ManualClock::new(1_000);
        let shared = clock.clone();
        clock.advance(Duration::from_millis(250));
        assert_eq!(shared.now(), 1_250);
        shared.set(5);
        assert_eq!(clock.now(), 5);
    }

    #[test]
    fn test_deadline_saturates() {
        assert_eq!(deadline(10, Duration::from_millis(5)), 15);
        assert_eq!(deadline(10, Duration::MAX), u64::MAX);
        assert_eq!(deadline(u64::MAX - 1, Duration::from_secs(1)), u64::MAX);
    }
}
