//! Time sources.
//!
//! The manager never reads the system clock directly; it goes through
//! [`Clock`] so the relay TTL and the fresh-header sync gate can be
//! exercised deterministically.

use parking_lot::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

/// Wall-clock capability.
pub trait Clock: Send + Sync {
    /// Local unix time, seconds.
    fn unix_now(&self) -> i64;

    /// Peer-adjusted unix time, seconds. Equals [`Clock::unix_now`] unless
    /// the node applies a network time offset.
    fn adjusted_now(&self) -> i64 {
        self.unix_now()
    }
}

/// The real system clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn unix_now(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0)
    }
}

/// Hand-driven clock for tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Mutex<i64>,
}

impl ManualClock {
    /// Start at `now`.
    pub fn new(now: i64) -> Self {
        Self { now: Mutex::new(now) }
    }

    /// Set the current time.
    pub fn set(&self, now: i64) {
        *self.now.lock() = now;
    }

    /// Move time forward.
    pub fn advance(&self, secs: i64) {
        *self.now.lock() += secs;
    }
}

impl Clock for ManualClock {
    fn unix_now(&self) -> i64 {
        *self.now.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_advances() {
        let clock = ManualClock::new(100);
        assert_eq!(clock.unix_now(), 100);
        clock.advance(50);
        assert_eq!(clock.unix_now(), 150);
        assert_eq!(clock.adjusted_now(), 150);
    }

    #[test]
    fn test_system_clock_is_sane() {
        // Sometime after 2020.
        assert!(SystemClock.unix_now() > 1_577_836_800);
    }
}
