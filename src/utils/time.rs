// src/utils/time.rs
//! Clock abstraction
//!
//! Batch file names encode their creation time in milliseconds since the
//! Unix epoch, and every age computation goes through a `TimeProvider` so
//! tests can drive time explicitly.

use std::sync::atomic::{AtomicI64, Ordering};

/// Source of the current wall-clock time
pub trait TimeProvider: Send + Sync {
    /// Milliseconds since the Unix epoch
    fn now_millis(&self) -> i64;
}

/// Wall clock backed by `chrono::Utc`
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeProvider;

impl TimeProvider for SystemTimeProvider {
    fn now_millis(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Manually driven clock
#[derive(Debug)]
pub struct FakeTimeProvider {
    now: AtomicI64,
}

impl FakeTimeProvider {
    pub fn new(start_millis: i64) -> Self {
        Self {
            now: AtomicI64::new(start_millis),
        }
    }

    /// Move the clock forward
    pub fn advance(&self, millis: i64) {
        self.now.fetch_add(millis, Ordering::SeqCst);
    }

    pub fn set(&self, millis: i64) {
        self.now.store(millis, Ordering::SeqCst);
    }
}

impl Default for FakeTimeProvider {
    fn default() -> Self {
        Self::new(1_700_000_000_000)
    }
}

impl TimeProvider for FakeTimeProvider {
    fn now_millis(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fake_clock() {
        let clock = FakeTimeProvider::new(1000);
        assert_eq!(clock.now_millis(), 1000);

        clock.advance(500);
        assert_eq!(clock.now_millis(), 1500);

        clock.set(42);
        assert_eq!(clock.now_millis(), 42);
    }

    #[test]
    fn test_system_clock_is_after_2020() {
        assert!(SystemTimeProvider.now_millis() > 1_577_836_800_000);
    }
}
