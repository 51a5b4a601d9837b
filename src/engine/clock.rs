//! Monotonic time source shared by the device reader and the event tap

use std::time::{Duration, Instant};

/// Nanoseconds since a process-wide clock origin
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Build a timestamp from raw nanoseconds
    pub const fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }

    /// Build a timestamp from milliseconds
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis * 1_000_000)
    }

    pub fn as_nanos(self) -> u64 {
        self.0
    }

    /// Time elapsed since `earlier`, zero if `earlier` is in the future
    pub fn saturating_since(self, earlier: Timestamp) -> Duration {
        Duration::from_nanos(self.0.saturating_sub(earlier.0))
    }
}

/// Source of monotonic timestamps
pub trait Clock {
    fn now(&self) -> Timestamp;
}

/// Clock backed by `std::time::Instant`
///
/// Copies share the same origin, so timestamps taken on the device reader
/// thread and on the event tap thread are directly comparable.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> Timestamp {
        let nanos = self.origin.elapsed().as_nanos();
        Timestamp(u64::try_from(nanos).unwrap_or(u64::MAX))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_saturating_since() {
        let a = Timestamp::from_millis(100);
        let b = Timestamp::from_millis(250);
        assert_eq!(b.saturating_since(a), Duration::from_millis(150));
        assert_eq!(a.saturating_since(b), Duration::ZERO);
    }

    #[test]
    fn test_monotonic_clock_copies_share_origin() {
        let clock = MonotonicClock::new();
        let copy = clock;
        let first = clock.now();
        let second = copy.now();
        assert!(second >= first);
    }
}
