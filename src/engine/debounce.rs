//! Debounce filter for pedal state transitions
//!
//! A single physical tap can produce several noisy reports. Only the first
//! state-changing report inside the interval is honored.

use std::time::Duration;

use super::clock::Timestamp;

/// Default minimum spacing between accepted transitions
pub const DEFAULT_DEBOUNCE_INTERVAL: Duration = Duration::from_millis(100);

/// Decide whether a transition at `now` may be accepted.
///
/// `None` means no transition has been accepted yet. The caller records
/// `now` as the new last-accepted time when this returns true.
pub fn accept(now: Timestamp, last_accepted: Option<Timestamp>, min_interval: Duration) -> bool {
    match last_accepted {
        None => true,
        Some(last) => now.saturating_since(last) >= min_interval,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INTERVAL: Duration = DEFAULT_DEBOUNCE_INTERVAL;

    #[test]
    fn test_first_transition_accepted() {
        assert!(accept(Timestamp::from_millis(0), None, INTERVAL));
    }

    #[test]
    fn test_rejects_inside_interval() {
        let last = Some(Timestamp::from_millis(0));
        assert!(!accept(Timestamp::from_millis(50), last, INTERVAL));
        assert!(!accept(Timestamp::from_nanos(99_999_999), last, INTERVAL));
    }

    #[test]
    fn test_accepts_at_boundary() {
        let last = Some(Timestamp::from_millis(0));
        assert!(accept(Timestamp::from_millis(100), last, INTERVAL));
        assert!(accept(Timestamp::from_millis(300), last, INTERVAL));
    }

    #[test]
    fn test_clock_going_backwards_rejects() {
        let last = Some(Timestamp::from_millis(500));
        assert!(!accept(Timestamp::from_millis(400), last, INTERVAL));
    }
}
