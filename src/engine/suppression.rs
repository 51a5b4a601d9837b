//! Keystroke-suppression window
//!
//! The pedal's native keystroke and its HID report are not delivered
//! atomically. On a fast tap the pressed flag can already be false by the
//! time the stray keystroke reaches the tap, so suppression is keyed on how
//! recently the device reported anything at all.

use std::time::Duration;

use super::clock::Timestamp;

/// Default window length, longer than the debounce interval
pub const DEFAULT_SUPPRESSION_WINDOW: Duration = Duration::from_millis(150);

/// True if `now` falls within `window` of the last device report
pub fn is_within_window(now: Timestamp, last_report: Option<Timestamp>, window: Duration) -> bool {
    match last_report {
        None => false,
        Some(last) => now.saturating_since(last) < window,
    }
}

/// Rolling window refreshed on every raw device report
#[derive(Debug, Clone)]
pub struct SuppressionWindow {
    last_report: Option<Timestamp>,
    length: Duration,
}

impl SuppressionWindow {
    pub fn new(length: Duration) -> Self {
        Self {
            last_report: None,
            length,
        }
    }

    /// Record device activity, regardless of debounce outcome
    pub fn mark_device_activity(&mut self, now: Timestamp) {
        self.last_report = Some(now);
    }

    pub fn is_open(&self, now: Timestamp) -> bool {
        is_within_window(now, self.last_report, self.length)
    }

    pub fn last_report(&self) -> Option<Timestamp> {
        self.last_report
    }
}
