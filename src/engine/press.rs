//! Pedal press state and the modifier commands it produces

use crate::hid::{DeviceReport, UsageCategory};

/// Generic Desktop system-control usages the pedal may report
const SYSTEM_CONTROL_USAGES: std::ops::RangeInclusive<u32> = 0x80..=0x83;

/// Logical state of the pedal
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PressState {
    #[default]
    Released,
    Pressed,
}

/// Command for the synthetic modifier injection facility
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModifierCommand {
    /// Press and hold the target modifier
    Down,
    /// Release the target modifier
    Up,
}

impl PressState {
    pub fn is_pressed(self) -> bool {
        matches!(self, PressState::Pressed)
    }

    /// Feed the asserted state of an accepted report.
    ///
    /// Self-transitions return `None`.
    pub fn transition(self, asserted: bool) -> Option<(PressState, ModifierCommand)> {
        match (self, asserted) {
            (PressState::Released, true) => Some((PressState::Pressed, ModifierCommand::Down)),
            (PressState::Pressed, false) => Some((PressState::Released, ModifierCommand::Up)),
            _ => None,
        }
    }
}

impl std::fmt::Display for PressState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PressState::Released => write!(f, "Released"),
            PressState::Pressed => write!(f, "Pressed"),
        }
    }
}

/// Whether a report can drive the press state machine
pub fn is_recognized(report: &DeviceReport) -> bool {
    match report.usage_category {
        UsageCategory::Keyboard | UsageCategory::Button | UsageCategory::Consumer => true,
        UsageCategory::GenericDesktop => SYSTEM_CONTROL_USAGES.contains(&report.usage_code),
    }
}

/// The pressed boolean a report asserts
pub fn asserts_pressed(report: &DeviceReport) -> bool {
    report.raw_value != 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Timestamp;

    fn report(usage_category: UsageCategory, usage_code: u32) -> DeviceReport {
        DeviceReport {
            usage_category,
            usage_code,
            raw_value: 1,
            timestamp: Timestamp::default(),
        }
    }

    #[test]
    fn test_press_release_commands() {
        let (state, cmd) = PressState::Released.transition(true).unwrap();
        assert_eq!(state, PressState::Pressed);
        assert_eq!(cmd, ModifierCommand::Down);

        let (state, cmd) = state.transition(false).unwrap();
        assert_eq!(state, PressState::Released);
        assert_eq!(cmd, ModifierCommand::Up);
    }

    #[test]
    fn test_self_transitions_are_silent() {
        assert!(PressState::Released.transition(false).is_none());
        assert!(PressState::Pressed.transition(true).is_none());
    }

    #[test]
    fn test_recognized_usages() {
        assert!(is_recognized(&report(UsageCategory::Keyboard, 0x05)));
        assert!(is_recognized(&report(UsageCategory::Button, 1)));
        assert!(is_recognized(&report(UsageCategory::Consumer, 0xE9)));
        assert!(is_recognized(&report(UsageCategory::GenericDesktop, 0x80)));
        assert!(is_recognized(&report(UsageCategory::GenericDesktop, 0x83)));
        assert!(!is_recognized(&report(UsageCategory::GenericDesktop, 0x30)));
        assert!(!is_recognized(&report(UsageCategory::GenericDesktop, 0x84)));
    }
}
