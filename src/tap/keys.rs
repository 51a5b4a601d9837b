//! Global input event model and modifier flag tracking
//!
//! Mirrors the subset of macOS CGEvent state the engine needs: the event
//! kind, the virtual key code for keystrokes, and the modifier flags.

use crate::engine::Timestamp;

/// macOS virtual key code of the keystroke the pedal emits natively ("b")
pub const PEDAL_KEYSTROKE_KEY_CODE: i64 = 11;

/// macOS virtual key code of Left Option, the modifier the pedal holds
pub const LEFT_OPTION_KEY_CODE: i64 = 58;

/// Modifier flag masks from macOS CGEventFlags
#[cfg(target_os = "macos")]
pub mod flags {
    use core_graphics::event::CGEventFlags;

    /// Shift key modifier flag
    pub const SHIFT: CGEventFlags = CGEventFlags::CGEventFlagShift;
    /// Control key modifier flag
    pub const CONTROL: CGEventFlags = CGEventFlags::CGEventFlagControl;
    /// Option/Alt key modifier flag
    pub const OPTION: CGEventFlags = CGEventFlags::CGEventFlagAlternate;
    /// Command key modifier flag
    pub const COMMAND: CGEventFlags = CGEventFlags::CGEventFlagCommand;
}

/// A single modifier key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Modifier {
    Shift,
    Control,
    Option,
    Command,
}

/// Set of modifier keys carried by an event
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Modifiers {
    /// Shift key is held
    pub shift: bool,
    /// Control key is held
    pub control: bool,
    /// Option/Alt key is held
    pub option: bool,
    /// Command key is held
    pub command: bool,
}

impl Modifiers {
    /// Create a new Modifiers set from CGEventFlags
    #[cfg(target_os = "macos")]
    pub fn from_flags(raw: core_graphics::event::CGEventFlags) -> Self {
        Self {
            shift: raw.contains(flags::SHIFT),
            control: raw.contains(flags::CONTROL),
            option: raw.contains(flags::OPTION),
            command: raw.contains(flags::COMMAND),
        }
    }

    pub fn contains(&self, modifier: Modifier) -> bool {
        match modifier {
            Modifier::Shift => self.shift,
            Modifier::Control => self.control,
            Modifier::Option => self.option,
            Modifier::Command => self.command,
        }
    }

    pub fn insert(&mut self, modifier: Modifier) {
        match modifier {
            Modifier::Shift => self.shift = true,
            Modifier::Control => self.control = true,
            Modifier::Option => self.option = true,
            Modifier::Command => self.command = true,
        }
    }

    /// Check if all modifiers are released
    pub fn is_empty(&self) -> bool {
        !self.shift && !self.control && !self.option && !self.command
    }
}

/// Kinds of host events the tap listens for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    KeyDown,
    KeyUp,
    FlagsChanged,
    MouseButton,
    MouseDrag,
    /// The host disabled the tap (timeout or user input)
    TapDisabled,
}

impl EventKind {
    pub fn is_keystroke(self) -> bool {
        matches!(self, EventKind::KeyDown | EventKind::KeyUp)
    }
}

/// A keyboard or mouse event seen at the interception point
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlobalInputEvent {
    pub kind: EventKind,
    /// Virtual key code, for keyboard events only
    pub key_code: Option<i64>,
    pub modifiers: Modifiers,
    pub timestamp: Timestamp,
}

impl GlobalInputEvent {
    /// Whether this is a press or release of `key_code`
    pub fn is_keystroke_of(&self, key_code: i64) -> bool {
        self.kind.is_keystroke() && self.key_code == Some(key_code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(kind: EventKind, key_code: Option<i64>) -> GlobalInputEvent {
        GlobalInputEvent {
            kind,
            key_code,
            modifiers: Modifiers::default(),
            timestamp: Timestamp::default(),
        }
    }

    #[test]
    fn test_empty_modifiers() {
        let modifiers = Modifiers::default();
        assert!(modifiers.is_empty());
        assert!(!modifiers.contains(Modifier::Option));
    }

    #[test]
    fn test_insert_option() {
        let mut modifiers = Modifiers {
            command: true,
            ..Default::default()
        };
        modifiers.insert(Modifier::Option);
        assert!(modifiers.contains(Modifier::Option));
        assert!(modifiers.contains(Modifier::Command));
        assert!(!modifiers.contains(Modifier::Shift));
        assert!(!modifiers.is_empty());
    }

    #[test]
    fn test_keystroke_matching() {
        let code = Some(PEDAL_KEYSTROKE_KEY_CODE);
        assert!(event(EventKind::KeyDown, code).is_keystroke_of(PEDAL_KEYSTROKE_KEY_CODE));
        assert!(event(EventKind::KeyUp, code).is_keystroke_of(PEDAL_KEYSTROKE_KEY_CODE));
        assert!(!event(EventKind::FlagsChanged, code).is_keystroke_of(PEDAL_KEYSTROKE_KEY_CODE));
        assert!(!event(EventKind::KeyDown, Some(0)).is_keystroke_of(PEDAL_KEYSTROKE_KEY_CODE));
        assert!(!event(EventKind::MouseButton, None).is_keystroke_of(PEDAL_KEYSTROKE_KEY_CODE));
    }
}
