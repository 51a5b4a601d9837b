//! Global input interception
//!
//! Defines the event model the engine reasons about and, on macOS, the
//! CGEventTap-driven pedal loop plus Option key injection.

#[cfg(target_os = "macos")]
mod inject;
mod keys;
#[cfg(target_os = "macos")]
mod listener;

pub use keys::{EventKind, GlobalInputEvent, Modifier, Modifiers, PEDAL_KEYSTROKE_KEY_CODE};
#[cfg(target_os = "macos")]
pub use listener::{PedalLoop, TapError};
