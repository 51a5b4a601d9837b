//! Status notifications for the presentation layer
//!
//! Emitted by the engine on every connection, press, or enabled change and
//! pushed to subscribed IPC clients.

use serde::{Deserialize, Serialize};

/// Events emitted by the engine when observable state changes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PedalEvent {
    /// Pedal attached or detached
    ConnectionChanged {
        /// Whether the pedal is now attached
        connected: bool,
    },

    /// Pedal pressed or released (modifier injected)
    PressChanged {
        /// Whether the modifier is now held
        pressed: bool,
    },

    /// Engine enabled or disabled administratively
    EnabledChanged {
        /// Whether the engine now processes pedal input
        enabled: bool,
    },
}

impl std::fmt::Display for PedalEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PedalEvent::ConnectionChanged { connected: true } => write!(f, "PEDAL_CONNECTED"),
            PedalEvent::ConnectionChanged { connected: false } => write!(f, "PEDAL_DISCONNECTED"),
            PedalEvent::PressChanged { pressed: true } => write!(f, "PEDAL_PRESSED"),
            PedalEvent::PressChanged { pressed: false } => write!(f, "PEDAL_RELEASED"),
            PedalEvent::EnabledChanged { enabled: true } => write!(f, "ENGINE_ENABLED"),
            PedalEvent::EnabledChanged { enabled: false } => write!(f, "ENGINE_DISABLED"),
        }
    }
}
