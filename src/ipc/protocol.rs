//! IPC message protocol definitions
//!
//! All messages are JSON-encoded, prefixed with a 4-byte little-endian length.
//! Subscribed clients additionally receive `PedalEvent` frames as they occur.

use serde::{Deserialize, Serialize};

use crate::events::PedalEvent;

/// Requests from UI to daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Request current daemon status
    GetStatus,

    /// Enable or disable pedal processing
    SetEnabled { enabled: bool },

    /// Ping to check connectivity
    Ping,

    /// Subscribe to pedal event notifications
    Subscribe,

    /// Release the modifier and stop the daemon
    Quit,
}

/// Responses from daemon to UI
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// Current daemon status
    Status(DaemonStatus),

    /// Enable toggle accepted
    EnabledChange { enabled: bool },

    /// Pong response to ping
    Pong,

    /// Subscription confirmed
    Subscribed,

    /// Quit accepted, daemon is stopping
    ShuttingDown,

    /// Error response
    Error { code: String, message: String },
}

/// Full daemon status snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonStatus {
    /// Daemon version
    pub version: String,

    /// Whether the pedal is attached
    pub connected: bool,

    /// Whether pedal processing is enabled
    pub enabled: bool,

    /// Whether the modifier is currently held
    pub pressed: bool,

    /// Uptime in seconds
    pub uptime_secs: u64,
}

impl Default for DaemonStatus {
    fn default() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            connected: false,
            enabled: true,
            pressed: false,
            uptime_secs: 0,
        }
    }
}

impl DaemonStatus {
    /// Fold a pedal event into the snapshot
    pub fn apply(&mut self, event: &PedalEvent) {
        match *event {
            PedalEvent::ConnectionChanged { connected } => self.connected = connected,
            PedalEvent::PressChanged { pressed } => self.pressed = pressed,
            PedalEvent::EnabledChanged { enabled } => self.enabled = enabled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serialization() {
        let req = Request::SetEnabled { enabled: false };
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("set_enabled"));
        assert!(json.contains("false"));
    }

    #[test]
    fn test_request_deserialization() {
        let req: Request = serde_json::from_str(r#"{"type":"quit"}"#).unwrap();
        assert!(matches!(req, Request::Quit));
    }

    #[test]
    fn test_response_serialization() {
        let resp = Response::Status(DaemonStatus::default());
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("status"));
        assert!(json.contains("\"enabled\":true"));
    }

    #[test]
    fn test_status_apply() {
        let mut status = DaemonStatus::default();
        status.apply(&PedalEvent::ConnectionChanged { connected: true });
        status.apply(&PedalEvent::PressChanged { pressed: true });
        assert!(status.connected);
        assert!(status.pressed);

        status.apply(&PedalEvent::EnabledChanged { enabled: false });
        status.apply(&PedalEvent::PressChanged { pressed: false });
        assert!(!status.enabled);
        assert!(!status.pressed);
        assert!(status.connected);
    }
}
