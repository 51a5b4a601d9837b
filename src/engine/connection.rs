//! Device attachment state

/// Whether the matched pedal is currently attached
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Connection {
    #[default]
    Disconnected,
    Connected,
}

impl Connection {
    pub fn is_connected(self) -> bool {
        matches!(self, Connection::Connected)
    }

    /// Apply a match/removal signal. Returns the new state if it changed.
    pub fn transition(self, attached: bool) -> Option<Connection> {
        let next = if attached {
            Connection::Connected
        } else {
            Connection::Disconnected
        };
        (next != self).then_some(next)
    }
}

impl std::fmt::Display for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Connection::Disconnected => write!(f, "Disconnected"),
            Connection::Connected => write!(f, "Connected"),
        }
    }
}
