//! Core domain types

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of the client's connection to the broker
///
/// ```text
/// Disconnected -> Connecting -> Connected -> Disconnected   (failure)
///                                         -> Closing -> Disconnected   (close)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionState {
    /// No live connection
    Disconnected,
    /// A connect attempt is in progress
    Connecting,
    /// Connected and ready for requests
    Connected,
    /// An explicit close is tearing the connection down
    Closing,
}

impl ConnectionState {
    /// Whether requests may be issued in this state
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    /// Whether `next` is a legal transition from this state
    pub fn can_transition_to(&self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Connecting, Connected)
                | (Connecting, Disconnected)
                | (Connecting, Closing)
                | (Connected, Disconnected)
                | (Connected, Closing)
                | (Closing, Disconnected)
        )
    }
}

impl Default for ConnectionState {
    fn default() -> Self {
        ConnectionState::Disconnected
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Closing => write!(f, "closing"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_state_display() {
        assert_eq!(format!("{}", ConnectionState::Connected), "connected");
        assert_eq!(
            format!("{}", ConnectionState::Disconnected),
            "disconnected"
        );
    }

    #[test]
    fn test_state_machine_transitions() {
        use ConnectionState::*;

        assert!(Disconnected.can_transition_to(Connecting));
        assert!(Connecting.can_transition_to(Connected));
        assert!(Connected.can_transition_to(Disconnected));
        assert!(Connected.can_transition_to(Closing));
        assert!(Closing.can_transition_to(Disconnected));

        assert!(!Disconnected.can_transition_to(Connected));
        assert!(!Closing.can_transition_to(Connected));
        assert!(!Connected.can_transition_to(Connecting));
    }

    #[test]
    fn test_only_connected_accepts_requests() {
        assert!(ConnectionState::Connected.is_connected());
        assert!(!ConnectionState::Connecting.is_connected());
        assert!(!ConnectionState::Closing.is_connected());
    }
}
