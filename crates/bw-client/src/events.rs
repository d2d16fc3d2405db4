//! Connection lifecycle notifications

use std::fmt;
use std::time::Duration;

/// Capacity of the lifecycle event channel
pub(crate) const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Lifecycle change broadcast to every subscriber of [`Client::events`]
///
/// [`Client::events`]: crate::Client::events
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// A connection to `address` was established
    Connected { address: String },
    /// The connection ended
    Disconnected { reason: String },
    /// An automatic reconnect attempt is scheduled after `delay`
    Reconnecting { attempt: u32, delay: Duration },
    /// Automatic reconnect gave up
    ReconnectFailed { attempts: u32 },
}

impl fmt::Display for ClientEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientEvent::Connected { address } => write!(f, "connected to {}", address),
            ClientEvent::Disconnected { reason } => write!(f, "disconnected: {}", reason),
            ClientEvent::Reconnecting { attempt, delay } => {
                write!(f, "reconnect attempt {} in {:?}", attempt, delay)
            }
            ClientEvent::ReconnectFailed { attempts } => {
                write!(f, "reconnect failed after {} attempts", attempts)
            }
        }
    }
}
