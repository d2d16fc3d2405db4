//! Error types for the client transport

use std::io;
use std::time::Duration;

use bw_core::{ConfigError, ConnectionState};
use bw_protocol::{CorrelationId, ProtocolError, Status};
use thiserror::Error;

/// Transport-level failures
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// The TCP connect failed (refused, unreachable, bad address)
    #[error("Failed to connect to {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: io::Error,
    },

    /// The TCP connect did not complete in time
    #[error("Connection to {address} timed out after {timeout:?}")]
    ConnectTimeout { address: String, timeout: Duration },

    /// The peer closed the stream
    #[error("Connection closed by peer")]
    Closed,

    /// Read or write failure on an established stream
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Errors surfaced to callers of the client
#[derive(Debug, Error)]
pub enum ClientError {
    /// Transport failure
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    /// Malformed frame or unencodable message
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// No response within the invocation timeout
    #[error("Invocation timed out after {0:?}")]
    Timeout(Duration),

    /// The broker answered with a failure status
    #[error("Broker returned {status}: {message}")]
    Invocation { status: Status, message: String },

    /// Operation requires a connected client
    #[error("Client is not connected (state: {state})")]
    NotConnected { state: ConnectionState },

    /// A correlation id was registered twice
    #[error("Correlation id {0} is already outstanding")]
    DuplicateCorrelation(CorrelationId),

    /// The connection failed while the invocation was pending
    #[error("Connection lost: {reason}")]
    ConnectionLost { reason: String },

    /// The caller cancelled the invocation
    #[error("Invocation cancelled")]
    Cancelled,

    /// The client was closed while the operation was in progress
    #[error("Client closed")]
    Closed,

    /// Invalid client configuration
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl ClientError {
    /// Whether this failure ends the current connection
    pub fn is_connection_scoped(&self) -> bool {
        matches!(
            self,
            ClientError::Connection(_) | ClientError::ConnectionLost { .. }
        )
    }

    /// Whether retrying the same operation later may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ClientError::Connection(_)
                | ClientError::ConnectionLost { .. }
                | ClientError::Timeout(_)
                | ClientError::NotConnected { .. }
        )
    }

    pub(crate) fn lost(reason: impl Into<String>) -> Self {
        ClientError::ConnectionLost {
            reason: reason.into(),
        }
    }
}

/// I/O errors surfaced through the codec belong to the transport
pub(crate) fn classify(err: ProtocolError) -> ClientError {
    match err {
        ProtocolError::Io(e) => ClientError::Connection(ConnectionError::Io(e)),
        other => ClientError::Protocol(other),
    }
}
