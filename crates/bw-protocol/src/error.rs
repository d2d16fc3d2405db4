//! Protocol error types

use thiserror::Error;

/// Errors that can occur while encoding or decoding messages
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Frame did not start with the expected magic byte
    #[error("Invalid frame header: bad magic byte 0x{0:02x}")]
    InvalidMagic(u8),

    /// Unknown frame kind
    #[error("Unknown frame kind: 0x{0:02x}")]
    UnknownFrameKind(u8),

    /// Frame kind disagrees with the decoded message
    #[error("Frame kind mismatch: header says {header}, payload is {payload}")]
    FrameKindMismatch {
        header: &'static str,
        payload: &'static str,
    },

    /// Payload exceeds maximum size
    #[error("Payload too large: {size} bytes exceeds maximum of {max} bytes")]
    PayloadTooLarge { size: usize, max: usize },

    /// Text frame start line could not be parsed
    #[error("Malformed start line: {0:?}")]
    MalformedStartLine(String),

    /// Text frame header line could not be parsed
    #[error("Malformed header line: {0:?}")]
    MalformedHeader(String),

    /// Text frame carried an unusable content-length
    #[error("Invalid content-length: {0:?}")]
    InvalidContentLength(String),

    /// Text frame did not carry a command header
    #[error("Missing command header")]
    MissingCommand,

    /// Command is empty or contains characters the wire cannot carry
    #[error("Invalid command: {0:?}")]
    InvalidCommand(String),

    /// Header name is empty or contains characters the wire cannot carry
    #[error("Invalid header name: {0:?}")]
    InvalidHeaderName(String),

    /// Header value contains line breaks
    #[error("Invalid value for header {name:?}")]
    InvalidHeaderValue { name: String },

    /// Header name is used by the framing itself
    #[error("Header {0:?} is reserved by the framing")]
    ReservedHeader(String),

    /// Frame ended in the middle of a message
    #[error("Incomplete frame: {remaining} bytes left at end of stream")]
    IncompleteFrame { remaining: usize },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
