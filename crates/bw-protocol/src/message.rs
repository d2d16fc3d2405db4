//! Message envelope for the broker protocol
//!
//! A [`Message`] is the single unit exchanged in both directions: the client
//! sends requests, the broker answers with responses and may push
//! notifications. Every message has a command, a header map and an opaque
//! body; responses additionally carry a [`Status`].
//!
//! # Correlation
//!
//! A request that expects a reply carries a unique value in the
//! [`CORRELATION_ID`](crate::header::CORRELATION_ID) header and the broker
//! echoes it on the response. A message without a correlation id is either a
//! one-way notification or a heartbeat.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::correlation::CorrelationId;
use crate::error::ProtocolError;
use crate::headers::{header, is_token, Headers};

/// Command naming the operation a message performs
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Command(String);

impl Command {
    /// Reserved command for keep-alive messages
    pub const HEARTBEAT: &'static str = "heartbeat";

    /// Create a command
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The reserved heartbeat command
    pub fn heartbeat() -> Self {
        Self(Self::HEARTBEAT.to_string())
    }

    /// Check if this is the heartbeat command
    pub fn is_heartbeat(&self) -> bool {
        self.0 == Self::HEARTBEAT
    }

    /// Get the command name
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Check the command can be carried on the wire
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if is_token(&self.0) {
            Ok(())
        } else {
            Err(ProtocolError::InvalidCommand(self.0.clone()))
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Command {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl From<String> for Command {
    fn from(name: String) -> Self {
        Self(name)
    }
}

/// Outcome code set by the broker on a response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Status(pub u16);

impl Status {
    pub const OK: Status = Status(200);
    pub const BAD_REQUEST: Status = Status(400);
    pub const UNAUTHORIZED: Status = Status(401);
    pub const FORBIDDEN: Status = Status(403);
    pub const NOT_FOUND: Status = Status(404);
    pub const INTERNAL_SERVER_ERROR: Status = Status(500);
    pub const SERVICE_UNAVAILABLE: Status = Status(503);

    /// Get the raw code
    pub fn code(&self) -> u16 {
        self.0
    }

    /// Codes in the 2xx range are successful
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.0)
    }

    /// Reason phrase for well-known codes
    pub fn reason(&self) -> &'static str {
        match self.0 {
            100 => "Continue",
            101 => "Switching Protocols",
            200 => "OK",
            400 => "Bad Request",
            401 => "Unauthorized",
            403 => "Forbidden",
            404 => "Not Found",
            405 => "Method Not Allowed",
            500 => "Internal Server Error",
            502 => "Bad Gateway",
            503 => "Service Unavailable",
            504 => "Gateway Timeout",
            _ => "Unknown Status",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.0, self.reason())
    }
}

impl From<u16> for Status {
    fn from(code: u16) -> Self {
        Self(code)
    }
}

/// A protocol message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    command: Command,
    headers: Headers,
    body: Bytes,
    status: Option<Status>,
}

impl Message {
    /// Create a request with an empty body and no headers
    pub fn new(command: impl Into<Command>) -> Self {
        Self {
            command: command.into(),
            headers: Headers::new(),
            body: Bytes::new(),
            status: None,
        }
    }

    /// Create a heartbeat stamped with the given millisecond timestamp
    pub fn heartbeat(timestamp_millis: u64) -> Self {
        Self::new(Command::heartbeat()).with_header(header::TIMESTAMP, timestamp_millis.to_string())
    }

    /// Create a response to `request`, echoing its command and correlation id
    pub fn response_to(request: &Message, status: Status) -> Self {
        let mut response = Self::new(request.command.clone()).with_status(status);
        if let Some(id) = request.headers.get(header::CORRELATION_ID) {
            response.headers.insert(header::CORRELATION_ID, id);
        }
        response
    }

    /// Add a header
    pub fn with_header(mut self, key: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers.insert(key, value);
        self
    }

    /// Set the body
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Set the status
    pub fn with_status(mut self, status: Status) -> Self {
        self.status = Some(status);
        self
    }

    /// Set the correlation id
    pub fn with_correlation_id(mut self, id: CorrelationId) -> Self {
        self.set_correlation_id(id);
        self
    }

    pub fn command(&self) -> &Command {
        &self.command
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn status(&self) -> Option<Status> {
        self.status
    }

    /// Get a single header value
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key)
    }

    /// Correlation id, if this message carries one
    pub fn correlation_id(&self) -> Option<CorrelationId> {
        self.headers
            .get(header::CORRELATION_ID)
            .filter(|id| !id.is_empty())
            .map(CorrelationId::from)
    }

    /// Set or replace the correlation id
    pub fn set_correlation_id(&mut self, id: CorrelationId) {
        self.headers.insert(header::CORRELATION_ID, id.into_inner());
    }

    /// Check if this message uses the reserved heartbeat command
    pub fn is_heartbeat(&self) -> bool {
        self.command.is_heartbeat()
    }

    /// Check if this message carries a status (i.e. is a response)
    pub fn is_response(&self) -> bool {
        self.status.is_some()
    }

    /// Body interpreted as UTF-8, lossily
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Split into command, headers, body and status
    pub fn into_parts(self) -> (Command, Headers, Bytes, Option<Status>) {
        (self.command, self.headers, self.body, self.status)
    }

    /// Reassemble a message from its parts
    pub fn from_parts(
        command: Command,
        headers: Headers,
        body: Bytes,
        status: Option<Status>,
    ) -> Self {
        Self {
            command,
            headers,
            body,
            status,
        }
    }

    /// Check the command and headers can be carried by every codec
    pub fn validate(&self) -> Result<(), ProtocolError> {
        self.command.validate()?;
        self.headers.validate()
    }
}
