//! HTTP-style text codec
//!
//! Frames look like HTTP/1.1 messages so they can be read on the wire:
//!
//! ```text
//! POST / HTTP/1.1\r\n            (request)   or   HTTP/1.1 200 OK\r\n  (response)
//! cmd: produce\r\n
//! id: 3f1c...\r\n
//! topic: orders\r\n
//! content-length: 5\r\n
//! \r\n
//! hello
//! ```
//!
//! Header names are lowercased. The `cmd` and `content-length` headers belong
//! to the framing and cannot be set by the application. Exactly one space
//! after the colon is stripped from a value, so values keep any other
//! surrounding whitespace.

use bytes::{BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::codec::MessageCodec;
use crate::error::ProtocolError;
use crate::frame::MAX_PAYLOAD_SIZE;
use crate::headers::{header, is_token, Headers};
use crate::message::{Command, Message, Status};

/// Default limit on the size of the start line plus header lines
pub const MAX_HEAD_SIZE: usize = 64 * 1024;

const HEAD_TERMINATOR: &[u8] = b"\r\n\r\n";
const REQUEST_LINE: &str = "POST / HTTP/1.1";
const HTTP_VERSION_PREFIX: &str = "HTTP/";

/// Head of a frame whose body has not fully arrived yet
#[derive(Debug)]
struct PendingHead {
    head_len: usize,
    command: Command,
    headers: Headers,
    status: Option<Status>,
    body_len: usize,
}

/// Codec for HTTP-style header-line frames
#[derive(Debug)]
pub struct TextCodec {
    pending: Option<PendingHead>,
    /// Bytes already searched for the head terminator
    scanned: usize,
    max_head: usize,
    max_body: usize,
}

impl TextCodec {
    /// Create a new codec
    pub fn new() -> Self {
        Self::with_limits(MAX_HEAD_SIZE, MAX_PAYLOAD_SIZE)
    }

    /// Create a codec with custom head and body limits
    pub fn with_limits(max_head: usize, max_body: usize) -> Self {
        Self {
            pending: None,
            scanned: 0,
            max_head,
            max_body,
        }
    }

    fn find_head_end(&mut self, src: &BytesMut) -> Option<usize> {
        let start = self
            .scanned
            .saturating_sub(HEAD_TERMINATOR.len() - 1)
            .min(src.len());
        match src[start..]
            .windows(HEAD_TERMINATOR.len())
            .position(|w| w == HEAD_TERMINATOR)
        {
            Some(pos) => Some(start + pos),
            None => {
                self.scanned = src.len();
                None
            }
        }
    }

    fn parse_head(&self, head: &[u8]) -> Result<PendingHead, ProtocolError> {
        let text = std::str::from_utf8(head).map_err(|_| {
            ProtocolError::MalformedStartLine(String::from_utf8_lossy(head).into_owned())
        })?;
        let mut lines = text.split("\r\n");

        let start_line = lines.next().unwrap_or_default();
        let status = parse_start_line(start_line)?;

        let mut headers = Headers::new();
        for line in lines {
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| ProtocolError::MalformedHeader(line.to_string()))?;
            if !is_token(name) {
                return Err(ProtocolError::MalformedHeader(line.to_string()));
            }
            let value = value.strip_prefix(' ').unwrap_or(value);
            headers.insert(name, value);
        }

        let body_len = match headers.remove(header::CONTENT_LENGTH) {
            Some(raw) => raw
                .trim()
                .parse::<usize>()
                .map_err(|_| ProtocolError::InvalidContentLength(raw.clone()))?,
            None => 0,
        };
        if body_len > self.max_body {
            return Err(ProtocolError::PayloadTooLarge {
                size: body_len,
                max: self.max_body,
            });
        }

        let command = Command::new(
            headers
                .remove(header::COMMAND)
                .ok_or(ProtocolError::MissingCommand)?,
        );
        command.validate()?;

        Ok(PendingHead {
            head_len: head.len() + HEAD_TERMINATOR.len(),
            command,
            headers,
            status,
            body_len,
        })
    }
}

impl Default for TextCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageCodec for TextCodec {
    fn name(&self) -> &'static str {
        "text"
    }

    fn fresh(&self) -> Self {
        Self::with_limits(self.max_head, self.max_body)
    }
}

/// Parse a request line or status line, returning the status for responses
fn parse_start_line(line: &str) -> Result<Option<Status>, ProtocolError> {
    let malformed = || ProtocolError::MalformedStartLine(line.to_string());
    let mut parts = line.splitn(3, ' ');
    let first = parts.next().unwrap_or_default();

    if first.starts_with(HTTP_VERSION_PREFIX) {
        // HTTP/1.1 200 OK
        let code = parts
            .next()
            .and_then(|c| c.parse::<u16>().ok())
            .ok_or_else(malformed)?;
        Ok(Some(Status(code)))
    } else {
        // METHOD URL HTTP/1.1
        let _url = parts.next().ok_or_else(malformed)?;
        let version = parts.next().ok_or_else(malformed)?;
        if first.is_empty() || !version.starts_with(HTTP_VERSION_PREFIX) {
            return Err(malformed());
        }
        Ok(None)
    }
}

impl Decoder for TextCodec {
    type Item = Message;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let head = match self.pending.take() {
            Some(head) => head,
            None => match self.find_head_end(src) {
                Some(end) => {
                    if end > self.max_head {
                        return Err(ProtocolError::PayloadTooLarge {
                            size: end,
                            max: self.max_head,
                        });
                    }
                    self.parse_head(&src[..end])?
                }
                None if src.len() > self.max_head => {
                    return Err(ProtocolError::PayloadTooLarge {
                        size: src.len(),
                        max: self.max_head,
                    });
                }
                None => return Ok(None), // Need more data
            },
        };

        let frame_len = head.head_len + head.body_len;
        if src.len() < frame_len {
            src.reserve(frame_len - src.len());
            self.pending = Some(head);
            return Ok(None);
        }

        let _ = src.split_to(head.head_len);
        let body: Bytes = src.split_to(head.body_len).freeze();
        self.scanned = 0;

        Ok(Some(Message::from_parts(
            head.command,
            head.headers,
            body,
            head.status,
        )))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(message) => Ok(Some(message)),
            None if src.is_empty() => Ok(None),
            None => {
                let remaining = src.len();
                src.clear();
                self.pending = None;
                self.scanned = 0;
                Err(ProtocolError::IncompleteFrame { remaining })
            }
        }
    }
}

impl Encoder<Message> for TextCodec {
    type Error = ProtocolError;

    fn encode(&mut self, message: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        message.validate()?;
        for reserved in [header::COMMAND, header::CONTENT_LENGTH] {
            if message.headers().contains(reserved) {
                return Err(ProtocolError::ReservedHeader(reserved.to_string()));
            }
        }
        if message.body().len() > self.max_body {
            return Err(ProtocolError::PayloadTooLarge {
                size: message.body().len(),
                max: self.max_body,
            });
        }

        let mut head = String::with_capacity(128);
        match message.status() {
            Some(status) => {
                head.push_str(&format!("HTTP/1.1 {} {}\r\n", status.code(), status.reason()))
            }
            None => {
                head.push_str(REQUEST_LINE);
                head.push_str("\r\n");
            }
        }
        head.push_str(&format!("{}: {}\r\n", header::COMMAND, message.command()));
        for (name, value) in message.headers().iter() {
            head.push_str(&format!("{}: {}\r\n", name, value));
        }
        head.push_str(&format!(
            "{}: {}\r\n\r\n",
            header::CONTENT_LENGTH,
            message.body().len()
        ));

        if head.len() > self.max_head {
            return Err(ProtocolError::PayloadTooLarge {
                size: head.len(),
                max: self.max_head,
            });
        }

        dst.reserve(head.len() + message.body().len());
        dst.put_slice(head.as_bytes());
        dst.put_slice(message.body());
        Ok(())
    }
}
