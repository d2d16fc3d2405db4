//! Binary frame header encoding/decoding
//!
//! The binary framing uses an 8-byte header:
//! - magic: 1 byte (always `0xB7`)
//! - frame_kind: 1 byte (u8)
//! - flags: 2 bytes (u16, big-endian, currently zero)
//! - payload_length: 4 bytes (u32, big-endian)

use bytes::{Buf, BufMut, BytesMut};

use crate::error::ProtocolError;

/// First byte of every binary frame
pub const MAGIC: u8 = 0xB7;

/// Size of the frame header in bytes
pub const HEADER_SIZE: usize = 8;

/// Default maximum payload size (16MB)
pub const MAX_PAYLOAD_SIZE: usize = 16 * 1024 * 1024;

/// Kind of message carried by a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameKind {
    /// Request or notification (no status)
    Request = 0x01,
    /// Response (carries a status)
    Response = 0x02,
}

impl FrameKind {
    /// Convert to u8
    pub fn as_u8(&self) -> u8 {
        *self as u8
    }

    /// Convert from u8
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::Request),
            0x02 => Some(Self::Response),
            _ => None,
        }
    }

    pub(crate) fn name(&self) -> &'static str {
        match self {
            Self::Request => "request",
            Self::Response => "response",
        }
    }
}

/// Frame header containing kind and length information
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Kind of message in the payload
    pub kind: FrameKind,
    /// Reserved flag bits
    pub flags: u16,
    /// Length of the payload in bytes
    pub payload_length: u32,
}

impl FrameHeader {
    /// Create a new frame header
    pub fn new(kind: FrameKind, payload_length: u32) -> Self {
        Self {
            kind,
            flags: 0,
            payload_length,
        }
    }

    /// Encode the header into a byte buffer
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.reserve(HEADER_SIZE);
        dst.put_u8(MAGIC);
        dst.put_u8(self.kind.as_u8());
        dst.put_u16(self.flags);
        dst.put_u32(self.payload_length);
    }

    /// Decode a header from a byte buffer
    ///
    /// Returns None if there aren't enough bytes in the buffer.
    /// Returns Err if the header is invalid (bad magic, unknown kind).
    pub fn decode(src: &mut BytesMut) -> Result<Option<Self>, ProtocolError> {
        if src.len() < HEADER_SIZE {
            return Ok(None);
        }

        // Validate before consuming anything
        if src[0] != MAGIC {
            return Err(ProtocolError::InvalidMagic(src[0]));
        }
        let kind = FrameKind::from_u8(src[1]).ok_or(ProtocolError::UnknownFrameKind(src[1]))?;

        src.advance(2);
        let flags = src.get_u16();
        let payload_length = src.get_u32();

        Ok(Some(Self {
            kind,
            flags,
            payload_length,
        }))
    }
}
