//! Codec contract and the compact binary codec

use bincode::Options;
use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use crate::error::ProtocolError;
use crate::frame::{FrameHeader, FrameKind, HEADER_SIZE, MAX_PAYLOAD_SIZE};
use crate::message::Message;

/// A pluggable message serializer framed over a byte stream
///
/// Each `decode` call consumes exactly one frame and leaves the buffer at the
/// next frame boundary. `decode(encode(m))` must equal `m` for every message
/// that passes [`Message::validate`].
pub trait MessageCodec:
    Decoder<Item = Message, Error = ProtocolError>
    + Encoder<Message, Error = ProtocolError>
    + Send
    + Sync
    + Unpin
    + 'static
{
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// A codec with the same settings and no partial decode state
    fn fresh(&self) -> Self
    where
        Self: Sized;
}

/// Codec for length-prefixed binary frames
///
/// Each frame is a [`FrameHeader`] followed by a bincode-serialized message.
#[derive(Debug)]
pub struct BinaryCodec {
    /// Current header being decoded (if any)
    pending_header: Option<FrameHeader>,
    /// Largest payload accepted in either direction
    max_payload: usize,
}

impl BinaryCodec {
    /// Create a new codec
    pub fn new() -> Self {
        Self::with_max_payload(MAX_PAYLOAD_SIZE)
    }

    /// Create a codec with a custom payload limit
    pub fn with_max_payload(max_payload: usize) -> Self {
        Self {
            pending_header: None,
            max_payload: max_payload.min(u32::MAX as usize),
        }
    }

    /// Largest payload accepted in either direction
    pub fn max_payload(&self) -> usize {
        self.max_payload
    }
}

impl Default for BinaryCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageCodec for BinaryCodec {
    fn name(&self) -> &'static str {
        "binary"
    }

    fn fresh(&self) -> Self {
        Self::with_max_payload(self.max_payload)
    }
}

/// Fixed-width integers, and a payload must be exactly one message
fn wire_options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .reject_trailing_bytes()
}

fn frame_kind_of(message: &Message) -> FrameKind {
    if message.is_response() {
        FrameKind::Response
    } else {
        FrameKind::Request
    }
}

impl Decoder for BinaryCodec {
    type Item = Message;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // Try to decode header if we don't have one
        let header = match self.pending_header.take() {
            Some(h) => h,
            None => match FrameHeader::decode(src)? {
                Some(h) => h,
                None => return Ok(None), // Need more data
            },
        };

        // Check payload length
        let payload_len = header.payload_length as usize;
        if payload_len > self.max_payload {
            return Err(ProtocolError::PayloadTooLarge {
                size: payload_len,
                max: self.max_payload,
            });
        }

        // Check if we have enough data for the payload
        if src.len() < payload_len {
            src.reserve(payload_len - src.len());
            self.pending_header = Some(header);
            return Ok(None);
        }

        let payload_bytes = src.split_to(payload_len).freeze();
        let message: Message = wire_options().deserialize(&payload_bytes)?;

        let payload_kind = frame_kind_of(&message);
        if payload_kind != header.kind {
            return Err(ProtocolError::FrameKindMismatch {
                header: header.kind.name(),
                payload: payload_kind.name(),
            });
        }

        Ok(Some(message))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(message) => Ok(Some(message)),
            None if src.is_empty() && self.pending_header.is_none() => Ok(None),
            None => {
                let pending = if self.pending_header.take().is_some() {
                    HEADER_SIZE
                } else {
                    0
                };
                let remaining = src.len() + pending;
                src.clear();
                Err(ProtocolError::IncompleteFrame { remaining })
            }
        }
    }
}

impl Encoder<Message> for BinaryCodec {
    type Error = ProtocolError;

    fn encode(&mut self, message: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        message.validate()?;

        let payload = wire_options().serialize(&message)?;
        let payload_len = payload.len();

        if payload_len > self.max_payload {
            return Err(ProtocolError::PayloadTooLarge {
                size: payload_len,
                max: self.max_payload,
            });
        }

        let header = FrameHeader::new(frame_kind_of(&message), payload_len as u32);
        dst.reserve(HEADER_SIZE + payload_len);
        header.encode(dst);
        dst.extend_from_slice(&payload);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correlation::CorrelationId;
    use crate::frame::MAGIC;
    use crate::message::Status;

    fn sample_request() -> Message {
        Message::new("produce")
            .with_correlation_id(CorrelationId::from("42"))
            .with_header("topic", "orders")
            .with_body(vec![0u8, 1, 2, 255])
    }

    #[test]
    fn test_codec_roundtrip() {
        let mut codec = BinaryCodec::new();
        let messages = [
            sample_request(),
            Message::response_to(&sample_request(), Status::OK).with_body("done"),
            Message::heartbeat(99),
            Message::new("empty"),
        ];

        for message in messages {
            let mut buf = BytesMut::new();
            codec.encode(message.clone(), &mut buf).unwrap();
            let decoded = codec.decode(&mut buf).unwrap().unwrap();
            assert_eq!(decoded, message);
            assert!(buf.is_empty());
        }
    }

    #[test]
    fn test_codec_stops_at_frame_boundary() {
        let mut codec = BinaryCodec::new();
        let first = sample_request();
        let second = Message::new("consume").with_header("topic", "orders");

        let mut buf = BytesMut::new();
        codec.encode(first.clone(), &mut buf).unwrap();
        codec.encode(second.clone(), &mut buf).unwrap();

        assert_eq!(codec.decode(&mut buf).unwrap(), Some(first));
        assert_eq!(buf[0], MAGIC);
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(second));
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
    }

    #[test]
    fn test_codec_partial_read() {
        let mut codec = BinaryCodec::new();

        let mut full_buf = BytesMut::new();
        codec.encode(sample_request(), &mut full_buf).unwrap();

        // Split the buffer to simulate partial reads
        let mut partial = full_buf.split_to(HEADER_SIZE - 1);
        assert!(codec.decode(&mut partial).unwrap().is_none());

        let rest = full_buf.split_off(3);
        partial.extend_from_slice(&full_buf);
        assert!(codec.decode(&mut partial).unwrap().is_none());

        partial.extend_from_slice(&rest);
        let decoded = codec.decode(&mut partial).unwrap().unwrap();
        assert_eq!(decoded, sample_request());
    }

    #[test]
    fn test_payload_too_large_on_decode() {
        let mut codec = BinaryCodec::with_max_payload(16);
        let mut buf = BytesMut::new();
        FrameHeader::new(FrameKind::Request, 1024).encode(&mut buf);

        assert!(matches!(
            codec.decode(&mut buf),
            Err(ProtocolError::PayloadTooLarge { size: 1024, max: 16 })
        ));
    }

    #[test]
    fn test_payload_too_large_on_encode() {
        let mut codec = BinaryCodec::with_max_payload(16);
        let mut buf = BytesMut::new();
        let message = Message::new("produce").with_body(vec![0u8; 64]);

        assert!(matches!(
            codec.encode(message, &mut buf),
            Err(ProtocolError::PayloadTooLarge { .. })
        ));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_kind_mismatch_is_rejected() {
        let mut codec = BinaryCodec::new();
        let payload = wire_options().serialize(&sample_request()).unwrap();

        let mut buf = BytesMut::new();
        FrameHeader::new(FrameKind::Response, payload.len() as u32).encode(&mut buf);
        buf.extend_from_slice(&payload);

        assert!(matches!(
            codec.decode(&mut buf),
            Err(ProtocolError::FrameKindMismatch { .. })
        ));
    }

    #[test]
    fn test_truncated_frame_at_eof() {
        let mut codec = BinaryCodec::new();
        let mut buf = BytesMut::new();
        codec.encode(sample_request(), &mut buf).unwrap();
        buf.truncate(buf.len() - 2);

        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert!(matches!(
            codec.decode_eof(&mut buf),
            Err(ProtocolError::IncompleteFrame { .. })
        ));
    }

    #[test]
    fn test_trailing_payload_bytes_are_rejected() {
        let mut codec = BinaryCodec::new();
        let mut payload = wire_options().serialize(&sample_request()).unwrap();
        payload.push(0x00);

        let mut buf = BytesMut::new();
        FrameHeader::new(FrameKind::Request, payload.len() as u32).encode(&mut buf);
        buf.extend_from_slice(&payload);

        assert!(matches!(
            codec.decode(&mut buf),
            Err(ProtocolError::Serialization(_))
        ));
    }

    #[test]
    fn test_garbage_payload_is_protocol_error() {
        let mut codec = BinaryCodec::new();
        let mut buf = BytesMut::new();
        FrameHeader::new(FrameKind::Request, 3).encode(&mut buf);
        buf.extend_from_slice(&[0xFF, 0xFF, 0xFF]);

        assert!(matches!(
            codec.decode(&mut buf),
            Err(ProtocolError::Serialization(_))
        ));
    }
}
