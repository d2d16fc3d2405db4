//! bw-protocol: Message envelope and wire codecs for brokerwire
//!
//! This crate defines the [`Message`] exchanged with a broker and the
//! codecs that frame it over a byte stream. Two codecs share the
//! [`MessageCodec`] contract: a compact length-prefixed binary form and an
//! HTTP-style text form.

pub mod codec;
pub mod correlation;
pub mod error;
pub mod frame;
pub mod headers;
pub mod message;
pub mod text;

pub use codec::{BinaryCodec, MessageCodec};
pub use correlation::CorrelationId;
pub use error::ProtocolError;
pub use frame::{FrameHeader, FrameKind, HEADER_SIZE, MAX_PAYLOAD_SIZE};
pub use headers::{header, Headers};
pub use message::{Command, Message, Status};
pub use text::TextCodec;
