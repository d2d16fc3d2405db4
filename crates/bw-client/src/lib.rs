//! bw-client: Multiplexed client transport for brokerwire
//!
//! This crate connects to a broker over TCP, sends requests over a single
//! connection and correlates responses back to their callers. It keeps the
//! connection alive with heartbeats and reconnects after failures.

pub mod backoff;
pub mod client;
pub mod connection;
pub mod error;
pub mod events;
pub mod handler;
pub mod invocation;

pub use client::{Client, ClientBuilder};
pub use connection::{Connection, FrameReader, FrameWriter};
pub use error::{ClientError, ConnectionError};
pub use events::ClientEvent;
pub use handler::{FnHandler, MessageHandler};
pub use invocation::{InvocationTable, PendingInvocation};

pub use bw_core::{BackoffConfig, BackoffPolicy, ClientConfig, ConnectionState};
pub use bw_protocol::{
    header, BinaryCodec, Command, CorrelationId, Message, MessageCodec, Status, TextCodec,
};
