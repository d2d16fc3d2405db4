//! The broker client
//!
//! [`Client`] multiplexes any number of concurrent invocations over a single
//! connection. Each request carries a correlation id; the receive loop
//! matches responses back to their callers through the
//! [`InvocationTable`](crate::InvocationTable), so responses may arrive in
//! any order.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use bw_client::{Client, ClientConfig, Message};
//!
//! # async fn run() -> Result<(), bw_client::ClientError> {
//! let client = Client::new(ClientConfig::new("127.0.0.1:15555"))?;
//! client.connect().await?;
//!
//! let response = client
//!     .invoke(Message::new("echo").with_body("hello"), Duration::from_secs(3))
//!     .await?;
//! assert_eq!(response.body_text(), "hello");
//!
//! client.close().await;
//! # Ok(())
//! # }
//! ```

mod inner;
mod reconnect;
mod tasks;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use bw_core::{ClientConfig, ConnectionState};
use bw_protocol::text::MAX_HEAD_SIZE;
use bw_protocol::{BinaryCodec, CorrelationId, Message, MessageCodec, TextCodec};

use crate::connection::FrameWriter;
use crate::error::ClientError;
use crate::events::ClientEvent;
use crate::handler::MessageHandler;
use inner::ClientInner;

/// Client for a message broker
///
/// Cheap to clone; clones share the connection. Background tasks stop when
/// the last clone is dropped or [`Client::close`] is called.
pub struct Client<C: MessageCodec = BinaryCodec> {
    inner: Arc<ClientInner<C>>,
}

impl<C: MessageCodec> Clone for Client<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Client<BinaryCodec> {
    /// Create a client using the binary codec
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        ClientBuilder::new(config).build()
    }

    /// Start building a client
    pub fn builder(config: ClientConfig) -> ClientBuilder<BinaryCodec> {
        ClientBuilder::new(config)
    }
}

impl<C: MessageCodec> Client<C> {
    /// Connect to the configured broker
    ///
    /// Returns immediately if already connected. Waits for an in-progress
    /// connection attempt instead of racing it.
    pub async fn connect(&self) -> Result<(), ClientError> {
        let _guard = self.inner.connect_lock.lock().await;
        if self.inner.state().is_connected() {
            return Ok(());
        }
        self.inner.revive();
        self.inner.establish().await
    }

    /// Drop the current connection, if any, and connect again
    ///
    /// Pending invocations on the old connection fail with
    /// [`ClientError::ConnectionLost`].
    pub async fn reconnect(&self) -> Result<(), ClientError> {
        let _guard = self.inner.connect_lock.lock().await;
        self.inner.revive();
        self.inner.drop_connection("reconnect requested").await;
        self.inner.establish().await
    }

    /// Close the connection
    ///
    /// Pending invocations fail with [`ClientError::ConnectionLost`] and any
    /// automatic reconnect stops. The client can be connected again later.
    pub async fn close(&self) {
        self.inner.close().await;
    }

    /// Send `message` and wait up to `timeout` for its response
    ///
    /// A correlation id is generated if the message has none. A response
    /// with a non-2xx status fails with [`ClientError::Invocation`]. The
    /// timeout covers the write as well as the wait for the response.
    pub async fn invoke(
        &self,
        message: Message,
        timeout: Duration,
    ) -> Result<Message, ClientError> {
        self.invoke_with_cancel(message, timeout, &CancellationToken::new())
            .await
    }

    /// [`invoke`](Self::invoke) with the configured default timeout
    pub async fn call(&self, message: Message) -> Result<Message, ClientError> {
        self.invoke(message, self.inner.config.invoke_timeout).await
    }

    /// [`invoke`](Self::invoke) that also gives up when `cancel` fires
    ///
    /// Cancelling affects only this invocation.
    pub async fn invoke_with_cancel(
        &self,
        mut message: Message,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Message, ClientError> {
        let deadline = Instant::now() + timeout;
        message.validate()?;
        let (writer, generation) = self.inner.writer()?;
        let id = stamp_correlation_id(&mut message);
        let pending = self.inner.table.register(id.clone())?;

        tracing::debug!(correlation_id = %id, command = %message.command(), "Sending invocation");
        let written = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ClientError::Cancelled),
            result = write_before(&writer, message, deadline, timeout) => result,
        };
        if let Err(e) = written {
            drop(pending);
            return Err(self.write_failed(generation, e).await);
        }

        let response = pending.wait_until(deadline, timeout, cancel).await?;
        match response.status() {
            Some(status) if !status.is_success() => Err(ClientError::Invocation {
                status,
                message: response.body_text(),
            }),
            _ => Ok(response),
        }
    }

    /// Send `message` without waiting for a response
    ///
    /// A correlation id is generated if the message has none and returned.
    /// Any response the broker sends for it is dropped. The write fails with
    /// [`ClientError::Timeout`] if it takes longer than the configured
    /// invoke timeout.
    pub async fn send(&self, mut message: Message) -> Result<CorrelationId, ClientError> {
        let limit = self.inner.config.invoke_timeout;
        let deadline = Instant::now() + limit;
        message.validate()?;
        let (writer, generation) = self.inner.writer()?;
        let id = stamp_correlation_id(&mut message);

        tracing::debug!(correlation_id = %id, command = %message.command(), "Sending message");
        match write_before(&writer, message, deadline, limit).await {
            Ok(()) => Ok(id),
            Err(e) => Err(self.write_failed(generation, e).await),
        }
    }

    /// Send one heartbeat now
    ///
    /// Any failure, including a write that takes longer than the heartbeat
    /// interval, is treated as a lost connection.
    pub async fn heartbeat(&self) -> Result<(), ClientError> {
        let (writer, generation) = self.inner.writer()?;
        match tasks::send_heartbeat(&writer, self.inner.config.heartbeat_interval).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.inner
                    .handle_disconnect(generation, format!("heartbeat failed: {}", e))
                    .await;
                Err(e)
            }
        }
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        self.inner.state()
    }

    /// Wait until the client reaches `state`
    pub async fn wait_for_state(&self, state: ConnectionState) -> Result<(), ClientError> {
        let mut rx = self.inner.subscribe_state();
        rx.wait_for(|current| *current == state)
            .await
            .map(|_| ())
            .map_err(|_| ClientError::Closed)
    }

    /// Subscribe to lifecycle events
    pub fn events(&self) -> broadcast::Receiver<ClientEvent> {
        self.inner.subscribe_events()
    }

    /// Number of invocations waiting for a response
    pub fn pending_invocations(&self) -> usize {
        self.inner.table.len()
    }

    /// Client configuration
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Name of the codec in use
    pub fn codec_name(&self) -> &'static str {
        self.inner.codec_name()
    }

    async fn write_failed(&self, generation: u64, error: ClientError) -> ClientError {
        if error.is_connection_scoped() {
            self.inner
                .handle_disconnect(generation, error.to_string())
                .await;
        }
        error
    }
}

/// Write one frame, failing with [`ClientError::Timeout`] at `deadline`
///
/// A write cut short leaves any partially flushed bytes buffered in the
/// writer, so the stream stays frame-aligned for the next writer.
async fn write_before<C: MessageCodec>(
    writer: &FrameWriter<C>,
    message: Message,
    deadline: Instant,
    budget: Duration,
) -> Result<(), ClientError> {
    tokio::time::timeout_at(deadline, writer.write_frame(message))
        .await
        .unwrap_or(Err(ClientError::Timeout(budget)))
}

fn stamp_correlation_id(message: &mut Message) -> CorrelationId {
    match message.correlation_id() {
        Some(id) => id,
        None => {
            let id = CorrelationId::generate();
            message.set_correlation_id(id.clone());
            id
        }
    }
}

/// Builder for [`Client`]
pub struct ClientBuilder<C: MessageCodec = BinaryCodec> {
    config: ClientConfig,
    codec: C,
    handler: Option<Arc<dyn MessageHandler>>,
}

impl ClientBuilder<BinaryCodec> {
    /// Start from `config` with the binary codec
    pub fn new(config: ClientConfig) -> Self {
        let codec = BinaryCodec::with_max_payload(config.max_frame_size);
        Self {
            config,
            codec,
            handler: None,
        }
    }
}

impl<C: MessageCodec> ClientBuilder<C> {
    /// Use a different codec
    pub fn codec<D: MessageCodec>(self, codec: D) -> ClientBuilder<D> {
        ClientBuilder {
            config: self.config,
            codec,
            handler: self.handler,
        }
    }

    /// Use the text codec, with bodies bounded by `max_frame_size`
    pub fn text_codec(self) -> ClientBuilder<TextCodec> {
        let max_body = self.config.max_frame_size;
        self.codec(TextCodec::with_limits(MAX_HEAD_SIZE, max_body))
    }

    /// Deliver unsolicited broker messages to `handler`
    pub fn handler(mut self, handler: impl MessageHandler + 'static) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    /// Validate the configuration and create the client
    pub fn build(self) -> Result<Client<C>, ClientError> {
        self.config.validate()?;
        Ok(Client {
            inner: Arc::new(ClientInner::new(self.config, self.codec, self.handler)),
        })
    }
}
