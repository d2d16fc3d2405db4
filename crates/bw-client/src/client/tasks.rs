//! Per-connection background tasks
//!
//! Every connection runs one receive loop and one heartbeat loop. Both stop
//! when the connection's token is cancelled and both report failures through
//! [`ClientInner::handle_disconnect`].

use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use bw_core::time::{current_time_millis, elapsed_millis};
use bw_protocol::{header, Message, MessageCodec};

use super::inner::ClientInner;
use crate::connection::{FrameReader, FrameWriter};
use crate::error::ClientError;
use crate::handler::MessageHandler;
use crate::invocation::InvocationTable;

/// Read frames until the connection fails or is cancelled
pub(crate) async fn receive_loop<C: MessageCodec>(
    inner: Weak<ClientInner<C>>,
    mut reader: FrameReader<C>,
    table: InvocationTable,
    handler: Option<Arc<dyn MessageHandler>>,
    cancel: CancellationToken,
    generation: u64,
) {
    let reason = loop {
        let result = tokio::select! {
            _ = cancel.cancelled() => {
                tracing::trace!(generation, "Receive loop cancelled");
                return;
            }
            result = reader.read_frame() => result,
        };

        match result {
            Ok(message) => dispatch(&table, handler.as_deref(), message).await,
            Err(e) => break e.to_string(),
        }
    };

    tracing::debug!(generation, reason = %reason, "Receive loop ended");
    if let Some(inner) = inner.upgrade() {
        inner.handle_disconnect(generation, reason).await;
    }
}

/// Route one inbound message
async fn dispatch(
    table: &InvocationTable,
    handler: Option<&dyn MessageHandler>,
    message: Message,
) {
    if let Some(id) = message.correlation_id() {
        tracing::trace!(correlation_id = %id, status = ?message.status(), "Received response");
        table.resolve(&id, message);
        return;
    }

    if message.is_heartbeat() {
        match message
            .header(header::TIMESTAMP)
            .and_then(|ts| ts.parse::<u64>().ok())
        {
            Some(sent) => tracing::trace!(age_ms = elapsed_millis(sent), "Received heartbeat"),
            None => tracing::trace!("Received heartbeat"),
        }
        return;
    }

    match handler {
        Some(handler) => handler.on_message(message).await,
        None => tracing::warn!(
            command = %message.command(),
            "Dropping unsolicited message, no handler registered"
        ),
    }
}

/// Send a heartbeat every `interval` until cancelled
///
/// The first heartbeat goes out one interval after the connection opens.
pub(crate) async fn heartbeat_loop<C: MessageCodec>(
    inner: Weak<ClientInner<C>>,
    writer: FrameWriter<C>,
    interval: Duration,
    cancel: CancellationToken,
    generation: u64,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::trace!(generation, "Heartbeat loop cancelled");
                return;
            }
            _ = ticker.tick() => {}
        }

        if let Err(e) = send_heartbeat(&writer, interval).await {
            if let Some(inner) = inner.upgrade() {
                inner
                    .handle_disconnect(generation, format!("heartbeat failed: {}", e))
                    .await;
            }
            return;
        }
    }
}

/// Write one heartbeat; a write still pending after `limit` is a failure
pub(crate) async fn send_heartbeat<C: MessageCodec>(
    writer: &FrameWriter<C>,
    limit: Duration,
) -> Result<(), ClientError> {
    tokio::time::timeout(limit, writer.write_frame(Message::heartbeat(current_time_millis())))
        .await
        .map_err(|_| ClientError::Timeout(limit))??;
    tracing::trace!("Sent heartbeat");
    Ok(())
}
