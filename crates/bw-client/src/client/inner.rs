//! Shared client state and connection lifecycle

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::{BoxFuture, FutureExt};
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;

use bw_core::{ClientConfig, ConnectionState};
use bw_protocol::MessageCodec;

use super::{reconnect, tasks};
use crate::connection::{Connection, FrameWriter};
use crate::error::ClientError;
use crate::events::{ClientEvent, EVENT_CHANNEL_CAPACITY};
use crate::handler::MessageHandler;
use crate::invocation::InvocationTable;

/// Reason reported to pending invocations on an explicit close
pub(crate) const CLOSED_REASON: &str = "client closed";

/// The live connection and the token that stops its tasks
pub(crate) struct Link<C: MessageCodec> {
    writer: FrameWriter<C>,
    cancel: CancellationToken,
    generation: u64,
}

pub(crate) struct ClientInner<C: MessageCodec> {
    pub(crate) config: ClientConfig,
    /// Prototype codec; each connection gets a fresh copy
    codec: C,
    state: watch::Sender<ConnectionState>,
    link: Mutex<Option<Link<C>>>,
    pub(crate) table: InvocationTable,
    handler: Option<Arc<dyn MessageHandler>>,
    events: broadcast::Sender<ClientEvent>,
    /// Serializes connection attempts
    pub(crate) connect_lock: tokio::sync::Mutex<()>,
    /// Set while an automatic reconnect loop runs
    pub(crate) reconnecting: Arc<AtomicBool>,
    /// Cancelled by `close`; parent of every per-connection token
    lifecycle: Mutex<CancellationToken>,
    generation: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<C: MessageCodec> ClientInner<C> {
    pub(crate) fn new(
        config: ClientConfig,
        codec: C,
        handler: Option<Arc<dyn MessageHandler>>,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Self {
            config,
            codec,
            state,
            link: Mutex::new(None),
            table: InvocationTable::new(),
            handler,
            events,
            connect_lock: tokio::sync::Mutex::new(()),
            reconnecting: Arc::new(AtomicBool::new(false)),
            lifecycle: Mutex::new(CancellationToken::new()),
            generation: AtomicU64::new(0),
        }
    }

    pub(crate) fn codec_name(&self) -> &'static str {
        self.codec.name()
    }

    pub(crate) fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub(crate) fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub(crate) fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    pub(crate) fn emit(&self, event: ClientEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn set_state(&self, next: ConnectionState) {
        let prev = self.state.send_replace(next);
        if prev == next {
            return;
        }
        if prev.can_transition_to(next) {
            tracing::trace!(from = %prev, to = %next, "State transition");
        } else {
            tracing::debug!(from = %prev, to = %next, "Unexpected state transition");
        }
    }

    pub(crate) fn lifecycle(&self) -> CancellationToken {
        lock(&self.lifecycle).clone()
    }

    /// Make the client usable again after `close`
    pub(crate) fn revive(&self) {
        let mut token = lock(&self.lifecycle);
        if token.is_cancelled() {
            *token = CancellationToken::new();
        }
    }

    /// Writer of the live connection and its generation
    pub(crate) fn writer(&self) -> Result<(FrameWriter<C>, u64), ClientError> {
        let link = lock(&self.link);
        match link.as_ref() {
            Some(link) => Ok((link.writer.clone(), link.generation)),
            None => Err(ClientError::NotConnected {
                state: self.state(),
            }),
        }
    }

    /// Open a connection and start its receive and heartbeat tasks
    ///
    /// Callers hold `connect_lock`.
    pub(crate) fn establish(self: &Arc<Self>) -> BoxFuture<'static, Result<(), ClientError>> {
        let this = Arc::clone(self);
        async move {
            let lifecycle = this.lifecycle();
            if lifecycle.is_cancelled() {
                return Err(ClientError::Closed);
            }

            let address = this.config.address.clone();
            this.set_state(ConnectionState::Connecting);
            tracing::debug!(address = %address, codec = this.codec.name(), "Connecting to broker");

            let attempt =
                Connection::connect(&address, this.codec.fresh(), this.config.connect_timeout);
            let connection = tokio::select! {
                _ = lifecycle.cancelled() => {
                    this.set_state(ConnectionState::Disconnected);
                    return Err(ClientError::Closed);
                }
                result = attempt => result,
            };
            let connection = match connection {
                Ok(connection) => connection,
                Err(e) => {
                    this.set_state(ConnectionState::Disconnected);
                    return Err(e.into());
                }
            };

            let peer = connection.peer_addr();
            let (reader, writer) = connection.split();
            let generation = this.generation.fetch_add(1, Ordering::Relaxed) + 1;
            let cancel = lifecycle.child_token();

            let installed = {
                let mut link = lock(&this.link);
                if lifecycle.is_cancelled() {
                    false
                } else {
                    let previous = link.replace(Link {
                        writer: writer.clone(),
                        cancel: cancel.clone(),
                        generation,
                    });
                    if let Some(previous) = previous {
                        previous.cancel.cancel();
                    }
                    this.set_state(ConnectionState::Connected);
                    true
                }
            };
            if !installed {
                writer.close().await;
                this.set_state(ConnectionState::Disconnected);
                return Err(ClientError::Closed);
            }

            let weak = Arc::downgrade(&this);
            tokio::spawn(tasks::receive_loop(
                weak.clone(),
                reader,
                this.table.clone(),
                this.handler.clone(),
                cancel.clone(),
                generation,
            ));
            tokio::spawn(tasks::heartbeat_loop(
                weak,
                writer,
                this.config.heartbeat_interval,
                cancel,
                generation,
            ));

            tracing::info!(address = %address, peer = %peer, generation, "Connected to broker");
            this.emit(ClientEvent::Connected { address });
            Ok(())
        }
        .boxed()
    }

    /// React to a failure on connection `generation`
    ///
    /// Stale generations are ignored, so the receive loop, the heartbeat and
    /// a failed write can all report the same failure safely.
    pub(crate) async fn handle_disconnect(self: &Arc<Self>, generation: u64, reason: String) {
        let Some(link) = self.take_link(Some(generation), ConnectionState::Disconnected) else {
            return;
        };

        tracing::warn!(reason = %reason, generation, "Connection lost");
        self.teardown(link, &reason).await;

        if self.config.auto_reconnect && !self.lifecycle().is_cancelled() {
            reconnect::spawn(self);
        }
    }

    /// Drop the live connection without scheduling a reconnect
    pub(crate) async fn drop_connection(&self, reason: &str) -> bool {
        match self.take_link(None, ConnectionState::Disconnected) {
            Some(link) => {
                tracing::info!(reason, "Dropping connection");
                self.teardown(link, reason).await;
                true
            }
            None => false,
        }
    }

    /// Close the connection and stop any reconnect in progress
    pub(crate) async fn close(&self) {
        self.lifecycle().cancel();

        match self.take_link(None, ConnectionState::Closing) {
            Some(link) => {
                self.teardown(link, CLOSED_REASON).await;
                tracing::info!("Client closed");
            }
            None => {
                self.table.abandon_all(CLOSED_REASON);
            }
        }
        self.set_state(ConnectionState::Disconnected);
    }

    fn take_link(&self, generation: Option<u64>, next: ConnectionState) -> Option<Link<C>> {
        let mut guard = lock(&self.link);
        let matches = match (guard.as_ref(), generation) {
            (Some(link), Some(generation)) => link.generation == generation,
            (Some(_), None) => true,
            (None, _) => false,
        };
        if !matches {
            return None;
        }
        self.set_state(next);
        guard.take()
    }

    /// Stop the link's tasks, close the socket and fail what was pending
    async fn teardown(&self, link: Link<C>, reason: &str) {
        link.cancel.cancel();
        link.writer.close().await;

        let abandoned = self.table.abandon_all(reason);
        if abandoned > 0 {
            tracing::debug!(abandoned, reason, "Abandoned pending invocations");
        }
        self.emit(ClientEvent::Disconnected {
            reason: reason.to_string(),
        });
    }
}

impl<C: MessageCodec> Drop for ClientInner<C> {
    fn drop(&mut self) {
        lock(&self.lifecycle).cancel();
        if let Some(link) = lock(&self.link).take() {
            link.cancel.cancel();
        }
    }
}
