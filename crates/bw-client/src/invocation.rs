//! In-flight request tracking
//!
//! Each outstanding invocation owns a single-assignment result slot keyed by
//! its correlation id. Whoever removes the entry from the table first gets to
//! fulfil the slot; every later attempt is a no-op. Entries also carry a
//! registration token so a caller can only ever remove its own entry, even
//! after the id has been reused.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use bw_protocol::{CorrelationId, Message};

use crate::error::ClientError;

type ResultSlot = oneshot::Sender<Result<Message, ClientError>>;

struct PendingEntry {
    token: u64,
    slot: ResultSlot,
}

/// Map of correlation ids to waiting callers
#[derive(Clone, Default)]
pub struct InvocationTable {
    pending: Arc<DashMap<CorrelationId, PendingEntry>>,
    next_token: Arc<AtomicU64>,
}

impl InvocationTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new outstanding invocation
    ///
    /// Fails with [`ClientError::DuplicateCorrelation`] if `id` is already
    /// pending; the existing entry is left untouched.
    pub fn register(&self, id: CorrelationId) -> Result<PendingInvocation, ClientError> {
        match self.pending.entry(id.clone()) {
            Entry::Occupied(_) => {
                tracing::error!(correlation_id = %id, "Correlation id registered twice");
                Err(ClientError::DuplicateCorrelation(id))
            }
            Entry::Vacant(vacant) => {
                let (tx, rx) = oneshot::channel();
                let token = self.next_token.fetch_add(1, Ordering::Relaxed);
                vacant.insert(PendingEntry { token, slot: tx });
                Ok(PendingInvocation {
                    id,
                    token,
                    rx,
                    table: self.clone(),
                })
            }
        }
    }

    /// Deliver a response to the invocation waiting on `id`
    ///
    /// Returns false (and drops the message) when nothing is waiting, which
    /// happens for responses arriving after a timeout or cancel.
    pub fn resolve(&self, id: &CorrelationId, message: Message) -> bool {
        match self.pending.remove(id) {
            Some((_, entry)) => {
                if entry.slot.send(Ok(message)).is_err() {
                    tracing::trace!(correlation_id = %id, "Caller went away before response");
                }
                true
            }
            None => {
                tracing::warn!(
                    correlation_id = %id,
                    command = %message.command(),
                    "Dropping response with no pending invocation"
                );
                false
            }
        }
    }

    /// Fail the invocation waiting on `id`
    pub fn fail(&self, id: &CorrelationId, error: ClientError) -> bool {
        match self.pending.remove(id) {
            Some((_, entry)) => {
                let _ = entry.slot.send(Err(error));
                true
            }
            None => false,
        }
    }

    /// Fail the invocation waiting on `id` with [`ClientError::Cancelled`]
    pub fn cancel(&self, id: &CorrelationId) -> bool {
        self.fail(id, ClientError::Cancelled)
    }

    /// Fail every pending invocation with [`ClientError::ConnectionLost`]
    ///
    /// Returns the number of invocations abandoned.
    pub fn abandon_all(&self, reason: &str) -> usize {
        let ids: Vec<CorrelationId> = self.pending.iter().map(|e| e.key().clone()).collect();
        ids.iter()
            .filter(|id| self.fail(id, ClientError::lost(reason)))
            .count()
    }

    /// Whether `id` is outstanding
    pub fn contains(&self, id: &CorrelationId) -> bool {
        self.pending.contains_key(id)
    }

    /// Number of outstanding invocations
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Check if nothing is outstanding
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Remove `id` only if it is still the registration identified by `token`
    fn remove_own(&self, id: &CorrelationId, token: u64) -> bool {
        self.pending
            .remove_if(id, |_, entry| entry.token == token)
            .is_some()
    }
}

/// Caller's half of an outstanding invocation
///
/// Dropping it removes the table entry if the slot was never fulfilled.
pub struct PendingInvocation {
    id: CorrelationId,
    token: u64,
    rx: oneshot::Receiver<Result<Message, ClientError>>,
    table: InvocationTable,
}

impl PendingInvocation {
    /// Correlation id this invocation waits on
    pub fn id(&self) -> &CorrelationId {
        &self.id
    }

    /// Wait for the outcome, giving up after `timeout` or when `cancel` fires
    pub async fn wait(
        self,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Message, ClientError> {
        self.wait_until(Instant::now() + timeout, timeout, cancel)
            .await
    }

    /// Wait for the outcome until `deadline`
    ///
    /// `budget` is the caller's whole timeout, reported in
    /// [`ClientError::Timeout`] when the deadline passes.
    pub async fn wait_until(
        mut self,
        deadline: Instant,
        budget: Duration,
        cancel: &CancellationToken,
    ) -> Result<Message, ClientError> {
        let abandoned = tokio::select! {
            biased;
            result = &mut self.rx => {
                return result.unwrap_or_else(|_| Err(ClientError::lost("invocation table dropped")));
            }
            _ = cancel.cancelled() => ClientError::Cancelled,
            _ = tokio::time::sleep_until(deadline) => ClientError::Timeout(budget),
        };
        self.settle(abandoned)
    }

    /// Resolve a race between a local give-up and a concurrent fulfilment
    fn settle(&mut self, error: ClientError) -> Result<Message, ClientError> {
        if self.table.remove_own(&self.id, self.token) {
            tracing::debug!(correlation_id = %self.id, error = %error, "Invocation abandoned");
            return Err(error);
        }
        // Someone else already took the entry; prefer their outcome if sent
        self.rx.try_recv().unwrap_or(Err(error))
    }
}

impl Drop for PendingInvocation {
    fn drop(&mut self) {
        if self.table.remove_own(&self.id, self.token) {
            tracing::trace!(correlation_id = %self.id, "Dropped pending invocation");
        }
    }
}

impl std::fmt::Debug for PendingInvocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingInvocation")
            .field("id", &self.id)
            .finish()
    }
}
