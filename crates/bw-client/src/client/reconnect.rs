//! Automatic reconnect after connection loss

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use bw_protocol::MessageCodec;

use super::inner::ClientInner;
use crate::backoff::Backoff;
use crate::error::ClientError;
use crate::events::ClientEvent;

/// Start the reconnect loop unless one is already running
pub(crate) fn spawn<C: MessageCodec>(inner: &Arc<ClientInner<C>>) {
    if inner.reconnecting.swap(true, Ordering::AcqRel) {
        tracing::debug!("Reconnect already in progress");
        return;
    }
    let flag = Arc::clone(&inner.reconnecting);
    let weak = Arc::downgrade(inner);

    tokio::spawn(async move {
        if run(weak, &flag).await {
            flag.store(false, Ordering::Release);
        }
    });
}

/// Retry with backoff until connected, closed, dropped or out of attempts
///
/// Holds only a weak reference while sleeping so an abandoned client can
/// be dropped mid-backoff. The reconnecting flag is released for the
/// duration of each attempt, so a connection that fails right after being
/// established can schedule a fresh loop. Returns whether this loop still
/// owns the flag.
async fn run<C: MessageCodec>(weak: Weak<ClientInner<C>>, flag: &AtomicBool) -> bool {
    let (mut backoff, max_attempts, lifecycle) = match weak.upgrade() {
        Some(inner) => (
            Backoff::from_config(&inner.config.reconnect_backoff),
            inner.config.reconnect_backoff.max_attempts,
            inner.lifecycle(),
        ),
        None => return true,
    };

    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        let delay = backoff.next_delay();

        match weak.upgrade() {
            Some(inner) => inner.emit(ClientEvent::Reconnecting { attempt, delay }),
            None => return true,
        }
        tracing::info!(attempt, delay = ?delay, "Reconnecting");

        tokio::select! {
            _ = lifecycle.cancelled() => {
                tracing::debug!("Reconnect cancelled");
                return true;
            }
            _ = tokio::time::sleep(delay) => {}
        }

        let Some(inner) = weak.upgrade() else {
            return true;
        };
        let result = {
            let _guard = inner.connect_lock.lock().await;
            if lifecycle.is_cancelled() {
                return true;
            }
            if inner.state().is_connected() {
                tracing::debug!("Connection re-established elsewhere");
                return true;
            }
            flag.store(false, Ordering::Release);
            inner.establish().await
        };

        match result {
            Ok(()) => {
                tracing::info!(attempt, "Reconnected");
                return false;
            }
            Err(ClientError::Closed) => return false,
            Err(e) => {
                tracing::warn!(attempt, error = %e, "Reconnect attempt failed");
                if flag.swap(true, Ordering::AcqRel) {
                    tracing::debug!("Another reconnect loop took over");
                    return false;
                }
                if max_attempts.is_some_and(|max| attempt >= max) {
                    tracing::error!(attempts = attempt, "Giving up on reconnect");
                    inner.emit(ClientEvent::ReconnectFailed { attempts: attempt });
                    return true;
                }
            }
        }
    }
}
