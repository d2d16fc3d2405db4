//! Delivery hook for unsolicited messages

use async_trait::async_trait;
use tokio::sync::mpsc;

use bw_protocol::Message;

/// Receives broker messages that carry no correlation id
///
/// Called from the receive loop, so a slow handler delays reading the next
/// frame. Hand work off to another task if it may block.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn on_message(&self, message: Message);
}

#[async_trait]
impl MessageHandler for mpsc::Sender<Message> {
    async fn on_message(&self, message: Message) {
        if self.send(message).await.is_err() {
            tracing::debug!("Message receiver dropped, discarding unsolicited message");
        }
    }
}

#[async_trait]
impl MessageHandler for mpsc::UnboundedSender<Message> {
    async fn on_message(&self, message: Message) {
        if self.send(message).is_err() {
            tracing::debug!("Message receiver dropped, discarding unsolicited message");
        }
    }
}

/// Adapter turning a closure into a [`MessageHandler`]
pub struct FnHandler<F>(pub F);

#[async_trait]
impl<F> MessageHandler for FnHandler<F>
where
    F: Fn(Message) + Send + Sync,
{
    async fn on_message(&self, message: Message) {
        (self.0)(message)
    }
}
