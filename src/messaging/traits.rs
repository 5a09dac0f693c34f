//! # Messaging Service Traits
//!
//! The queue collaborator seen by the splitter and the workers. Delivery is
//! at-least-once with no ordering guarantee: a message that is received but
//! never acked becomes visible again once its visibility timeout lapses.

use std::time::Duration;

use async_trait::async_trait;

use super::errors::MessagingError;
use super::types::{MessageId, QueueStats, QueuedMessage, ReceiptHandle};

#[async_trait]
pub trait MessagingService: Send + Sync + 'static {
    /// Create a queue if it doesn't exist. Safe to call repeatedly.
    async fn ensure_queue(&self, queue_name: &str) -> Result<(), MessagingError>;

    async fn send_message<T: QueueMessage>(
        &self,
        queue_name: &str,
        message: &T,
    ) -> Result<MessageId, MessagingError>;

    /// Send several messages in order.
    ///
    /// The default sends one at a time and stops at the first failure.
    async fn send_batch<T: QueueMessage>(
        &self,
        queue_name: &str,
        messages: &[T],
    ) -> Result<Vec<MessageId>, MessagingError> {
        let mut ids = Vec::with_capacity(messages.len());
        for message in messages {
            ids.push(self.send_message(queue_name, message).await?);
        }
        Ok(ids)
    }

    /// Receive up to `max_messages`, hiding them from other consumers for
    /// `visibility_timeout`.
    async fn receive_messages<T: QueueMessage>(
        &self,
        queue_name: &str,
        max_messages: usize,
        visibility_timeout: Duration,
    ) -> Result<Vec<QueuedMessage<T>>, MessagingError>;

    /// Remove a processed message.
    async fn ack_message(
        &self,
        queue_name: &str,
        receipt_handle: &ReceiptHandle,
    ) -> Result<(), MessagingError>;

    /// Give a message back. With `requeue` it becomes visible immediately,
    /// otherwise it is dropped.
    async fn nack_message(
        &self,
        queue_name: &str,
        receipt_handle: &ReceiptHandle,
        requeue: bool,
    ) -> Result<(), MessagingError>;

    async fn queue_stats(&self, queue_name: &str) -> Result<QueueStats, MessagingError>;

    fn provider_name(&self) -> &'static str;
}

/// Serialization contract for anything sent through a queue.
pub trait QueueMessage: Send + Sync + Clone + 'static {
    fn to_bytes(&self) -> Result<Vec<u8>, MessagingError>;

    fn from_bytes(bytes: &[u8]) -> Result<Self, MessagingError>
    where
        Self: Sized;
}

/// JSON for every serde type.
impl<T> QueueMessage for T
where
    T: serde::Serialize + serde::de::DeserializeOwned + Send + Sync + Clone + 'static,
{
    fn to_bytes(&self) -> Result<Vec<u8>, MessagingError> {
        serde_json::to_vec(self).map_err(|e| MessagingError::message_serialization(e.to_string()))
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self, MessagingError> {
        serde_json::from_slice(bytes)
            .map_err(|e| MessagingError::message_deserialization(e.to_string()))
    }
}
