//! # In-Memory Messaging Service
//!
//! Process-local queue used by tests and the local pipeline driver. It keeps
//! the same at-least-once semantics as a managed queue: received messages are
//! hidden for their visibility timeout and reappear if never acked.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, error};

use super::errors::MessagingError;
use super::traits::{MessagingService, QueueMessage};
use super::types::{MessageId, QueueStats, QueuedMessage, ReceiptHandle};

#[derive(Debug)]
struct StoredMessage {
    id: u64,
    payload: Vec<u8>,
    enqueued_at: DateTime<Utc>,
    /// `None` means visible now.
    hidden_until: Option<Instant>,
    /// Receipt issued by the latest receive; only it may ack or nack.
    receipt: Option<u64>,
    receive_count: u32,
}

impl StoredMessage {
    fn is_visible(&self, now: Instant) -> bool {
        self.hidden_until.map_or(true, |until| until <= now)
    }
}

#[derive(Debug, Default)]
struct QueueState {
    messages: VecDeque<StoredMessage>,
    next_id: u64,
    next_receipt: u64,
    total_sent: u64,
    total_acked: u64,
    dead_lettered: u64,
}

impl QueueState {
    fn push(&mut self, payload: Vec<u8>) -> MessageId {
        self.next_id += 1;
        self.total_sent += 1;
        self.messages.push_back(StoredMessage {
            id: self.next_id,
            payload,
            enqueued_at: Utc::now(),
            hidden_until: None,
            receipt: None,
            receive_count: 0,
        });
        MessageId::from(self.next_id)
    }

    fn position(&self, handle: &ReceiptHandle) -> Result<usize, MessagingError> {
        let receipt: u64 = handle
            .as_str()
            .parse()
            .map_err(|_| MessagingError::invalid_receipt_handle(handle.as_str()))?;
        self.messages
            .iter()
            .position(|m| m.receipt == Some(receipt))
            .ok_or_else(|| MessagingError::message_not_found(handle.as_str()))
    }
}

#[derive(Debug, Default)]
pub struct InMemoryMessagingService {
    queues: Mutex<HashMap<String, QueueState>>,
}

impl InMemoryMessagingService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages stored in a queue, visible or in flight.
    pub async fn queue_length(&self, queue_name: &str) -> usize {
        self.queues
            .lock()
            .await
            .get(queue_name)
            .map_or(0, |q| q.messages.len())
    }
}

#[async_trait]
impl MessagingService for InMemoryMessagingService {
    async fn ensure_queue(&self, queue_name: &str) -> Result<(), MessagingError> {
        self.queues
            .lock()
            .await
            .entry(queue_name.to_string())
            .or_default();
        Ok(())
    }

    async fn send_message<T: QueueMessage>(
        &self,
        queue_name: &str,
        message: &T,
    ) -> Result<MessageId, MessagingError> {
        let payload = message.to_bytes()?;
        let mut queues = self.queues.lock().await;
        let queue = queues
            .get_mut(queue_name)
            .ok_or_else(|| MessagingError::queue_not_found(queue_name))?;
        let id = queue.push(payload);
        debug!(queue = %queue_name, message_id = %id, "📤 Message enqueued");
        Ok(id)
    }

    async fn send_batch<T: QueueMessage>(
        &self,
        queue_name: &str,
        messages: &[T],
    ) -> Result<Vec<MessageId>, MessagingError> {
        // Serialize everything before touching the queue so a bad payload
        // leaves nothing half-sent.
        let payloads = messages
            .iter()
            .map(|message| message.to_bytes())
            .collect::<Result<Vec<_>, _>>()?;

        let mut queues = self.queues.lock().await;
        let queue = queues
            .get_mut(queue_name)
            .ok_or_else(|| MessagingError::queue_not_found(queue_name))?;
        Ok(payloads.into_iter().map(|p| queue.push(p)).collect())
    }

    async fn receive_messages<T: QueueMessage>(
        &self,
        queue_name: &str,
        max_messages: usize,
        visibility_timeout: Duration,
    ) -> Result<Vec<QueuedMessage<T>>, MessagingError> {
        let mut queues = self.queues.lock().await;
        let queue = queues
            .get_mut(queue_name)
            .ok_or_else(|| MessagingError::queue_not_found(queue_name))?;

        let now = Instant::now();
        let mut received = Vec::new();
        let mut poisoned = Vec::new();
        for stored in queue.messages.iter_mut() {
            if received.len() >= max_messages {
                break;
            }
            if !stored.is_visible(now) {
                continue;
            }
            let message = match T::from_bytes(&stored.payload) {
                Ok(message) => message,
                Err(err) if err.is_poison() => {
                    error!(queue = %queue_name, message_id = stored.id, error = %err, "☠️ Dropping undecodable message");
                    poisoned.push(stored.id);
                    continue;
                }
                Err(err) => return Err(err),
            };
            queue.next_receipt += 1;
            stored.hidden_until = Some(now + visibility_timeout);
            stored.receipt = Some(queue.next_receipt);
            stored.receive_count += 1;
            received.push(QueuedMessage {
                message,
                receipt_handle: ReceiptHandle::from(queue.next_receipt),
                receive_count: stored.receive_count,
                enqueued_at: stored.enqueued_at,
            });
        }
        if !poisoned.is_empty() {
            queue.messages.retain(|m| !poisoned.contains(&m.id));
            queue.dead_lettered += poisoned.len() as u64;
        }
        Ok(received)
    }

    async fn ack_message(
        &self,
        queue_name: &str,
        receipt_handle: &ReceiptHandle,
    ) -> Result<(), MessagingError> {
        let mut queues = self.queues.lock().await;
        let queue = queues
            .get_mut(queue_name)
            .ok_or_else(|| MessagingError::queue_not_found(queue_name))?;
        let position = queue.position(receipt_handle)?;
        queue.messages.remove(position);
        queue.total_acked += 1;
        Ok(())
    }

    async fn nack_message(
        &self,
        queue_name: &str,
        receipt_handle: &ReceiptHandle,
        requeue: bool,
    ) -> Result<(), MessagingError> {
        let mut queues = self.queues.lock().await;
        let queue = queues
            .get_mut(queue_name)
            .ok_or_else(|| MessagingError::queue_not_found(queue_name))?;
        let position = queue.position(receipt_handle)?;
        if requeue {
            let stored = &mut queue.messages[position];
            stored.hidden_until = None;
            stored.receipt = None;
        } else {
            queue.messages.remove(position);
        }
        Ok(())
    }

    async fn queue_stats(&self, queue_name: &str) -> Result<QueueStats, MessagingError> {
        let queues = self.queues.lock().await;
        let queue = queues
            .get(queue_name)
            .ok_or_else(|| MessagingError::queue_not_found(queue_name))?;
        let now = Instant::now();
        Ok(QueueStats {
            queue_name: queue_name.to_string(),
            message_count: queue.messages.len() as u64,
            in_flight_count: queue.messages.iter().filter(|m| !m.is_visible(now)).count() as u64,
            total_sent: queue.total_sent,
            total_acked: queue.total_acked,
            dead_lettered: queue.dead_lettered,
        })
    }

    fn provider_name(&self) -> &'static str {
        "in_memory"
    }
}
