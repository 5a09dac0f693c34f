//! # Messaging Types
//!
//! Provider-neutral wrappers for message ids, receipt handles and received
//! messages.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier assigned by the provider when a message is sent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub String);

impl MessageId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<u64> for MessageId {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

/// Handle used to ack or nack a received message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReceiptHandle(pub String);

impl ReceiptHandle {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ReceiptHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<u64> for ReceiptHandle {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

/// A message handed to a consumer, invisible to others until acked,
/// nacked or its visibility timeout lapses.
#[derive(Debug, Clone)]
pub struct QueuedMessage<T> {
    pub message: T,
    pub receipt_handle: ReceiptHandle,
    /// Number of times this message has been delivered, including this one.
    pub receive_count: u32,
    pub enqueued_at: DateTime<Utc>,
}

impl<T> QueuedMessage<T> {
    pub fn is_redelivery(&self) -> bool {
        self.receive_count > 1
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub queue_name: String,
    /// Messages stored, visible or in flight.
    pub message_count: u64,
    pub in_flight_count: u64,
    pub total_sent: u64,
    pub total_acked: u64,
    /// Undecodable messages removed on receive.
    pub dead_lettered: u64,
}
