//! # Messaging Error Types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum MessagingError {
    #[error("Queue not found: {queue_name}")]
    QueueNotFound { queue_name: String },

    /// The receipt was valid once but its message has since been acked or
    /// redelivered under a new receipt.
    #[error("No in-flight message for receipt {receipt}")]
    MessageNotFound { receipt: String },

    #[error("Invalid receipt handle: {handle}")]
    InvalidReceiptHandle { handle: String },

    #[error("Message serialization error: {message}")]
    MessageSerialization { message: String },

    #[error("Message deserialization error: {message}")]
    MessageDeserialization { message: String },
}

impl MessagingError {
    pub fn queue_not_found(queue_name: impl Into<String>) -> Self {
        Self::QueueNotFound {
            queue_name: queue_name.into(),
        }
    }

    pub fn message_not_found(receipt: impl Into<String>) -> Self {
        Self::MessageNotFound {
            receipt: receipt.into(),
        }
    }

    pub fn invalid_receipt_handle(handle: impl Into<String>) -> Self {
        Self::InvalidReceiptHandle {
            handle: handle.into(),
        }
    }

    pub fn message_serialization(message: impl Into<String>) -> Self {
        Self::MessageSerialization {
            message: message.into(),
        }
    }

    pub fn message_deserialization(message: impl Into<String>) -> Self {
        Self::MessageDeserialization {
            message: message.into(),
        }
    }

    /// A payload that will fail the same way on every redelivery.
    pub fn is_poison(&self) -> bool {
        matches!(self, Self::MessageDeserialization { .. })
    }
}

pub type MessagingResult<T> = Result<T, MessagingError>;
