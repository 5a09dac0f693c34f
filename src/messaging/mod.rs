//! # Messaging Module
//!
//! Queue abstraction carrying chunk messages from the splitter to the
//! workers, plus an in-process provider.

pub mod errors;
pub mod in_memory;
pub mod traits;
pub mod types;

pub use errors::{MessagingError, MessagingResult};
pub use in_memory::InMemoryMessagingService;
pub use traits::{MessagingService, QueueMessage};
pub use types::{MessageId, QueueStats, QueuedMessage, ReceiptHandle};
