//! # Job Orchestration
//!
//! The two ends of a job's lifecycle.
//!
//! ## Core Components
//!
//! - **JobSplitter**: reads a dataset, partitions it and dispatches chunk messages
//! - **CompletionHandler**: removes a finished job's artifacts and source
//! - **Triggers**: JSON adapters mapping both onto status-coded responses

pub mod completion;
pub mod splitter;
pub mod triggers;

pub use completion::{CleanupReport, CompletionError, CompletionHandler, CompletionNotice};
pub use splitter::{partition_records, JobSplitter, SourceLocation, SplitError, SplitReport};
pub use triggers::{handle_completion_trigger, handle_split_trigger, TriggerResponse};
