//! # Pipeline Data Model
//!
//! - [`record`] - ordered market rows validated at the deserialization boundary
//! - [`chunk`] - queue payloads and their enriched counterparts
//! - [`job`] - job identity and counter snapshots

pub mod chunk;
pub mod job;
pub mod record;

pub use chunk::{ChunkMessage, EnrichedChunk};
pub use job::{JobId, JobProgress};
pub use record::{Record, RecordError};
