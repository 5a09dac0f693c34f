//! # Chunk Messages
//!
//! The unit of dispatch between the splitter and the workers. A chunk is an
//! ordered slice of a job's input records together with its 1-based position.

use serde::{Deserialize, Serialize};

use super::job::JobId;
use super::record::Record;

/// Queue payload for one chunk of a job.
///
/// Older producers name the index `chunk_id` and the rows `data`; both are
/// accepted when reading.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMessage {
    pub job_id: JobId,
    #[serde(alias = "chunk_id")]
    pub chunk_index: u32,
    #[serde(alias = "data")]
    pub records: Vec<Record>,
}

impl ChunkMessage {
    pub fn new(job_id: JobId, chunk_index: u32, records: Vec<Record>) -> Self {
        Self {
            job_id,
            chunk_index,
            records,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// A chunk whose records have all been through enrichment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichedChunk {
    pub job_id: JobId,
    pub chunk_index: u32,
    pub records: Vec<Record>,
}

impl EnrichedChunk {
    pub fn new(job_id: JobId, chunk_index: u32, records: Vec<Record>) -> Self {
        Self {
            job_id,
            chunk_index,
            records,
        }
    }
}
