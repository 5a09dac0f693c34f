//! # Chunk Workers
//!
//! A [`Worker`] turns one chunk message into an enriched chunk and hands it to
//! a [`ChunkSink`]. It keeps no per-chunk state between calls, so any number
//! of workers can share the same collaborators.
//!
//! - [`sinks`] - durable-storage and ingestion-forward delivery strategies
//! - [`consumer`] - queue receive loop with ack/nack semantics
//! - [`ingestion`] - one-shot TCP sender for the forward strategy

pub mod consumer;
pub mod ingestion;
pub mod sinks;

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::instrument;

use crate::codec::CodecError;
use crate::enrichment::EnrichmentEngine;
use crate::logging::log_chunk_operation;
use crate::messaging::MessagingError;
use crate::models::{ChunkMessage, EnrichedChunk, JobId};
use crate::progress::ProgressError;
use crate::storage::StorageError;

pub use consumer::{ConsumerStats, WorkerConsumer};
pub use ingestion::{IngestionClient, IngestionError};
pub use sinks::{
    ChunkPublisher, ChunkSink, ChunkStored, Delivery, DurableStorageSink, IngestionForwardSink,
    QueueChunkPublisher,
};

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Failed to encode chunk: {0}")]
    Codec(#[from] CodecError),

    #[error("Failed to persist chunk: {0}")]
    Storage(#[from] StorageError),

    #[error("Failed to record progress: {0}")]
    Progress(#[from] ProgressError),

    #[error("Queue operation failed: {0}")]
    Messaging(#[from] MessagingError),
}

/// Result of processing one chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkOutcome {
    pub job_id: JobId,
    pub chunk_index: u32,
    pub records: usize,
    pub delivery: Delivery,
}

#[derive(Clone)]
pub struct Worker {
    engine: Arc<EnrichmentEngine>,
    sink: Arc<dyn ChunkSink>,
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("engine", &self.engine)
            .field("sink", &self.sink.sink_name())
            .finish()
    }
}

impl Worker {
    pub fn new(engine: Arc<EnrichmentEngine>, sink: Arc<dyn ChunkSink>) -> Self {
        Self { engine, sink }
    }

    pub fn sink_name(&self) -> &'static str {
        self.sink.sink_name()
    }

    /// Enrich a chunk and deliver it. Safe to repeat for the same chunk.
    #[instrument(skip_all, fields(job_id = %message.job_id, chunk_index = message.chunk_index))]
    pub async fn process_chunk(&self, message: &ChunkMessage) -> Result<ChunkOutcome, WorkerError> {
        let started = Instant::now();

        let records = self.engine.enrich_chunk(&message.records).await;
        let enriched = EnrichedChunk::new(message.job_id, message.chunk_index, records);
        let delivery = self.sink.deliver(&enriched).await?;

        log_chunk_operation(
            "process",
            &message.job_id,
            message.chunk_index,
            enriched.records.len(),
            self.sink.sink_name(),
            Some(started.elapsed().as_millis() as u64),
        );

        Ok(ChunkOutcome {
            job_id: message.job_id,
            chunk_index: message.chunk_index,
            records: enriched.records.len(),
            delivery,
        })
    }
}
