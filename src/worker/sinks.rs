//! # Chunk Sinks
//!
//! Delivery strategies for an enriched chunk.
//!
//! - [`DurableStorageSink`] writes the chunk as CSV under its deterministic
//!   key, announces it downstream if configured, then counts it as processed.
//! - [`IngestionForwardSink`] streams the CSV to the ingestion service and
//!   tracks no progress.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::ingestion::IngestionClient;
use super::WorkerError;
use crate::codec::encode_records;
use crate::config::StorageConfig;
use crate::constants::keys;
use crate::messaging::{MessagingError, MessagingService};
use crate::models::{EnrichedChunk, JobId};
use crate::progress::ProgressTracker;
use crate::storage::ObjectStore;

/// What a sink did with a chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Delivery {
    Stored {
        key: String,
        /// New processed count, `None` when the chunk had already been counted.
        processed: Option<u64>,
    },
    Forwarded {
        bytes: usize,
        sent: bool,
    },
}

#[async_trait]
pub trait ChunkSink: Send + Sync + 'static {
    async fn deliver(&self, chunk: &EnrichedChunk) -> Result<Delivery, WorkerError>;

    fn sink_name(&self) -> &'static str;
}

/// Announcement that a chunk is available in durable storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkStored {
    pub job_id: JobId,
    pub bucket: String,
    pub key: String,
    pub chunk_index: u32,
}

#[async_trait]
pub trait ChunkPublisher: Send + Sync + 'static {
    async fn publish(&self, event: &ChunkStored) -> Result<(), MessagingError>;
}

/// Publishes [`ChunkStored`] events to a queue.
pub struct QueueChunkPublisher<M: MessagingService> {
    messaging: Arc<M>,
    queue: String,
}

impl<M: MessagingService> QueueChunkPublisher<M> {
    pub fn new(messaging: Arc<M>, queue: impl Into<String>) -> Self {
        Self {
            messaging,
            queue: queue.into(),
        }
    }
}

#[async_trait]
impl<M: MessagingService> ChunkPublisher for QueueChunkPublisher<M> {
    async fn publish(&self, event: &ChunkStored) -> Result<(), MessagingError> {
        self.messaging.send_message(&self.queue, event).await?;
        Ok(())
    }
}

pub struct DurableStorageSink {
    store: Arc<dyn ObjectStore>,
    tracker: ProgressTracker,
    bucket: String,
    processed_prefix: String,
    publisher: Option<Arc<dyn ChunkPublisher>>,
}

impl DurableStorageSink {
    pub fn new(store: Arc<dyn ObjectStore>, tracker: ProgressTracker, config: &StorageConfig) -> Self {
        Self {
            store,
            tracker,
            bucket: config.artifact_bucket.clone(),
            processed_prefix: config.processed_prefix.clone(),
            publisher: None,
        }
    }

    pub fn with_publisher(mut self, publisher: Arc<dyn ChunkPublisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }
}

#[async_trait]
impl ChunkSink for DurableStorageSink {
    async fn deliver(&self, chunk: &EnrichedChunk) -> Result<Delivery, WorkerError> {
        let key = keys::chunk_object(&self.processed_prefix, &chunk.job_id, chunk.chunk_index);
        let body = encode_records(&chunk.records)?;

        // Same key on every delivery, so a retry overwrites instead of duplicating.
        self.store
            .put(&self.bucket, &key, body.into_bytes())
            .await?;

        if let Some(publisher) = &self.publisher {
            let event = ChunkStored {
                job_id: chunk.job_id,
                bucket: self.bucket.clone(),
                key: key.clone(),
                chunk_index: chunk.chunk_index,
            };
            if let Err(err) = publisher.publish(&event).await {
                warn!(job_id = %chunk.job_id, chunk_index = chunk.chunk_index, error = %err, "⚠️ Could not announce stored chunk");
            }
        }

        let processed = self
            .tracker
            .mark_chunk_processed(&chunk.job_id, chunk.chunk_index)
            .await?;
        debug!(job_id = %chunk.job_id, key = %key, ?processed, "💾 Chunk stored");

        Ok(Delivery::Stored { key, processed })
    }

    fn sink_name(&self) -> &'static str {
        "durable_storage"
    }
}

pub struct IngestionForwardSink {
    client: IngestionClient,
}

impl IngestionForwardSink {
    pub fn new(client: IngestionClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ChunkSink for IngestionForwardSink {
    async fn deliver(&self, chunk: &EnrichedChunk) -> Result<Delivery, WorkerError> {
        let body = encode_records(&chunk.records)?;
        let bytes = body.len();
        let sent = match self.client.send(body.as_bytes()).await {
            Ok(()) => true,
            Err(err) => {
                warn!(
                    job_id = %chunk.job_id,
                    chunk_index = chunk.chunk_index,
                    address = %self.client.address(),
                    error = %err,
                    "⚠️ Ingestion forward failed, dropping chunk"
                );
                false
            }
        };
        Ok(Delivery::Forwarded { bytes, sent })
    }

    fn sink_name(&self) -> &'static str {
        "ingestion_forward"
    }
}
