//! # Job Splitter
//!
//! Turns one source dataset into a job: reads and parses it, allocates a job
//! id, partitions the records into fixed-size chunks and dispatches one queue
//! message per chunk.
//!
//! The total is written only after every chunk has been enqueued, and the
//! processed counter is created only if absent. Workers can finish chunks
//! before the splitter returns; neither write may erase their increments.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::codec::{decode_records, CodecError};
use crate::config::PipelineConfig;
use crate::constants::keys;
use crate::logging::log_job_operation;
use crate::messaging::{MessagingError, MessagingService};
use crate::models::{ChunkMessage, JobId, Record};
use crate::progress::{ProgressError, ProgressTracker};
use crate::storage::{ObjectStore, StorageError};

#[derive(Debug, Error)]
pub enum SplitError {
    #[error("Invalid split request: {message}")]
    InvalidRequest { message: String },

    #[error("Failed to read source dataset: {0}")]
    Storage(#[from] StorageError),

    #[error("Failed to parse source dataset: {0}")]
    Codec(#[from] CodecError),

    #[error("Failed to dispatch chunks for job {job_id}: {source}")]
    Dispatch {
        job_id: JobId,
        #[source]
        source: MessagingError,
    },

    #[error("Failed to record job progress: {0}")]
    Progress(#[from] ProgressError),
}

impl SplitError {
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::InvalidRequest { .. })
    }
}

/// Where a source dataset lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocation {
    pub bucket: String,
    pub key: String,
}

impl SourceLocation {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitReport {
    pub job_id: JobId,
    pub chunks: u64,
    /// Source key as received
    pub file: String,
    /// New key of the source after relocation, `None` if relocation failed
    pub relocated_to: Option<String>,
}

/// Partition `records` into consecutive chunks of at most `batch_size`,
/// indexed from 1 in input order.
pub fn partition_records(
    job_id: JobId,
    records: Vec<Record>,
    batch_size: usize,
) -> Vec<ChunkMessage> {
    let batch_size = batch_size.max(1);
    let mut chunks = Vec::with_capacity(records.len().div_ceil(batch_size));
    let mut records = records.into_iter().peekable();
    let mut chunk_index = 1u32;

    while records.peek().is_some() {
        let batch: Vec<Record> = records.by_ref().take(batch_size).collect();
        chunks.push(ChunkMessage::new(job_id, chunk_index, batch));
        chunk_index += 1;
    }
    chunks
}

pub struct JobSplitter<M: MessagingService> {
    store: Arc<dyn ObjectStore>,
    messaging: Arc<M>,
    tracker: ProgressTracker,
    queue: String,
    batch_size: usize,
    inprocessing_prefix: String,
    signed_url_ttl: Duration,
}

impl<M: MessagingService> std::fmt::Debug for JobSplitter<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobSplitter")
            .field("store", &self.store.provider_name())
            .field("messaging", &self.messaging.provider_name())
            .field("queue", &self.queue)
            .field("batch_size", &self.batch_size)
            .finish_non_exhaustive()
    }
}

impl<M: MessagingService> JobSplitter<M> {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        messaging: Arc<M>,
        tracker: ProgressTracker,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            store,
            messaging,
            tracker,
            queue: config.splitter.chunk_queue.clone(),
            batch_size: config.splitter.batch_size.max(1),
            inprocessing_prefix: config.storage.inprocessing_prefix.clone(),
            signed_url_ttl: config.storage.signed_url_ttl(),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    #[instrument(skip(self), fields(bucket = %source.bucket, key = %source.key))]
    pub async fn split(&self, source: &SourceLocation) -> Result<SplitReport, SplitError> {
        if source.bucket.trim().is_empty() || source.key.trim().is_empty() {
            return Err(SplitError::invalid_request(
                "both 'bucket' and 'key' are required",
            ));
        }
        let started = Instant::now();

        let url = self
            .store
            .signed_url(&source.bucket, &source.key, self.signed_url_ttl)
            .await?;
        debug!(url = %url, "🔗 Source read URL issued");
        let body = self.store.get(&source.bucket, &source.key).await?;
        let records = decode_records(&body)?;
        let record_count = records.len();

        let job_id = JobId::new();
        let chunks = partition_records(job_id, records, self.batch_size);
        let total = chunks.len() as u64;

        self.messaging
            .send_batch(&self.queue, &chunks)
            .await
            .map_err(|source| SplitError::Dispatch { job_id, source })?;

        self.tracker.set_total(&job_id, total).await?;
        self.tracker.init_processed(&job_id).await?;

        let relocated_to = self.relocate(source).await;

        info!(
            job_id = %job_id,
            records = record_count,
            chunks = total,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "✂️ Dataset split into chunks"
        );
        log_job_operation(
            "split",
            &job_id,
            "dispatched",
            Some(&format!("records={record_count} chunks={total}")),
        );

        Ok(SplitReport {
            job_id,
            chunks: total,
            file: source.key.clone(),
            relocated_to,
        })
    }

    /// Move the source under the in-processing prefix. Failure is logged only.
    async fn relocate(&self, source: &SourceLocation) -> Option<String> {
        let target = keys::inprocessing(&self.inprocessing_prefix, &source.key);
        match self.store.rename(&source.bucket, &source.key, &target).await {
            Ok(()) => Some(target),
            Err(err) => {
                warn!(key = %source.key, target = %target, error = %err, "⚠️ Could not relocate source dataset");
                None
            }
        }
    }
}
