//! # Completion Handler
//!
//! Reacts to the external "job finished" signal by removing the job's
//! intermediate artifacts and the relocated source dataset.
//!
//! Both deletions are best-effort: failures are logged and reported in the
//! [`CleanupReport`], never propagated. Running the handler twice for the
//! same job is harmless because the second pass finds nothing to delete.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::config::StorageConfig;
use crate::constants::{keys, COMPLETED_STATUS};
use crate::logging::log_job_operation;
use crate::models::JobId;
use crate::storage::ObjectStore;

#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("Job {job_id} is not completed (status '{status}')")]
    NotCompleted { job_id: JobId, status: String },

    #[error("Invalid completion request: {message}")]
    InvalidRequest { message: String },
}

impl CompletionError {
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Whether the failure was caused by the caller's input.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::NotCompleted { .. } | Self::InvalidRequest { .. })
    }
}

/// External completion signal for one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionNotice {
    pub job_id: JobId,
    pub status: String,
    /// Relocated source key. Falls back to the configured default when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_key: Option<String>,
}

impl CompletionNotice {
    pub fn completed(job_id: JobId) -> Self {
        Self {
            job_id,
            status: COMPLETED_STATUS.to_string(),
            source_key: None,
        }
    }

    pub fn with_source_key(mut self, source_key: impl Into<String>) -> Self {
        self.source_key = Some(source_key.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupReport {
    pub job_id: JobId,
    pub artifacts_deleted: usize,
    pub source_removed: bool,
}

#[derive(Clone)]
pub struct CompletionHandler {
    store: Arc<dyn ObjectStore>,
    artifact_bucket: String,
    source_bucket: String,
    processed_prefix: String,
    default_source_key: String,
}

impl std::fmt::Debug for CompletionHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionHandler")
            .field("store", &self.store.provider_name())
            .field("artifact_bucket", &self.artifact_bucket)
            .field("source_bucket", &self.source_bucket)
            .finish_non_exhaustive()
    }
}

impl CompletionHandler {
    pub fn new(store: Arc<dyn ObjectStore>, config: &StorageConfig) -> Self {
        Self {
            store,
            artifact_bucket: config.artifact_bucket.clone(),
            source_bucket: config.source_bucket.clone(),
            processed_prefix: config.processed_prefix.clone(),
            default_source_key: config.default_source_key.clone(),
        }
    }

    #[instrument(skip(self), fields(job_id = %notice.job_id))]
    pub async fn handle(&self, notice: &CompletionNotice) -> Result<CleanupReport, CompletionError> {
        if notice.status != COMPLETED_STATUS {
            warn!(status = %notice.status, "🚫 Ignoring completion signal for unfinished job");
            return Err(CompletionError::NotCompleted {
                job_id: notice.job_id,
                status: notice.status.clone(),
            });
        }

        let artifacts_deleted = self.delete_artifacts(&notice.job_id).await;

        let source_key = notice
            .source_key
            .as_deref()
            .unwrap_or(&self.default_source_key);
        let source_removed = self.delete_source(source_key).await;

        log_job_operation(
            "cleanup",
            &notice.job_id,
            "completed",
            Some(&format!(
                "artifacts_deleted={artifacts_deleted} source_removed={source_removed}"
            )),
        );

        Ok(CleanupReport {
            job_id: notice.job_id,
            artifacts_deleted,
            source_removed,
        })
    }

    async fn delete_artifacts(&self, job_id: &JobId) -> usize {
        let prefix = keys::job_prefix(&self.processed_prefix, job_id);
        let listed = match self.store.list(&self.artifact_bucket, &prefix).await {
            Ok(listed) => listed,
            Err(err) => {
                warn!(prefix = %prefix, error = %err, "⚠️ Could not list job artifacts");
                return 0;
            }
        };

        if listed.is_empty() {
            info!(prefix = %prefix, "🧹 No artifacts to delete");
            return 0;
        }

        let keys: Vec<String> = listed.into_iter().map(|object| object.key).collect();
        match self.store.delete_many(&self.artifact_bucket, &keys).await {
            Ok(deleted) => {
                info!(prefix = %prefix, deleted, "🧹 Deleted job artifacts");
                deleted
            }
            Err(err) => {
                warn!(prefix = %prefix, error = %err, "⚠️ Artifact deletion failed");
                0
            }
        }
    }

    async fn delete_source(&self, source_key: &str) -> bool {
        match self.store.delete(&self.source_bucket, source_key).await {
            Ok(true) => {
                info!(bucket = %self.source_bucket, key = %source_key, "🗑️ Deleted source dataset");
                true
            }
            Ok(false) => {
                warn!(bucket = %self.source_bucket, key = %source_key, "⚠️ Source dataset already gone");
                false
            }
            Err(err) => {
                warn!(bucket = %self.source_bucket, key = %source_key, error = %err, "⚠️ Source deletion failed");
                false
            }
        }
    }
}
