//! # Completion Observer
//!
//! Decides when a job is finished by reading both counters. A job is only
//! complete once its total has been recorded and the processed count matches
//! it, so an early burst of worker increments can never look like completion.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, instrument};

use super::tracker::{ProgressError, ProgressTracker};
use crate::models::{JobId, JobProgress};
use crate::orchestration::completion::{
    CleanupReport, CompletionError, CompletionHandler, CompletionNotice,
};

#[derive(Debug, Error)]
pub enum ObserverError {
    #[error(transparent)]
    Progress(#[from] ProgressError),

    #[error(transparent)]
    Completion(#[from] CompletionError),

    #[error("Job {job_id} did not complete within {waited:?} (last seen {last:?})")]
    Timeout {
        job_id: JobId,
        waited: Duration,
        last: JobProgress,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompletionState {
    Pending(JobProgress),
    Complete { total: u64 },
}

impl CompletionState {
    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Complete { .. })
    }
}

#[derive(Debug, Clone)]
pub struct CompletionObserver {
    tracker: ProgressTracker,
    handler: CompletionHandler,
    poll_interval: Duration,
}

impl CompletionObserver {
    pub fn new(tracker: ProgressTracker, handler: CompletionHandler) -> Self {
        Self {
            tracker,
            handler,
            poll_interval: Duration::from_millis(100),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub async fn check(&self, job_id: &JobId) -> Result<CompletionState, ObserverError> {
        let progress = self.tracker.progress(job_id).await?;
        Ok(match progress.total {
            Some(total) if progress.is_complete() => CompletionState::Complete { total },
            _ => CompletionState::Pending(progress),
        })
    }

    /// Poll until the job completes or `deadline` elapses.
    #[instrument(skip(self), fields(job_id = %job_id))]
    pub async fn wait_for_completion(
        &self,
        job_id: &JobId,
        deadline: Duration,
    ) -> Result<u64, ObserverError> {
        let started = Instant::now();
        loop {
            match self.check(job_id).await? {
                CompletionState::Complete { total } => {
                    info!(total, elapsed_ms = started.elapsed().as_millis() as u64, "🏁 Job complete");
                    return Ok(total);
                }
                CompletionState::Pending(progress) => {
                    if started.elapsed() >= deadline {
                        return Err(ObserverError::Timeout {
                            job_id: *job_id,
                            waited: deadline,
                            last: progress,
                        });
                    }
                    debug!(
                        processed = progress.processed,
                        total = ?progress.total,
                        "⏳ Waiting for chunks"
                    );
                }
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Wait for completion, then send the completion signal to the handler.
    pub async fn observe_and_cleanup(
        &self,
        job_id: &JobId,
        source_key: Option<String>,
        deadline: Duration,
    ) -> Result<CleanupReport, ObserverError> {
        self.wait_for_completion(job_id, deadline).await?;
        let mut notice = CompletionNotice::completed(*job_id);
        notice.source_key = source_key;
        Ok(self.handler.handle(&notice).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;
    use crate::progress::InMemoryCounterStore;
    use crate::storage::InMemoryObjectStore;
    use std::sync::Arc;

    fn observer() -> (CompletionObserver, ProgressTracker) {
        let tracker = ProgressTracker::new(
            Arc::new(InMemoryCounterStore::new()),
            Duration::from_secs(60),
        );
        let handler = CompletionHandler::new(
            Arc::new(InMemoryObjectStore::new()),
            &StorageConfig::default(),
        );
        let observer = CompletionObserver::new(tracker.clone(), handler)
            .with_poll_interval(Duration::from_millis(5));
        (observer, tracker)
    }

    #[tokio::test]
    async fn test_processed_alone_is_not_completion() {
        let (observer, tracker) = observer();
        let job_id = JobId::new();
        tracker.increment_processed(&job_id).await.unwrap();

        let state = observer.check(&job_id).await.unwrap();
        assert_eq!(state, CompletionState::Pending(JobProgress::new(1, None)));
    }

    #[tokio::test]
    async fn test_zero_chunk_job_is_complete_once_total_is_set() {
        let (observer, tracker) = observer();
        let job_id = JobId::new();
        tracker.set_total(&job_id, 0).await.unwrap();
        tracker.init_processed(&job_id).await.unwrap();

        assert!(observer.check(&job_id).await.unwrap().is_complete());
    }

    #[tokio::test]
    async fn test_wait_times_out_on_stalled_job() {
        let (observer, tracker) = observer();
        let job_id = JobId::new();
        tracker.set_total(&job_id, 2).await.unwrap();
        tracker.increment_processed(&job_id).await.unwrap();

        let err = observer
            .wait_for_completion(&job_id, Duration::from_millis(30))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ObserverError::Timeout { last, .. } if last == JobProgress::new(1, Some(2))
        ));
    }

    #[tokio::test]
    async fn test_observe_and_cleanup_after_late_increment() {
        let (observer, tracker) = observer();
        let job_id = JobId::new();
        tracker.set_total(&job_id, 1).await.unwrap();

        let finisher = {
            let tracker = tracker.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                tracker.mark_chunk_processed(&job_id, 1).await.unwrap();
            })
        };

        let report = observer
            .observe_and_cleanup(&job_id, None, Duration::from_secs(2))
            .await
            .unwrap();
        finisher.await.unwrap();

        assert_eq!(report.job_id, job_id);
        assert_eq!(report.artifacts_deleted, 0);
    }
}
