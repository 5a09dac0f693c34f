//! # Progress Tracker
//!
//! Job counters addressed by job id: `processed` and `total`, both with a
//! bounded retention window so abandoned jobs clean themselves up.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::debug;

use super::counter_store::{CounterStore, CounterStoreError};
use crate::constants::keys;
use crate::models::{JobId, JobProgress};

#[derive(Debug, Error)]
pub enum ProgressError {
    #[error(transparent)]
    Store(#[from] CounterStoreError),

    #[error("Counter '{key}' holds a negative value: {value}")]
    Corrupt { key: String, value: i64 },
}

fn to_count(key: &str, value: i64) -> Result<u64, ProgressError> {
    u64::try_from(value).map_err(|_| ProgressError::Corrupt {
        key: key.to_string(),
        value,
    })
}

fn to_stored(key: &str, value: u64) -> Result<i64, ProgressError> {
    i64::try_from(value).map_err(|_| {
        ProgressError::Store(CounterStoreError::Overflow {
            key: key.to_string(),
        })
    })
}

#[derive(Clone)]
pub struct ProgressTracker {
    store: Arc<dyn CounterStore>,
    ttl: Duration,
}

impl std::fmt::Debug for ProgressTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressTracker")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl ProgressTracker {
    pub fn new(store: Arc<dyn CounterStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Record the number of dispatched chunks.
    pub async fn set_total(&self, job_id: &JobId, total: u64) -> Result<(), ProgressError> {
        let key = keys::total_counter(job_id);
        self.store
            .set(&key, to_stored(&key, total)?, Some(self.ttl))
            .await?;
        debug!(job_id = %job_id, total, "📊 Job total recorded");
        Ok(())
    }

    /// Ensure the processed counter exists without resetting increments that
    /// landed before the splitter finished, and refresh its retention.
    pub async fn init_processed(&self, job_id: &JobId) -> Result<bool, ProgressError> {
        let key = keys::processed_counter(job_id);
        let created = self.store.set_if_absent(&key, 0, Some(self.ttl)).await?;
        if !created {
            self.store.expire(&key, self.ttl).await?;
        }
        Ok(created)
    }

    /// Atomically count one more processed chunk.
    pub async fn increment_processed(&self, job_id: &JobId) -> Result<u64, ProgressError> {
        let key = keys::processed_counter(job_id);
        let value = self.store.increment(&key, Some(self.ttl)).await?;
        to_count(&key, value)
    }

    /// Count a chunk at most once, however many times it is delivered.
    ///
    /// Returns the new processed value, or `None` when the chunk had already
    /// been counted. The check and the increment are one store call, so an
    /// attempt that is cancelled or dies part way leaves the chunk uncounted.
    pub async fn mark_chunk_processed(
        &self,
        job_id: &JobId,
        chunk_index: u32,
    ) -> Result<Option<u64>, ProgressError> {
        let key = keys::processed_counter(job_id);
        let member = chunk_index.to_string();
        match self
            .store
            .increment_once(&key, &member, Some(self.ttl))
            .await?
        {
            Some(value) => to_count(&key, value).map(Some),
            None => {
                debug!(job_id = %job_id, chunk_index, "🔁 Chunk already counted");
                Ok(None)
            }
        }
    }

    pub async fn get_processed(&self, job_id: &JobId) -> Result<Option<u64>, ProgressError> {
        let key = keys::processed_counter(job_id);
        self.store
            .get(&key)
            .await?
            .map(|value| to_count(&key, value))
            .transpose()
    }

    pub async fn get_total(&self, job_id: &JobId) -> Result<Option<u64>, ProgressError> {
        let key = keys::total_counter(job_id);
        self.store
            .get(&key)
            .await?
            .map(|value| to_count(&key, value))
            .transpose()
    }

    /// Both counters in one snapshot. A missing processed counter reads as 0.
    pub async fn progress(&self, job_id: &JobId) -> Result<JobProgress, ProgressError> {
        let total = self.get_total(job_id).await?;
        let processed = self.get_processed(job_id).await?.unwrap_or(0);
        Ok(JobProgress::new(processed, total))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::InMemoryCounterStore;

    fn tracker() -> ProgressTracker {
        ProgressTracker::new(
            Arc::new(InMemoryCounterStore::new()),
            Duration::from_secs(86_400),
        )
    }

    #[tokio::test]
    async fn test_unset_counters_read_as_none() {
        let tracker = tracker();
        let job_id = JobId::new();

        assert_eq!(tracker.get_total(&job_id).await.unwrap(), None);
        assert_eq!(tracker.get_processed(&job_id).await.unwrap(), None);
        let progress = tracker.progress(&job_id).await.unwrap();
        assert_eq!(progress, JobProgress::new(0, None));
        assert!(!progress.is_complete());
    }

    #[tokio::test]
    async fn test_early_increment_survives_initialisation() {
        let tracker = tracker();
        let job_id = JobId::new();

        // A worker finishes before the splitter records anything.
        assert_eq!(tracker.increment_processed(&job_id).await.unwrap(), 1);
        assert!(!tracker.progress(&job_id).await.unwrap().is_complete());

        assert!(!tracker.init_processed(&job_id).await.unwrap());
        tracker.set_total(&job_id, 1).await.unwrap();

        assert_eq!(tracker.get_processed(&job_id).await.unwrap(), Some(1));
        assert!(tracker.progress(&job_id).await.unwrap().is_complete());
    }

    #[tokio::test]
    async fn test_duplicate_chunk_is_counted_once() {
        let tracker = tracker();
        let job_id = JobId::new();

        assert_eq!(
            tracker.mark_chunk_processed(&job_id, 1).await.unwrap(),
            Some(1)
        );
        assert_eq!(tracker.mark_chunk_processed(&job_id, 1).await.unwrap(), None);
        assert_eq!(
            tracker.mark_chunk_processed(&job_id, 2).await.unwrap(),
            Some(2)
        );
        assert_eq!(tracker.get_processed(&job_id).await.unwrap(), Some(2));
    }

    #[tokio::test]
    async fn test_negative_counter_is_reported() {
        let store = Arc::new(InMemoryCounterStore::new());
        let tracker = ProgressTracker::new(store.clone(), Duration::from_secs(60));
        let job_id = JobId::new();
        store
            .set(&keys::total_counter(&job_id), -1, None)
            .await
            .unwrap();

        let err = tracker.get_total(&job_id).await.unwrap_err();
        assert!(matches!(err, ProgressError::Corrupt { value: -1, .. }));
    }

    /// Store whose first `increment_once` stalls long enough to be cancelled.
    struct StallingStore {
        inner: InMemoryCounterStore,
        stalls: parking_lot::Mutex<u32>,
    }

    #[async_trait::async_trait]
    impl CounterStore for StallingStore {
        async fn set(&self, key: &str, value: i64, ttl: Option<Duration>) -> Result<(), CounterStoreError> {
            self.inner.set(key, value, ttl).await
        }
        async fn set_if_absent(
            &self,
            key: &str,
            value: i64,
            ttl: Option<Duration>,
        ) -> Result<bool, CounterStoreError> {
            self.inner.set_if_absent(key, value, ttl).await
        }
        async fn increment(&self, key: &str, ttl: Option<Duration>) -> Result<i64, CounterStoreError> {
            self.inner.increment(key, ttl).await
        }
        async fn increment_once(
            &self,
            key: &str,
            member: &str,
            ttl: Option<Duration>,
        ) -> Result<Option<i64>, CounterStoreError> {
            let stall = {
                let mut stalls = self.stalls.lock();
                let stall = *stalls > 0;
                *stalls = stalls.saturating_sub(1);
                stall
            };
            if stall {
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
            self.inner.increment_once(key, member, ttl).await
        }
        async fn get(&self, key: &str) -> Result<Option<i64>, CounterStoreError> {
            self.inner.get(key).await
        }
        async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, CounterStoreError> {
            self.inner.expire(key, ttl).await
        }
        async fn delete(&self, key: &str) -> Result<bool, CounterStoreError> {
            self.inner.delete(key).await
        }
    }

    #[tokio::test]
    async fn test_cancelled_count_is_retried_and_completes_job() {
        let store = Arc::new(StallingStore {
            inner: InMemoryCounterStore::new(),
            stalls: parking_lot::Mutex::new(1),
        });
        let tracker = ProgressTracker::new(store, Duration::from_secs(60));
        let job_id = JobId::new();
        tracker.set_total(&job_id, 1).await.unwrap();

        let first =
            tokio::time::timeout(Duration::from_millis(20), tracker.mark_chunk_processed(&job_id, 1)).await;
        assert!(first.is_err());
        assert_eq!(tracker.progress(&job_id).await.unwrap(), JobProgress::new(0, Some(1)));

        assert_eq!(tracker.mark_chunk_processed(&job_id, 1).await.unwrap(), Some(1));
        assert!(tracker.progress(&job_id).await.unwrap().is_complete());
    }
}
