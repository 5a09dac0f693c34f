//! # Worker Consumer
//!
//! Pulls chunk messages off the queue and runs them through a [`Worker`].
//! Successful chunks are acked. Failed chunks are nacked with requeue, so the
//! queue redelivers them; the worker's idempotent writes make that safe.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use super::{Worker, WorkerError};
use crate::config::WorkerConfig;
use crate::logging::log_error;
use crate::messaging::{MessagingService, QueuedMessage};
use crate::models::ChunkMessage;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumerStats {
    pub received: u64,
    pub succeeded: u64,
    pub failed: u64,
}

impl ConsumerStats {
    pub fn absorb(&mut self, other: ConsumerStats) {
        self.received += other.received;
        self.succeeded += other.succeeded;
        self.failed += other.failed;
    }
}

pub struct WorkerConsumer<M: MessagingService> {
    consumer_id: String,
    worker: Worker,
    messaging: Arc<M>,
    queue: String,
    visibility_timeout: Duration,
    batch_size: usize,
    idle_poll: Duration,
}

impl<M: MessagingService> std::fmt::Debug for WorkerConsumer<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerConsumer")
            .field("consumer_id", &self.consumer_id)
            .field("queue", &self.queue)
            .field("provider", &self.messaging.provider_name())
            .finish_non_exhaustive()
    }
}

impl<M: MessagingService> WorkerConsumer<M> {
    pub fn new(
        consumer_id: impl Into<String>,
        worker: Worker,
        messaging: Arc<M>,
        queue: impl Into<String>,
        config: &WorkerConfig,
    ) -> Self {
        Self {
            consumer_id: consumer_id.into(),
            worker,
            messaging,
            queue: queue.into(),
            visibility_timeout: config.visibility_timeout(),
            batch_size: config.receive_batch_size.max(1),
            idle_poll: config.idle_poll(),
        }
    }

    /// Receive one batch and process it.
    pub async fn poll_once(&self) -> Result<ConsumerStats, WorkerError> {
        let batch: Vec<QueuedMessage<ChunkMessage>> = self
            .messaging
            .receive_messages(&self.queue, self.batch_size, self.visibility_timeout)
            .await?;

        let mut stats = ConsumerStats {
            received: batch.len() as u64,
            ..ConsumerStats::default()
        };
        for queued in batch {
            if self.handle(queued).await {
                stats.succeeded += 1;
            } else {
                stats.failed += 1;
            }
        }
        Ok(stats)
    }

    /// Process until the queue has nothing visible left.
    pub async fn run_until_idle(&self) -> Result<ConsumerStats, WorkerError> {
        let mut total = ConsumerStats::default();
        loop {
            let pass = self.poll_once().await?;
            if pass.received == 0 {
                return Ok(total);
            }
            total.absorb(pass);
        }
    }

    /// Process until a shutdown signal arrives.
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) -> ConsumerStats {
        info!(consumer_id = %self.consumer_id, queue = %self.queue, "🚀 Worker consumer started");
        let mut total = ConsumerStats::default();

        loop {
            tokio::select! {
                result = self.poll_once() => {
                    match result {
                        Ok(pass) => {
                            let idle = pass.received == 0;
                            total.absorb(pass);
                            if idle {
                                tokio::time::sleep(self.idle_poll).await;
                            }
                        }
                        Err(err) => {
                            log_error("worker_consumer", "receive", &err.to_string(), Some(&self.queue));
                            tokio::time::sleep(self.idle_poll).await;
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!(
                        consumer_id = %self.consumer_id,
                        succeeded = total.succeeded,
                        failed = total.failed,
                        "🛑 Worker consumer shutting down"
                    );
                    break;
                }
            }
        }
        total
    }

    async fn handle(&self, queued: QueuedMessage<ChunkMessage>) -> bool {
        let chunk = &queued.message;
        if queued.is_redelivery() {
            debug!(
                job_id = %chunk.job_id,
                chunk_index = chunk.chunk_index,
                receive_count = queued.receive_count,
                "🔁 Redelivered chunk"
            );
        }

        match self.worker.process_chunk(chunk).await {
            Ok(_) => {
                if let Err(err) = self
                    .messaging
                    .ack_message(&self.queue, &queued.receipt_handle)
                    .await
                {
                    // The visibility timeout will redeliver it; the rerun is idempotent.
                    warn!(job_id = %chunk.job_id, chunk_index = chunk.chunk_index, error = %err, "⚠️ Ack failed");
                }
                true
            }
            Err(err) => {
                error!(
                    consumer_id = %self.consumer_id,
                    job_id = %chunk.job_id,
                    chunk_index = chunk.chunk_index,
                    error = %err,
                    "❌ Chunk failed, returning it to the queue"
                );
                if let Err(nack_err) = self
                    .messaging
                    .nack_message(&self.queue, &queued.receipt_handle, true)
                    .await
                {
                    warn!(job_id = %chunk.job_id, error = %nack_err, "⚠️ Nack failed, waiting for visibility timeout");
                }
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MarketDataConfig, NumericAverageConfig, StorageConfig};
    use crate::enrichment::{EnrichmentEngine, NumericAverageClient, StaticMarketData};
    use crate::messaging::InMemoryMessagingService;
    use crate::models::{JobId, Record};
    use crate::progress::{InMemoryCounterStore, ProgressTracker};
    use crate::storage::{InMemoryObjectStore, ObjectStore, StorageError};
    use crate::worker::DurableStorageSink;
    use async_trait::async_trait;

    const QUEUE: &str = "chunks";

    fn engine() -> Arc<EnrichmentEngine> {
        let data = Arc::new(StaticMarketData::new().with_rate(1.0));
        Arc::new(EnrichmentEngine::new(
            data.clone(),
            data.clone(),
            data,
            NumericAverageClient::new(&NumericAverageConfig {
                port: 1,
                timeout_ms: 100,
                ..NumericAverageConfig::default()
            }),
            &MarketDataConfig::default(),
        ))
    }

    fn worker_config() -> WorkerConfig {
        WorkerConfig {
            receive_batch_size: 2,
            idle_poll_ms: 5,
            ..WorkerConfig::default()
        }
    }

    /// Store whose writes fail until `fail_puts` is cleared.
    struct FlakyStore {
        inner: InMemoryObjectStore,
        fail_puts: parking_lot::Mutex<u32>,
    }

    #[async_trait]
    impl ObjectStore for FlakyStore {
        async fn put(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<(), StorageError> {
            {
                let mut remaining = self.fail_puts.lock();
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(StorageError::io("put", bucket, key, "disk full"));
                }
            }
            self.inner.put(bucket, key, body).await
        }
        async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StorageError> {
            self.inner.get(bucket, key).await
        }
        async fn list(
            &self,
            bucket: &str,
            prefix: &str,
        ) -> Result<Vec<crate::storage::ObjectInfo>, StorageError> {
            self.inner.list(bucket, prefix).await
        }
        async fn delete(&self, bucket: &str, key: &str) -> Result<bool, StorageError> {
            self.inner.delete(bucket, key).await
        }
        async fn rename(&self, bucket: &str, from: &str, to: &str) -> Result<(), StorageError> {
            self.inner.rename(bucket, from, to).await
        }
        async fn signed_url(
            &self,
            bucket: &str,
            key: &str,
            ttl: Duration,
        ) -> Result<String, StorageError> {
            self.inner.signed_url(bucket, key, ttl).await
        }
        fn provider_name(&self) -> &'static str {
            "flaky"
        }
    }

    #[tokio::test]
    async fn test_run_until_idle_acks_every_chunk() {
        let messaging = Arc::new(InMemoryMessagingService::new());
        messaging.ensure_queue(QUEUE).await.unwrap();
        let tracker = ProgressTracker::new(Arc::new(InMemoryCounterStore::new()), Duration::from_secs(60));
        let sink = DurableStorageSink::new(
            Arc::new(InMemoryObjectStore::new()),
            tracker.clone(),
            &StorageConfig::default(),
        );
        let worker = Worker::new(engine(), Arc::new(sink));
        let job_id = JobId::new();
        for idx in 1..=3 {
            let message = ChunkMessage::new(job_id, idx, vec![Record::with_ticker("AAPL")]);
            messaging.send_message(QUEUE, &message).await.unwrap();
        }

        let consumer = WorkerConsumer::new("w-1", worker, messaging.clone(), QUEUE, &worker_config());
        let stats = consumer.run_until_idle().await.unwrap();

        assert_eq!(stats, ConsumerStats { received: 3, succeeded: 3, failed: 0 });
        assert_eq!(messaging.queue_length(QUEUE).await, 0);
        assert_eq!(tracker.get_processed(&job_id).await.unwrap(), Some(3));
    }

    #[tokio::test]
    async fn test_failed_chunk_is_requeued_and_retried() {
        let messaging = Arc::new(InMemoryMessagingService::new());
        messaging.ensure_queue(QUEUE).await.unwrap();
        let tracker = ProgressTracker::new(Arc::new(InMemoryCounterStore::new()), Duration::from_secs(60));
        let store = Arc::new(FlakyStore {
            inner: InMemoryObjectStore::new(),
            fail_puts: parking_lot::Mutex::new(1),
        });
        let sink = DurableStorageSink::new(store, tracker.clone(), &StorageConfig::default());
        let worker = Worker::new(engine(), Arc::new(sink));
        let job_id = JobId::new();
        messaging
            .send_message(QUEUE, &ChunkMessage::new(job_id, 1, vec![Record::with_ticker("AAPL")]))
            .await
            .unwrap();

        let consumer = WorkerConsumer::new("w-1", worker, messaging.clone(), QUEUE, &worker_config());
        let first = consumer.poll_once().await.unwrap();
        assert_eq!(first.failed, 1);
        assert_eq!(tracker.get_processed(&job_id).await.unwrap(), None);

        let second = consumer.poll_once().await.unwrap();
        assert_eq!(second.succeeded, 1);
        assert_eq!(tracker.get_processed(&job_id).await.unwrap(), Some(1));
        assert_eq!(messaging.queue_length(QUEUE).await, 0);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let messaging = Arc::new(InMemoryMessagingService::new());
        messaging.ensure_queue(QUEUE).await.unwrap();
        let sink = DurableStorageSink::new(
            Arc::new(InMemoryObjectStore::new()),
            ProgressTracker::new(Arc::new(InMemoryCounterStore::new()), Duration::from_secs(60)),
            &StorageConfig::default(),
        );
        let consumer = WorkerConsumer::new(
            "w-1",
            Worker::new(engine(), Arc::new(sink)),
            messaging,
            QUEUE,
            &worker_config(),
        );
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let handle = tokio::spawn(async move { consumer.run(shutdown_rx).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        shutdown_tx.send(()).unwrap();

        let stats = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stats.received, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_spawned_consumers_drain_queue_on_worker_threads() {
        let messaging = Arc::new(InMemoryMessagingService::new());
        messaging.ensure_queue(QUEUE).await.unwrap();
        let tracker = ProgressTracker::new(Arc::new(InMemoryCounterStore::new()), Duration::from_secs(60));
        let sink = DurableStorageSink::new(
            Arc::new(InMemoryObjectStore::new()),
            tracker.clone(),
            &StorageConfig::default(),
        );
        let worker = Worker::new(engine(), Arc::new(sink));
        let job_id = JobId::new();
        for idx in 1..=4 {
            let records = vec![Record::with_ticker("AAPL"), Record::with_ticker("MSFT")];
            messaging
                .send_message(QUEUE, &ChunkMessage::new(job_id, idx, records))
                .await
                .unwrap();
        }

        let (shutdown_tx, _) = broadcast::channel(1);
        let handles: Vec<_> = (0..2)
            .map(|i| {
                let consumer = WorkerConsumer::new(
                    format!("w-{i}"),
                    worker.clone(),
                    messaging.clone(),
                    QUEUE,
                    &worker_config(),
                );
                let shutdown_rx = shutdown_tx.subscribe();
                tokio::spawn(async move { consumer.run(shutdown_rx).await })
            })
            .collect();

        tokio::time::timeout(Duration::from_secs(5), async {
            while messaging.queue_length(QUEUE).await > 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        shutdown_tx.send(()).unwrap();

        let mut total = ConsumerStats::default();
        for handle in handles {
            total.absorb(handle.await.unwrap());
        }
        assert_eq!(total.succeeded, 4);
        assert_eq!(total.failed, 0);
        assert_eq!(tracker.get_processed(&job_id).await.unwrap(), Some(4));
    }
}
