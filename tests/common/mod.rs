//! Shared fixtures for the integration suites: an in-process pipeline wired
//! to in-memory storage, queue and counters, with fixed market data.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use enrich_core::config::{NumericAverageConfig, PipelineConfig};
use enrich_core::enrichment::{DailyBar, EnrichmentEngine, NumericAverageClient, StaticMarketData};
use enrich_core::messaging::{InMemoryMessagingService, MessagingService};
use enrich_core::orchestration::{CompletionHandler, JobSplitter};
use enrich_core::progress::{CompletionObserver, InMemoryCounterStore, ProgressTracker};
use enrich_core::storage::{InMemoryObjectStore, ObjectStore};
use enrich_core::worker::{DurableStorageSink, Worker, WorkerConsumer};

pub const SOURCE_KEY: &str = "market.csv";

/// Averaging client pointed at a port nothing listens on.
pub fn unreachable_averager() -> NumericAverageClient {
    NumericAverageClient::new(&NumericAverageConfig {
        port: 1,
        timeout_ms: 200,
        ..NumericAverageConfig::default()
    })
}

/// `count` ascending bars: close 1.0, 2.0, .. and volume 100, 200, ..
pub fn bars(count: usize) -> Vec<DailyBar> {
    (1..=count)
        .map(|i| DailyBar::new(i as f64, (i * 100) as f64))
        .collect()
}

/// CSV with `Ticker,Name` rows cycling through `tickers`.
pub fn market_csv(rows: usize, tickers: &[&str]) -> Vec<u8> {
    let mut body = String::from("Ticker,Name\n");
    for i in 0..rows {
        let ticker = tickers[i % tickers.len()];
        body.push_str(&format!("{ticker},Company {i}\n"));
    }
    body.into_bytes()
}

pub struct Pipeline {
    pub config: PipelineConfig,
    pub store: Arc<InMemoryObjectStore>,
    pub messaging: Arc<InMemoryMessagingService>,
    pub counters: Arc<InMemoryCounterStore>,
    pub tracker: ProgressTracker,
    pub market: Arc<StaticMarketData>,
}

impl Pipeline {
    pub async fn new(market: StaticMarketData) -> Self {
        Self::with_config(PipelineConfig::default(), market).await
    }

    pub async fn with_config(config: PipelineConfig, market: StaticMarketData) -> Self {
        let messaging = Arc::new(InMemoryMessagingService::new());
        messaging
            .ensure_queue(&config.splitter.chunk_queue)
            .await
            .expect("chunk queue");
        let counters = Arc::new(InMemoryCounterStore::new());
        let tracker = ProgressTracker::new(counters.clone(), config.progress.ttl());
        Self {
            config,
            store: Arc::new(InMemoryObjectStore::new()),
            messaging,
            counters,
            tracker,
            market: Arc::new(market),
        }
    }

    pub async fn stage_source(&self, body: Vec<u8>) {
        self.store
            .put(&self.config.storage.source_bucket, SOURCE_KEY, body)
            .await
            .expect("stage source");
    }

    pub fn splitter(&self) -> JobSplitter<InMemoryMessagingService> {
        JobSplitter::new(
            self.store.clone(),
            self.messaging.clone(),
            self.tracker.clone(),
            &self.config,
        )
    }

    pub fn worker(&self) -> Worker {
        let engine = EnrichmentEngine::new(
            self.market.clone(),
            self.market.clone(),
            self.market.clone(),
            unreachable_averager(),
            &self.config.market_data,
        );
        let sink = DurableStorageSink::new(self.store.clone(), self.tracker.clone(), &self.config.storage);
        Worker::new(Arc::new(engine), Arc::new(sink))
    }

    pub fn consumer(&self, id: &str) -> WorkerConsumer<InMemoryMessagingService> {
        WorkerConsumer::new(
            id,
            self.worker(),
            self.messaging.clone(),
            self.config.splitter.chunk_queue.clone(),
            &self.config.worker,
        )
    }

    pub fn handler(&self) -> CompletionHandler {
        CompletionHandler::new(self.store.clone(), &self.config.storage)
    }

    pub fn observer(&self) -> CompletionObserver {
        CompletionObserver::new(self.tracker.clone(), self.handler())
            .with_poll_interval(Duration::from_millis(10))
    }
}
