//! # Enrich Pipeline
//!
//! Local driver for the enrichment pipeline. Stages a CSV file into the
//! filesystem object store, splits it into a job, runs in-process workers
//! against the in-memory queue and waits for the job to finish.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tokio::sync::broadcast;
use tracing::{info, warn};

use enrich_core::config::{ConfigManager, PipelineConfig};
use enrich_core::enrichment::{
    EnrichmentEngine, ExchangeRateProvider, FloatRatesProvider, MarketHistoryProvider,
    NumericAverageClient, SectorClassifier, StaticMarketData, YahooMarketData,
};
use enrich_core::logging::init_structured_logging;
use enrich_core::messaging::{InMemoryMessagingService, MessagingService};
use enrich_core::orchestration::{CompletionHandler, JobSplitter, SourceLocation};
use enrich_core::progress::{CompletionObserver, InMemoryCounterStore, ProgressTracker};
use enrich_core::storage::{FsObjectStore, ObjectStore};
use enrich_core::worker::{
    ChunkSink, ConsumerStats, DurableStorageSink, IngestionClient, IngestionForwardSink,
    QueueChunkPublisher, Worker, WorkerConsumer,
};

#[derive(Parser)]
#[command(name = "enrich-pipeline")]
#[command(about = "Split, enrich and store a market dataset")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Configuration directory (default: ./config)
    #[arg(short, long)]
    config_dir: Option<PathBuf>,

    /// Environment overriding ENRICH_ENV / APP_ENV detection
    #[arg(short, long)]
    environment: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one dataset through the pipeline
    Run {
        /// CSV file with a Ticker column
        #[arg(short, long)]
        input: PathBuf,

        /// In-process workers (default: worker.concurrency)
        #[arg(short, long)]
        workers: Option<usize>,

        /// Seconds to wait for every chunk
        #[arg(long, default_value_t = 600)]
        timeout_secs: u64,

        /// Skip the market-data HTTP calls
        #[arg(long)]
        offline: bool,

        /// Delete artifacts and the staged source once the job completes
        #[arg(long)]
        cleanup: bool,
    },

    /// Load and validate configuration, then print it
    ValidateConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let manager = match &cli.environment {
        Some(environment) => {
            ConfigManager::load_from_directory_with_env(cli.config_dir.clone(), environment)
        }
        None => ConfigManager::load_from_directory(cli.config_dir.clone()),
    }
    .context("failed to load configuration")?;
    let config = manager.config().clone();
    init_structured_logging(&config.logging);

    match cli.command {
        Commands::ValidateConfig => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            info!(environment = %manager.environment(), "✅ Configuration is valid");
            Ok(())
        }
        Commands::Run {
            input,
            workers,
            timeout_secs,
            offline,
            cleanup,
        } => {
            let workers = workers.unwrap_or(config.worker.concurrency);
            if workers == 0 {
                bail!("at least one worker is required");
            }
            run(
                &config,
                &input,
                workers,
                Duration::from_secs(timeout_secs),
                offline,
                cleanup,
            )
            .await
        }
    }
}

fn build_engine(config: &PipelineConfig, offline: bool) -> anyhow::Result<EnrichmentEngine> {
    let averager = NumericAverageClient::new(&config.numeric_average);
    let history: Arc<dyn MarketHistoryProvider>;
    let sectors: Arc<dyn SectorClassifier>;
    let rates: Arc<dyn ExchangeRateProvider>;
    if offline {
        let data = Arc::new(StaticMarketData::new());
        history = data.clone();
        sectors = data.clone();
        rates = data;
    } else {
        let yahoo = Arc::new(YahooMarketData::new(&config.market_data)?);
        history = yahoo.clone();
        sectors = yahoo;
        rates = Arc::new(FloatRatesProvider::new(&config.market_data)?);
    }
    Ok(EnrichmentEngine::new(
        history,
        sectors,
        rates,
        averager,
        &config.market_data,
    ))
}

async fn run(
    config: &PipelineConfig,
    input: &Path,
    workers: usize,
    deadline: Duration,
    offline: bool,
    cleanup: bool,
) -> anyhow::Result<()> {
    let store: Arc<dyn ObjectStore> = Arc::new(FsObjectStore::new(&config.storage.root_dir));
    let messaging = Arc::new(InMemoryMessagingService::new());
    let tracker = ProgressTracker::new(Arc::new(InMemoryCounterStore::new()), config.progress.ttl());

    let key = input
        .file_name()
        .and_then(|name| name.to_str())
        .context("input path has no file name")?
        .to_string();
    let body = tokio::fs::read(input)
        .await
        .with_context(|| format!("failed to read {}", input.display()))?;
    store
        .put(&config.storage.source_bucket, &key, body)
        .await
        .context("failed to stage input")?;

    messaging.ensure_queue(&config.splitter.chunk_queue).await?;

    let sink: Arc<dyn ChunkSink> = if config.ingestion.enabled {
        Arc::new(IngestionForwardSink::new(IngestionClient::new(&config.ingestion)))
    } else {
        let mut sink = DurableStorageSink::new(store.clone(), tracker.clone(), &config.storage);
        if let Some(queue) = &config.worker.notify_queue {
            messaging.ensure_queue(queue).await?;
            sink = sink.with_publisher(Arc::new(QueueChunkPublisher::new(messaging.clone(), queue.clone())));
        }
        Arc::new(sink)
    };
    let worker = Worker::new(Arc::new(build_engine(config, offline)?), sink);

    let (shutdown_tx, _) = broadcast::channel(1);
    let handles: Vec<_> = (0..workers)
        .map(|i| {
            let consumer = WorkerConsumer::new(
                format!("worker-{i}"),
                worker.clone(),
                messaging.clone(),
                config.splitter.chunk_queue.clone(),
                &config.worker,
            );
            let shutdown_rx = shutdown_tx.subscribe();
            tokio::spawn(async move { consumer.run(shutdown_rx).await })
        })
        .collect();

    let splitter = JobSplitter::new(store.clone(), messaging.clone(), tracker.clone(), config);
    let report = splitter
        .split(&SourceLocation::new(&config.storage.source_bucket, &key))
        .await?;
    println!("{}", serde_json::to_string_pretty(&report)?);

    let handler = CompletionHandler::new(store.clone(), &config.storage);
    let observer = CompletionObserver::new(tracker.clone(), handler).with_poll_interval(config.worker.idle_poll());

    let outcome = if config.ingestion.enabled {
        // Forwarded chunks are not counted; a drained queue is the only signal.
        wait_for_drain(&messaging, &config.splitter.chunk_queue, deadline).await
    } else if cleanup {
        let source_key = report.relocated_to.clone();
        observer
            .observe_and_cleanup(&report.job_id, source_key, deadline)
            .await
            .map(|cleanup| {
                info!(
                    artifacts_deleted = cleanup.artifacts_deleted,
                    source_removed = cleanup.source_removed,
                    "🧹 Cleanup finished"
                );
            })
            .map_err(anyhow::Error::from)
    } else {
        observer
            .wait_for_completion(&report.job_id, deadline)
            .await
            .map(|_| ())
            .map_err(anyhow::Error::from)
    };

    let _ = shutdown_tx.send(());
    let mut totals = ConsumerStats::default();
    for handle in handles {
        match handle.await {
            Ok(stats) => totals.absorb(stats),
            Err(err) => warn!(error = %err, "⚠️ Worker task ended abnormally"),
        }
    }
    println!("{}", serde_json::to_string_pretty(&totals)?);

    outcome
}

async fn wait_for_drain(
    messaging: &InMemoryMessagingService,
    queue: &str,
    deadline: Duration,
) -> anyhow::Result<()> {
    let started = tokio::time::Instant::now();
    loop {
        let stats = messaging.queue_stats(queue).await?;
        if stats.message_count == 0 {
            return Ok(());
        }
        if started.elapsed() >= deadline {
            bail!(
                "queue '{queue}' still holds {} messages after {deadline:?}",
                stats.message_count
            );
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
