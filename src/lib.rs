#![allow(clippy::doc_markdown)] // Allow technical terms like CSV, TTL in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Enrich Core
//!
//! Chunked batch-processing pipeline that enriches market records across
//! queue-driven workers.
//!
//! ## Overview
//!
//! A source dataset is split into fixed-size chunks, each chunk is sent to a
//! queue, and any number of workers enrich the chunks concurrently with
//! currency-converted price history, volume statistics, sector labels and a
//! smoothed average from an external numeric service. Enriched chunks land in
//! durable storage while shared counters track progress; once every chunk is
//! accounted for, a completion signal removes the intermediate artifacts.
//!
//! ## Data Flow
//!
//! ```text
//! dataset -> JobSplitter -> N chunk messages -> Workers (unordered)
//!         -> durable storage + processed counter
//!         -> CompletionObserver (processed == total) -> CompletionHandler
//! ```
//!
//! ## Module Organization
//!
//! - [`models`] - records, chunk messages, job identity
//! - [`codec`] - CSV decoding and encoding
//! - [`messaging`] - queue seam and in-process provider
//! - [`storage`] - object-store seam with in-memory and filesystem providers
//! - [`progress`] - job counters and the completion decision
//! - [`enrichment`] - enrichment engine and its external collaborators
//! - [`worker`] - chunk processing, delivery sinks, queue consumer
//! - [`orchestration`] - splitting, cleanup and trigger adapters
//! - [`config`] - layered configuration
//! - [`logging`] - structured logging setup and helpers
//! - [`error`] - crate-level error type
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use enrich_core::config::PipelineConfig;
//! use enrich_core::messaging::{InMemoryMessagingService, MessagingService};
//! use enrich_core::orchestration::{JobSplitter, SourceLocation};
//! use enrich_core::progress::{InMemoryCounterStore, ProgressTracker};
//! use enrich_core::storage::InMemoryObjectStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = PipelineConfig::default();
//! let messaging = Arc::new(InMemoryMessagingService::new());
//! messaging.ensure_queue(&config.splitter.chunk_queue).await?;
//!
//! let tracker = ProgressTracker::new(Arc::new(InMemoryCounterStore::new()), config.progress.ttl());
//! let splitter = JobSplitter::new(Arc::new(InMemoryObjectStore::new()), messaging, tracker, &config);
//! let report = splitter.split(&SourceLocation::new("market-sources", "market.csv")).await?;
//! println!("job {} split into {} chunks", report.job_id, report.chunks);
//! # Ok(())
//! # }
//! ```
//!
//! ## Testing
//!
//! ```bash
//! cargo test --lib    # Unit tests
//! cargo test          # Unit and integration tests
//! ```

pub mod codec;
pub mod config;
pub mod constants;
pub mod enrichment;
pub mod error;
pub mod logging;
pub mod messaging;
pub mod models;
pub mod orchestration;
pub mod progress;
pub mod storage;
pub mod worker;

pub use config::{ConfigManager, PipelineConfig};
pub use enrichment::{EnrichmentEngine, NumericAverageClient};
pub use error::{PipelineError, Result};
pub use messaging::{InMemoryMessagingService, MessagingService};
pub use models::{ChunkMessage, EnrichedChunk, JobId, JobProgress, Record};
pub use orchestration::{CompletionHandler, CompletionNotice, JobSplitter, SourceLocation};
pub use progress::{CompletionObserver, CounterStore, InMemoryCounterStore, ProgressTracker};
pub use storage::{FsObjectStore, InMemoryObjectStore, ObjectStore};
pub use worker::{Worker, WorkerConsumer};
