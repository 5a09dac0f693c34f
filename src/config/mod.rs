//! # Pipeline Configuration
//!
//! Layered configuration for the splitter, workers, collaborators and
//! cleanup path. Compiled defaults are overridden by TOML files and then by
//! `ENRICH__SECTION__KEY` environment variables; see [`ConfigManager`].
//!
//! ## Usage
//!
//! ```rust,no_run
//! use enrich_core::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let batch_size = manager.config().splitter.batch_size;
//! let queue = &manager.config().splitter.chunk_queue;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::constants::{DEFAULT_BATCH_SIZE, PROGRESS_TTL};

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub splitter: SplitterConfig,
    pub progress: ProgressConfig,
    pub storage: StorageConfig,
    pub numeric_average: NumericAverageConfig,
    pub ingestion: IngestionConfig,
    pub market_data: MarketDataConfig,
    pub worker: WorkerConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SplitterConfig {
    /// Records per chunk
    pub batch_size: usize,
    /// Queue chunk messages are dispatched to
    pub chunk_queue: String,
}

impl Default for SplitterConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            chunk_queue: "enrichment_chunks".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgressConfig {
    pub ttl_seconds: u64,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: PROGRESS_TTL.as_secs(),
        }
    }
}

impl ProgressConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Bucket holding raw datasets and their `inprocessing/` copies
    pub source_bucket: String,
    /// Bucket enriched chunks are written to
    pub artifact_bucket: String,
    pub processed_prefix: String,
    pub inprocessing_prefix: String,
    /// Relocated source removed on cleanup when the notice names none
    pub default_source_key: String,
    pub signed_url_ttl_seconds: u64,
    /// Root directory for the filesystem object store
    pub root_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            source_bucket: "market-sources".to_string(),
            artifact_bucket: "market-artifacts".to_string(),
            processed_prefix: "processed".to_string(),
            inprocessing_prefix: "inprocessing".to_string(),
            default_source_key: "inprocessing/market.csv".to_string(),
            signed_url_ttl_seconds: 60,
            root_dir: "data".to_string(),
        }
    }
}

impl StorageConfig {
    pub fn signed_url_ttl(&self) -> Duration {
        Duration::from_secs(self.signed_url_ttl_seconds)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NumericAverageConfig {
    pub host: String,
    pub port: u16,
    pub timeout_ms: u64,
    pub max_response_bytes: usize,
}

impl Default for NumericAverageConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            timeout_ms: 2_000,
            max_response_bytes: 1024,
        }
    }
}

impl NumericAverageConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestionConfig {
    /// Forward enriched chunks to the ingestion service instead of storage
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub timeout_ms: u64,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: "127.0.0.1".to_string(),
            port: 3003,
            timeout_ms: 2_000,
        }
    }
}

impl IngestionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketDataConfig {
    pub history_url: String,
    pub profile_url: String,
    /// History window requested per chunk, e.g. `1mo`
    pub history_range: String,
    pub history_timeout_ms: u64,
    pub request_timeout_ms: u64,
    pub rate_url: String,
    pub fallback_rate: f64,
    pub target_currency: String,
    /// Concurrent numeric-average requests per chunk
    pub max_concurrency: usize,
}

impl Default for MarketDataConfig {
    fn default() -> Self {
        Self {
            history_url: "https://query1.finance.yahoo.com/v8/finance/chart".to_string(),
            profile_url: "https://query2.finance.yahoo.com/v10/finance/quoteSummary".to_string(),
            history_range: "1mo".to_string(),
            history_timeout_ms: 15_000,
            request_timeout_ms: 5_000,
            rate_url: "http://www.floatrates.com/daily/usd.json".to_string(),
            fallback_rate: 0.95,
            target_currency: "EUR".to_string(),
            max_concurrency: 16,
        }
    }
}

impl MarketDataConfig {
    pub fn history_timeout(&self) -> Duration {
        Duration::from_millis(self.history_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// In-process consumers started by the local driver
    pub concurrency: usize,
    pub visibility_timeout_seconds: u64,
    pub receive_batch_size: usize,
    pub idle_poll_ms: u64,
    /// Queue announcing stored chunks to downstream consumers, if any
    pub notify_queue: Option<String>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            visibility_timeout_seconds: 30,
            receive_batch_size: 1,
            idle_poll_ms: 50,
            notify_queue: Some("chunk_stored".to_string()),
        }
    }
}

impl WorkerConfig {
    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_seconds)
    }

    pub fn idle_poll(&self) -> Duration {
        Duration::from_millis(self.idle_poll_ms)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive; the environment default applies when unset
    pub level: Option<String>,
    pub json: bool,
}

impl PipelineConfig {
    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.splitter.batch_size == 0 {
            return Err(ConfigurationError::invalid_value(
                "splitter.batch_size",
                self.splitter.batch_size,
                "batch size must be at least 1",
            ));
        }
        if self.splitter.chunk_queue.trim().is_empty() {
            return Err(ConfigurationError::invalid_value(
                "splitter.chunk_queue",
                "",
                "queue name must not be empty",
            ));
        }
        if self.progress.ttl_seconds == 0 {
            return Err(ConfigurationError::invalid_value(
                "progress.ttl_seconds",
                0,
                "counters need a positive retention window",
            ));
        }

        for (field, bucket) in [
            ("storage.source_bucket", &self.storage.source_bucket),
            ("storage.artifact_bucket", &self.storage.artifact_bucket),
        ] {
            if bucket.trim().is_empty() {
                return Err(ConfigurationError::invalid_value(
                    field,
                    bucket,
                    "bucket name must not be empty",
                ));
            }
        }

        for (field, port) in [
            ("numeric_average.port", self.numeric_average.port),
            ("ingestion.port", self.ingestion.port),
        ] {
            if port == 0 {
                return Err(ConfigurationError::invalid_value(
                    field,
                    port,
                    "port must be non-zero",
                ));
            }
        }

        if self.numeric_average.max_response_bytes == 0 {
            return Err(ConfigurationError::invalid_value(
                "numeric_average.max_response_bytes",
                0,
                "response buffer must hold at least one byte",
            ));
        }

        let rate = self.market_data.fallback_rate;
        if !rate.is_finite() || rate <= 0.0 {
            return Err(ConfigurationError::invalid_value(
                "market_data.fallback_rate",
                rate,
                "fallback exchange rate must be positive",
            ));
        }
        if self.market_data.max_concurrency == 0 {
            return Err(ConfigurationError::invalid_value(
                "market_data.max_concurrency",
                0,
                "at least one request must be allowed in flight",
            ));
        }

        if self.worker.concurrency == 0 || self.worker.receive_batch_size == 0 {
            return Err(ConfigurationError::invalid_value(
                "worker",
                format!(
                    "concurrency={} receive_batch_size={}",
                    self.worker.concurrency, self.worker.receive_batch_size
                ),
                "workers must run and receive at least one message",
            ));
        }

        Ok(())
    }
}
