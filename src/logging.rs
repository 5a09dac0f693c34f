//! # Structured Logging Module
//!
//! Environment-aware structured logging for the splitter, the workers and the
//! cleanup path. Console output is plain text or JSON, filtered by the
//! configured level or the environment default.

use std::sync::OnceLock;

use chrono::Utc;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::loader::detect_environment;
use crate::config::LoggingConfig;
use crate::models::JobId;

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging with environment-specific configuration
pub fn init_structured_logging(config: &LoggingConfig) {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = detect_environment();
        let log_level = config
            .level
            .clone()
            .unwrap_or_else(|| get_log_level(&environment).to_string());

        // RUST_LOG wins over the configured level.
        let filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&log_level))
            .unwrap_or_else(|_| EnvFilter::new("info"));

        let console = if config.json {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .json()
                .with_filter(filter)
                .boxed()
        } else {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_ansi(true)
                .with_filter(filter)
                .boxed()
        };

        // A subscriber may already be installed by a test harness or an embedding
        // application; keep it.
        if tracing_subscriber::registry().with(console).try_init().is_err() {
            tracing::debug!("Global tracing subscriber already initialized - continuing with existing subscriber");
        }

        tracing::info!(
            pid = std::process::id(),
            environment = %environment,
            level = %log_level,
            json = config.json,
            "🔧 STRUCTURED LOGGING: Initialized"
        );
    });
}

/// Get log level based on environment
fn get_log_level(environment: &str) -> &'static str {
    match environment {
        "production" => "info",
        _ => "debug",
    }
}

/// Log structured data for job-level operations
pub fn log_job_operation(operation: &str, job_id: &JobId, status: &str, details: Option<&str>) {
    tracing::info!(
        operation = %operation,
        job_id = %job_id,
        status = %status,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "📋 JOB_OPERATION"
    );
}

/// Log structured data for chunk-level operations
pub fn log_chunk_operation(
    operation: &str,
    job_id: &JobId,
    chunk_index: u32,
    records: usize,
    status: &str,
    duration_ms: Option<u64>,
) {
    tracing::info!(
        operation = %operation,
        job_id = %job_id,
        chunk_index = chunk_index,
        records = records,
        status = %status,
        duration_ms = duration_ms,
        timestamp = %Utc::now().to_rfc3339(),
        "🧩 CHUNK_OPERATION"
    );
}

/// Log error with full context
pub fn log_error(component: &str, operation: &str, error: &str, context: Option<&str>) {
    tracing::error!(
        component = %component,
        operation = %operation,
        error = %error,
        context = context,
        timestamp = %Utc::now().to_rfc3339(),
        "❌ ERROR"
    );
}
