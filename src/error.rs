use thiserror::Error;

use crate::codec::CodecError;
use crate::config::ConfigurationError;
use crate::messaging::MessagingError;
use crate::orchestration::{CompletionError, SplitError};
use crate::progress::{CounterStoreError, ObserverError, ProgressError};
use crate::storage::StorageError;
use crate::worker::WorkerError;

/// Crate-level error covering every pipeline stage.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Messaging error: {0}")]
    Messaging(#[from] MessagingError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Counter store error: {0}")]
    CounterStore(#[from] CounterStoreError),

    #[error("Progress error: {0}")]
    Progress(#[from] ProgressError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Split error: {0}")]
    Split(#[from] SplitError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    #[error("Completion error: {0}")]
    Completion(#[from] CompletionError),

    #[error("Observer error: {0}")]
    Observer(#[from] ObserverError),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
