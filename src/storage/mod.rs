//! # Durable Storage
//!
//! Object-store abstraction used for source datasets and enriched chunks.
//! Keys are plain strings within a bucket; writes overwrite, which is what
//! keeps duplicate chunk deliveries idempotent.

pub mod fs;
pub mod in_memory;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use fs::FsObjectStore;
pub use in_memory::InMemoryObjectStore;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Object not found: {bucket}/{key}")]
    NotFound { bucket: String, key: String },

    #[error("Invalid object key '{key}': {reason}")]
    InvalidKey { key: String, reason: String },

    #[error("Storage I/O error during {operation} on {bucket}/{key}: {message}")]
    Io {
        operation: String,
        bucket: String,
        key: String,
        message: String,
    },
}

impl StorageError {
    pub fn not_found(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self::NotFound {
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    pub fn invalid_key(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidKey {
            key: key.into(),
            reason: reason.into(),
        }
    }

    pub fn io(
        operation: impl Into<String>,
        bucket: impl Into<String>,
        key: impl Into<String>,
        err: impl std::fmt::Display,
    ) -> Self {
        Self::Io {
            operation: operation.into(),
            bucket: bucket.into(),
            key: key.into(),
            message: err.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectInfo {
    pub key: String,
    pub size: u64,
}

#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// Write an object, replacing any existing content.
    async fn put(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<(), StorageError>;

    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StorageError>;

    /// Objects whose key starts with `prefix`, sorted by key.
    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<ObjectInfo>, StorageError>;

    /// Remove an object. Returns `false` when nothing was there.
    async fn delete(&self, bucket: &str, key: &str) -> Result<bool, StorageError>;

    /// Remove several objects, returning how many existed.
    async fn delete_many(&self, bucket: &str, keys: &[String]) -> Result<usize, StorageError> {
        let mut removed = 0;
        for key in keys {
            if self.delete(bucket, key).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Move an object to a new key within the bucket.
    async fn rename(&self, bucket: &str, from: &str, to: &str) -> Result<(), StorageError>;

    /// Temporary read URL for handing an object to another stage.
    async fn signed_url(&self, bucket: &str, key: &str, ttl: Duration)
        -> Result<String, StorageError>;

    async fn exists(&self, bucket: &str, key: &str) -> Result<bool, StorageError> {
        match self.get(bucket, key).await {
            Ok(_) => Ok(true),
            Err(err) if err.is_not_found() => Ok(false),
            Err(err) => Err(err),
        }
    }

    fn provider_name(&self) -> &'static str;
}

/// Expiry timestamp embedded in signed URLs.
pub(crate) fn expiry_timestamp(ttl: Duration) -> i64 {
    let ttl = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::zero());
    (chrono::Utc::now() + ttl).timestamp()
}
