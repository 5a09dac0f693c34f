//! # In-Memory Object Store

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{expiry_timestamp, ObjectInfo, ObjectStore, StorageError};

#[derive(Debug, Default)]
pub struct InMemoryObjectStore {
    objects: RwLock<BTreeMap<(String, String), Vec<u8>>>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn object_count(&self, bucket: &str) -> usize {
        self.objects
            .read()
            .keys()
            .filter(|(b, _)| b == bucket)
            .count()
    }
}

fn entry_key(bucket: &str, key: &str) -> (String, String) {
    (bucket.to_string(), key.to_string())
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn put(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<(), StorageError> {
        if key.is_empty() {
            return Err(StorageError::invalid_key(key, "empty key"));
        }
        self.objects.write().insert(entry_key(bucket, key), body);
        Ok(())
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StorageError> {
        self.objects
            .read()
            .get(&entry_key(bucket, key))
            .cloned()
            .ok_or_else(|| StorageError::not_found(bucket, key))
    }

    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<ObjectInfo>, StorageError> {
        Ok(self
            .objects
            .read()
            .iter()
            .filter(|((b, k), _)| b == bucket && k.starts_with(prefix))
            .map(|((_, key), body)| ObjectInfo {
                key: key.clone(),
                size: body.len() as u64,
            })
            .collect())
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<bool, StorageError> {
        Ok(self.objects.write().remove(&entry_key(bucket, key)).is_some())
    }

    async fn rename(&self, bucket: &str, from: &str, to: &str) -> Result<(), StorageError> {
        let mut objects = self.objects.write();
        let body = objects
            .remove(&entry_key(bucket, from))
            .ok_or_else(|| StorageError::not_found(bucket, from))?;
        objects.insert(entry_key(bucket, to), body);
        Ok(())
    }

    async fn signed_url(
        &self,
        bucket: &str,
        key: &str,
        ttl: Duration,
    ) -> Result<String, StorageError> {
        if !self.objects.read().contains_key(&entry_key(bucket, key)) {
            return Err(StorageError::not_found(bucket, key));
        }
        Ok(format!(
            "memory://{bucket}/{key}?expires={}",
            expiry_timestamp(ttl)
        ))
    }

    fn provider_name(&self) -> &'static str {
        "in_memory"
    }
}
