//! # Filesystem Object Store
//!
//! Maps `bucket/key` onto `root/bucket/key` on local disk. Used by the local
//! pipeline driver, where the "durable store" is a working directory.

use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::fs;
use tracing::debug;
use uuid::Uuid;

use super::{expiry_timestamp, ObjectInfo, ObjectStore, StorageError};

#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn bucket_dir(&self, bucket: &str) -> Result<PathBuf, StorageError> {
        validate_relative(bucket)?;
        Ok(self.root.join(bucket))
    }

    fn object_path(&self, bucket: &str, key: &str) -> Result<PathBuf, StorageError> {
        validate_relative(key)?;
        Ok(self.bucket_dir(bucket)?.join(key))
    }
}

/// Keys must stay inside their bucket directory.
fn validate_relative(key: &str) -> Result<(), StorageError> {
    if key.is_empty() {
        return Err(StorageError::invalid_key(key, "empty key"));
    }
    let escapes = Path::new(key)
        .components()
        .any(|c| !matches!(c, Component::Normal(_)));
    if escapes {
        return Err(StorageError::invalid_key(
            key,
            "keys must be relative and may not contain '..'",
        ));
    }
    Ok(())
}

fn key_from_path(bucket_dir: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(bucket_dir).ok()?;
    let parts: Vec<&str> = relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => part.to_str(),
            _ => None,
        })
        .collect();
    Some(parts.join("/"))
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn put(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<(), StorageError> {
        let path = self.object_path(bucket, key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::io("put", bucket, key, e))?;
        }
        // Write to a sibling temp file and rename so readers never observe a
        // partially written chunk. Each writer stages under its own name.
        let mut staging = path.clone().into_os_string();
        staging.push(format!(".{}.partial", Uuid::new_v4().simple()));
        let staging = PathBuf::from(staging);
        fs::write(&staging, body)
            .await
            .map_err(|e| StorageError::io("put", bucket, key, e))?;
        if let Err(e) = fs::rename(&staging, &path).await {
            let _ = fs::remove_file(&staging).await;
            return Err(StorageError::io("put", bucket, key, e));
        }
        debug!(bucket = %bucket, key = %key, "💾 Object written");
        Ok(())
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.object_path(bucket, key)?;
        match fs::read(&path).await {
            Ok(body) => Ok(body),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::not_found(bucket, key))
            }
            Err(e) => Err(StorageError::io("get", bucket, key, e)),
        }
    }

    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<ObjectInfo>, StorageError> {
        let bucket_dir = self.bucket_dir(bucket)?;
        let mut pending = vec![bucket_dir.clone()];
        let mut objects = Vec::new();

        while let Some(dir) = pending.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(StorageError::io("list", bucket, prefix, e)),
            };
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| StorageError::io("list", bucket, prefix, e))?
            {
                let path = entry.path();
                let metadata = entry
                    .metadata()
                    .await
                    .map_err(|e| StorageError::io("list", bucket, prefix, e))?;
                if metadata.is_dir() {
                    pending.push(path);
                    continue;
                }
                if path.extension().is_some_and(|ext| ext == "partial") {
                    continue;
                }
                if let Some(key) = key_from_path(&bucket_dir, &path) {
                    if key.starts_with(prefix) {
                        objects.push(ObjectInfo {
                            key,
                            size: metadata.len(),
                        });
                    }
                }
            }
        }

        objects.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(objects)
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<bool, StorageError> {
        let path = self.object_path(bucket, key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::io("delete", bucket, key, e)),
        }
    }

    async fn rename(&self, bucket: &str, from: &str, to: &str) -> Result<(), StorageError> {
        let source = self.object_path(bucket, from)?;
        let target = self.object_path(bucket, to)?;
        if fs::metadata(&source).await.is_err() {
            return Err(StorageError::not_found(bucket, from));
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::io("rename", bucket, to, e))?;
        }
        fs::rename(&source, &target)
            .await
            .map_err(|e| StorageError::io("rename", bucket, from, e))
    }

    async fn signed_url(
        &self,
        bucket: &str,
        key: &str,
        ttl: Duration,
    ) -> Result<String, StorageError> {
        let path = self.object_path(bucket, key)?;
        if fs::metadata(&path).await.is_err() {
            return Err(StorageError::not_found(bucket, key));
        }
        Ok(format!(
            "file://{}?expires={}",
            path.display(),
            expiry_timestamp(ttl)
        ))
    }

    fn provider_name(&self) -> &'static str {
        "filesystem"
    }
}
