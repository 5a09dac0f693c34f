//! # Counter Store
//!
//! Narrow key-value interface for the job counters: atomic increment, get,
//! set, set-if-absent and per-key expiry. This is the only mutable state the
//! workers share, so every mutation goes through one of these atomic calls.
//!
//! A counter may also remember which members it has counted, so that
//! "count this chunk once" is a single store operation (a Redis backend
//! would run it as one script over a set and a counter).

use std::collections::HashSet;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CounterStoreError {
    #[error("Counter store unavailable: {message}")]
    Unavailable { message: String },

    #[error("Counter '{key}' overflowed")]
    Overflow { key: String },
}

#[async_trait]
pub trait CounterStore: Send + Sync + 'static {
    async fn set(&self, key: &str, value: i64, ttl: Option<Duration>)
        -> Result<(), CounterStoreError>;

    /// Create the key only when it is absent. Returns whether it was created.
    async fn set_if_absent(
        &self,
        key: &str,
        value: i64,
        ttl: Option<Duration>,
    ) -> Result<bool, CounterStoreError>;

    /// Atomically add one and return the new value. A missing key starts at
    /// zero and receives `ttl_on_create`.
    async fn increment(
        &self,
        key: &str,
        ttl_on_create: Option<Duration>,
    ) -> Result<i64, CounterStoreError>;

    /// Atomically add one on behalf of `member`, unless that member has
    /// already been counted under this key. Returns the new value, or `None`
    /// for a repeat. A missing key starts at zero and receives
    /// `ttl_on_create`.
    async fn increment_once(
        &self,
        key: &str,
        member: &str,
        ttl_on_create: Option<Duration>,
    ) -> Result<Option<i64>, CounterStoreError>;

    async fn get(&self, key: &str) -> Result<Option<i64>, CounterStoreError>;

    /// Reset a key's expiry. Returns `false` when the key does not exist.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, CounterStoreError>;

    async fn delete(&self, key: &str) -> Result<bool, CounterStoreError>;
}

#[derive(Debug, Clone)]
struct CounterEntry {
    value: i64,
    members: HashSet<String>,
    expires_at: Option<Instant>,
}

impl CounterEntry {
    fn new(value: i64, ttl: Option<Duration>) -> Self {
        Self {
            value,
            members: HashSet::new(),
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        }
    }

    fn bump(&mut self, key: &str) -> Result<i64, CounterStoreError> {
        self.value = self
            .value
            .checked_add(1)
            .ok_or_else(|| CounterStoreError::Overflow {
                key: key.to_string(),
            })?;
        Ok(self.value)
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Process-local counter store with lazy expiry.
///
/// Each operation holds the shard lock for its key for its whole
/// read-modify-write, which is what makes `increment` atomic across tasks.
#[derive(Debug, Default)]
pub struct InMemoryCounterStore {
    entries: DashMap<String, CounterEntry>,
}

impl InMemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every expired key, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl CounterStore for InMemoryCounterStore {
    async fn set(
        &self,
        key: &str,
        value: i64,
        ttl: Option<Duration>,
    ) -> Result<(), CounterStoreError> {
        self.entries
            .insert(key.to_string(), CounterEntry::new(value, ttl));
        Ok(())
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: i64,
        ttl: Option<Duration>,
    ) -> Result<bool, CounterStoreError> {
        let now = Instant::now();
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired(now) {
                    occupied.insert(CounterEntry::new(value, ttl));
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(CounterEntry::new(value, ttl));
                Ok(true)
            }
        }
    }

    async fn increment(
        &self,
        key: &str,
        ttl_on_create: Option<Duration>,
    ) -> Result<i64, CounterStoreError> {
        let now = Instant::now();
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired(now) {
                    occupied.insert(CounterEntry::new(1, ttl_on_create));
                    return Ok(1);
                }
                occupied.get_mut().bump(key)
            }
            Entry::Vacant(vacant) => {
                vacant.insert(CounterEntry::new(1, ttl_on_create));
                Ok(1)
            }
        }
    }

    async fn increment_once(
        &self,
        key: &str,
        member: &str,
        ttl_on_create: Option<Duration>,
    ) -> Result<Option<i64>, CounterStoreError> {
        let now = Instant::now();
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| CounterEntry::new(0, ttl_on_create));
        if entry.is_expired(now) {
            *entry = CounterEntry::new(0, ttl_on_create);
        }
        if entry.members.contains(member) {
            return Ok(None);
        }
        let value = entry.bump(key)?;
        entry.members.insert(member.to_string());
        Ok(Some(value))
    }

    async fn get(&self, key: &str) -> Result<Option<i64>, CounterStoreError> {
        let now = Instant::now();
        Ok(self
            .entries
            .get(key)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.value))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, CounterStoreError> {
        let now = Instant::now();
        match self.entries.get_mut(key) {
            Some(mut entry) if !entry.is_expired(now) => {
                entry.expires_at = Some(now + ttl);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete(&self, key: &str) -> Result<bool, CounterStoreError> {
        Ok(self.entries.remove(key).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_increment_creates_and_counts() {
        let store = InMemoryCounterStore::new();
        assert_eq!(store.increment("k", None).await.unwrap(), 1);
        assert_eq!(store.increment("k", None).await.unwrap(), 2);
        assert_eq!(store.get("k").await.unwrap(), Some(2));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_increments_are_not_lost() {
        let store = Arc::new(InMemoryCounterStore::new());
        let handles: Vec<_> = (0..64)
            .map(|_| {
                let store = Arc::clone(&store);
                tokio::spawn(async move {
                    for _ in 0..10 {
                        store.increment("shared", None).await.unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.get("shared").await.unwrap(), Some(640));
    }

    #[tokio::test]
    async fn test_increment_once_ignores_repeat_members() {
        let store = InMemoryCounterStore::new();
        store.set_if_absent("processed", 0, None).await.unwrap();

        assert_eq!(store.increment_once("processed", "1", None).await.unwrap(), Some(1));
        assert_eq!(store.increment_once("processed", "1", None).await.unwrap(), None);
        assert_eq!(store.increment_once("processed", "2", None).await.unwrap(), Some(2));
        assert_eq!(store.get("processed").await.unwrap(), Some(2));

        // Plain increments share the value but not the membership.
        assert_eq!(store.increment("processed", None).await.unwrap(), 3);
        assert_eq!(store.increment_once("processed", "2", None).await.unwrap(), None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_increment_once_counts_member_once() {
        let store = Arc::new(InMemoryCounterStore::new());
        let handles: Vec<_> = (0..32)
            .map(|i| {
                let store = Arc::clone(&store);
                let member = (i % 4).to_string();
                tokio::spawn(async move { store.increment_once("chunks", &member, None).await.unwrap() })
            })
            .collect();
        let mut counted = 0;
        for handle in handles {
            if handle.await.unwrap().is_some() {
                counted += 1;
            }
        }

        assert_eq!(counted, 4);
        assert_eq!(store.get("chunks").await.unwrap(), Some(4));
    }

    #[tokio::test]
    async fn test_set_if_absent_does_not_reset() {
        let store = InMemoryCounterStore::new();
        store.increment("processed", None).await.unwrap();

        assert!(!store.set_if_absent("processed", 0, None).await.unwrap());
        assert_eq!(store.get("processed").await.unwrap(), Some(1));
        assert!(store.set_if_absent("fresh", 0, None).await.unwrap());
        assert_eq!(store.get("fresh").await.unwrap(), Some(0));
    }

    #[tokio::test]
    async fn test_expired_keys_read_as_missing() {
        let store = InMemoryCounterStore::new();
        store
            .set("short", 5, Some(Duration::from_millis(5)))
            .await
            .unwrap();
        store.set("long", 1, Some(Duration::from_secs(60))).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(store.get("short").await.unwrap(), None);
        assert!(!store.expire("short", Duration::from_secs(60)).await.unwrap());
        assert_eq!(store.purge_expired(), 1);
        assert_eq!(store.len(), 1);

        assert_eq!(
            store
                .increment("short", Some(Duration::from_secs(60)))
                .await
                .unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn test_expire_and_delete() {
        let store = InMemoryCounterStore::new();
        store.set("k", 3, None).await.unwrap();

        assert!(store.expire("k", Duration::from_secs(10)).await.unwrap());
        assert!(store.delete("k").await.unwrap());
        assert!(!store.delete("k").await.unwrap());
        assert!(!store.expire("k", Duration::from_secs(10)).await.unwrap());
    }
}
