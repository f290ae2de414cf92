//! Key-value store contract and the in-memory default.
//!
//! The engine never evicts or expires anything itself: the store owns
//! expiry. Entries are addressed by `(group, key)` so several logical caches
//! can share one backend.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use thiserror::Error;
use tokio::time::Instant;

/// Errors surfaced by a [`KeyValueStore`] or while encoding its values.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cache backend error: {0}")]
    Backend(String),

    #[error("cached value codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

/// A TTL-aware key-value store.
///
/// Implementations must be safe to call from many concurrent requests.
/// A `ttl` of zero means the entry does not expire.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Returns the value stored under `key` in `group`, or `None` on a miss.
    async fn get(&self, key: &str, group: &str) -> Result<Option<Bytes>, StoreError>;

    /// Stores `value` under `key` in `group` for `ttl`.
    async fn set(&self, key: &str, value: Bytes, group: &str, ttl: Duration)
    -> Result<(), StoreError>;

    /// Removes `key` from `group`. Returns `true` if an entry was removed.
    async fn delete(&self, key: &str, group: &str) -> Result<bool, StoreError>;

    /// Removes every entry in every group. Returns `false` if the store was
    /// already empty.
    async fn flush_all(&self) -> Result<bool, StoreError>;
}

#[derive(Debug)]
struct Entry {
    value: Bytes,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// An in-process [`KeyValueStore`] on a sharded concurrent map.
///
/// Expired entries are dropped lazily on read, or eagerly with
/// [`purge_expired`](Self::purge_expired). There is no size bound.
///
/// ```
/// use std::time::Duration;
/// use bytes::Bytes;
/// use restash::cache::store::{KeyValueStore, MemoryStore};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let store = MemoryStore::new();
/// store.set("/posts", Bytes::from_static(b"[]"), "rest_api", Duration::from_secs(60)).await.unwrap();
/// assert_eq!(store.get("/posts", "rest_api").await.unwrap(), Some(Bytes::from_static(b"[]")));
/// assert_eq!(store.get("/posts", "other").await.unwrap(), None);
/// # }
/// ```
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<(String, String), Entry>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before.saturating_sub(self.entries.len())
    }

    fn slot(key: &str, group: &str) -> (String, String) {
        (group.to_owned(), key.to_owned())
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str, group: &str) -> Result<Option<Bytes>, StoreError> {
        let slot = Self::slot(key, group);
        let now = Instant::now();

        let value = match self.entries.get(&slot) {
            Some(entry) if !entry.is_expired(now) => return Ok(Some(entry.value.clone())),
            Some(_) => None,
            None => return Ok(None),
        };

        self.entries.remove_if(&slot, |_, entry| entry.is_expired(now));
        Ok(value)
    }

    async fn set(
        &self,
        key: &str,
        value: Bytes,
        group: &str,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let expires_at = if ttl.is_zero() {
            None
        } else {
            Instant::now().checked_add(ttl)
        };
        self.entries
            .insert(Self::slot(key, group), Entry { value, expires_at });
        Ok(())
    }

    async fn delete(&self, key: &str, group: &str) -> Result<bool, StoreError> {
        Ok(self.entries.remove(&Self::slot(key, group)).is_some())
    }

    async fn flush_all(&self) -> Result<bool, StoreError> {
        let had_entries = !self.entries.is_empty();
        self.entries.clear();
        Ok(had_entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GROUP: &str = "rest_api";

    fn value(s: &'static str) -> Bytes {
        Bytes::from_static(s.as_bytes())
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_ttl() {
        let store = MemoryStore::new();
        store
            .set("/posts", value("a"), GROUP, Duration::from_secs(10))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(9)).await;
        assert_eq!(store.get("/posts", GROUP).await.unwrap(), Some(value("a")));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(store.get("/posts", GROUP).await.unwrap(), None);
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn zero_ttl_never_expires() {
        let store = MemoryStore::new();
        store
            .set("/posts", value("a"), GROUP, Duration::ZERO)
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(365 * 24 * 3600)).await;
        assert!(store.get("/posts", GROUP).await.unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn purge_removes_only_expired() {
        let store = MemoryStore::new();
        store
            .set("/short", value("a"), GROUP, Duration::from_secs(1))
            .await
            .unwrap();
        store
            .set("/long", value("b"), GROUP, Duration::from_secs(100))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(store.purge_expired(), 1);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn groups_are_isolated() {
        let store = MemoryStore::new();
        store
            .set("/posts", value("a"), "public", Duration::ZERO)
            .await
            .unwrap();
        store
            .set("/posts", value("b"), "tenant-7", Duration::ZERO)
            .await
            .unwrap();

        assert!(store.delete("/posts", "public").await.unwrap());
        assert!(!store.delete("/posts", "public").await.unwrap());
        assert_eq!(store.get("/posts", "tenant-7").await.unwrap(), Some(value("b")));
    }

    #[tokio::test]
    async fn flush_reports_whether_anything_was_stored() {
        let store = MemoryStore::new();
        assert!(!store.flush_all().await.unwrap());
        store
            .set("/posts", value("a"), GROUP, Duration::ZERO)
            .await
            .unwrap();
        assert!(store.flush_all().await.unwrap());
        assert_eq!(store.get("/posts", GROUP).await.unwrap(), None);
    }
}
