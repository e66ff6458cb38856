//! In-process [`RecordStore`] backed by a [`DashMap`], used for tests and single-node runs.

use std::{sync::Arc, time::Duration};

use dashmap::{DashMap, mapref::entry::Entry};
use futures::future::BoxFuture;
use tokio::time::Instant;

use super::RecordStore;
use crate::dao::storage::StorageResult;

#[derive(Debug, Clone)]
struct StoredValue {
    value: String,
    expires_at: Instant,
}

impl StoredValue {
    fn new(value: String, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: Instant::now() + ttl,
        }
    }

    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

/// Record store keeping every entry in memory; conditional writes are atomic per key
/// through the [`DashMap`] entry API.
#[derive(Clone, Default)]
pub struct MemoryRecordStore {
    entries: Arc<DashMap<String, StoredValue>>,
}

impl MemoryRecordStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        match self.entries.entry(key.to_owned()) {
            Entry::Occupied(entry) if entry.get().is_live(now) => Some(entry.get().value.clone()),
            Entry::Occupied(entry) => {
                entry.remove();
                None
            }
            Entry::Vacant(_) => None,
        }
    }

    fn insert_if_absent(&self, key: &str, value: String, ttl: Duration) -> bool {
        let now = Instant::now();
        match self.entries.entry(key.to_owned()) {
            Entry::Occupied(entry) if entry.get().is_live(now) => false,
            Entry::Occupied(mut entry) => {
                entry.insert(StoredValue::new(value, ttl));
                true
            }
            Entry::Vacant(entry) => {
                entry.insert(StoredValue::new(value, ttl));
                true
            }
        }
    }

    fn replace_if(&self, key: &str, expected: &str, value: String, ttl: Duration) -> bool {
        let now = Instant::now();
        match self.entries.entry(key.to_owned()) {
            Entry::Occupied(mut entry)
                if entry.get().is_live(now) && entry.get().value == expected =>
            {
                entry.insert(StoredValue::new(value, ttl));
                true
            }
            _ => false,
        }
    }

    fn remove_if(&self, key: &str, expected: &str) -> bool {
        let now = Instant::now();
        self.entries
            .remove_if(key, |_, stored| {
                stored.is_live(now) && stored.value == expected
            })
            .is_some()
    }

    fn live_keys(&self, prefix: &str) -> Vec<String> {
        let now = Instant::now();
        self.entries.retain(|_, stored| stored.is_live(now));
        self.entries
            .iter()
            .filter(|entry| entry.key().starts_with(prefix))
            .map(|entry| entry.key().clone())
            .collect()
    }
}

impl RecordStore for MemoryRecordStore {
    fn get(&self, key: &str) -> BoxFuture<'static, StorageResult<Option<String>>> {
        let value = self.read(key);
        Box::pin(async move { Ok(value) })
    }

    fn set(&self, key: &str, value: String, ttl: Duration) -> BoxFuture<'static, StorageResult<()>> {
        self.entries
            .insert(key.to_owned(), StoredValue::new(value, ttl));
        Box::pin(async { Ok(()) })
    }

    fn set_if_absent(
        &self,
        key: &str,
        value: String,
        ttl: Duration,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let inserted = self.insert_if_absent(key, value, ttl);
        Box::pin(async move { Ok(inserted) })
    }

    fn compare_and_set(
        &self,
        key: &str,
        expected: String,
        value: String,
        ttl: Duration,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let replaced = self.replace_if(key, &expected, value, ttl);
        Box::pin(async move { Ok(replaced) })
    }

    fn delete(&self, key: &str) -> BoxFuture<'static, StorageResult<()>> {
        self.entries.remove(key);
        Box::pin(async { Ok(()) })
    }

    fn delete_if_equals(
        &self,
        key: &str,
        expected: String,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let removed = self.remove_if(key, &expected);
        Box::pin(async move { Ok(removed) })
    }

    fn scan_keys(&self, prefix: &str) -> BoxFuture<'static, StorageResult<Vec<String>>> {
        let keys = self.live_keys(prefix);
        Box::pin(async move { Ok(keys) })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn set_if_absent_only_succeeds_once() {
        let store = MemoryRecordStore::new();
        assert!(store.set_if_absent("k", "a".into(), TTL).await.unwrap());
        assert!(!store.set_if_absent("k", "b".into(), TTL).await.unwrap());
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("a"));
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entries_are_absent_and_reclaimable() {
        let store = MemoryRecordStore::new();
        store.set("k", "a".into(), TTL).await.unwrap();

        tokio::time::advance(TTL + Duration::from_secs(1)).await;

        assert_eq!(store.get("k").await.unwrap(), None);
        assert!(store.set_if_absent("k", "b".into(), TTL).await.unwrap());
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn compare_and_set_requires_matching_value() {
        let store = MemoryRecordStore::new();
        store.set("k", "v1".into(), TTL).await.unwrap();

        assert!(
            !store
                .compare_and_set("k", "stale".into(), "v2".into(), TTL)
                .await
                .unwrap()
        );
        assert!(
            store
                .compare_and_set("k", "v1".into(), "v2".into(), TTL)
                .await
                .unwrap()
        );
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v2"));
        assert!(
            !store
                .compare_and_set("missing", "v1".into(), "v2".into(), TTL)
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn delete_if_equals_leaves_newer_values() {
        let store = MemoryRecordStore::new();
        store.set("k", "new".into(), TTL).await.unwrap();

        assert!(!store.delete_if_equals("k", "old".into()).await.unwrap());
        assert!(store.delete_if_equals("k", "new".into()).await.unwrap());
        assert_eq!(store.get("k").await.unwrap(), None);

        store.delete("k").await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn scan_keys_filters_prefix_and_expired_entries() {
        let store = MemoryRecordStore::new();
        store.set("teamspace:1", "a".into(), TTL).await.unwrap();
        store
            .set("teamspace:2", "b".into(), Duration::from_secs(1))
            .await
            .unwrap();
        store.set("member:x", "c".into(), TTL).await.unwrap();

        tokio::time::advance(Duration::from_secs(2)).await;

        let keys = store.scan_keys("teamspace:").await.unwrap();
        assert_eq!(keys, vec!["teamspace:1".to_string()]);
    }
}
