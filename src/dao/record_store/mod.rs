/// MongoDB-backed record store.
#[cfg(feature = "mongo-store")]
pub mod mongodb;
pub mod memory;

use std::time::Duration;

use futures::future::BoxFuture;

use crate::dao::storage::StorageResult;

pub use memory::MemoryRecordStore;

/// Key-value store with per-key time-to-live and single-key conditional writes.
///
/// No operation spans more than one key; every multi-record invariant is built
/// on top of [`RecordStore::set_if_absent`] and [`RecordStore::compare_and_set`].
pub trait RecordStore: Send + Sync {
    /// Fetch the live value stored under `key`.
    fn get(&self, key: &str) -> BoxFuture<'static, StorageResult<Option<String>>>;
    /// Overwrite `key` unconditionally and refresh its time-to-live.
    fn set(&self, key: &str, value: String, ttl: Duration) -> BoxFuture<'static, StorageResult<()>>;
    /// Create `key` only when no live value exists. Returns `false` when the key is taken.
    fn set_if_absent(
        &self,
        key: &str,
        value: String,
        ttl: Duration,
    ) -> BoxFuture<'static, StorageResult<bool>>;
    /// Replace `key` only when its live value equals `expected`.
    fn compare_and_set(
        &self,
        key: &str,
        expected: String,
        value: String,
        ttl: Duration,
    ) -> BoxFuture<'static, StorageResult<bool>>;
    /// Remove `key`; removing a missing key is not an error.
    fn delete(&self, key: &str) -> BoxFuture<'static, StorageResult<()>>;
    /// Remove `key` only when its live value equals `expected`.
    fn delete_if_equals(&self, key: &str, expected: String)
    -> BoxFuture<'static, StorageResult<bool>>;
    /// Snapshot of every live key starting with `prefix`.
    fn scan_keys(&self, prefix: &str) -> BoxFuture<'static, StorageResult<Vec<String>>>;
    /// Round trip to the backend.
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
    /// Re-establish the backend connection after a failed health check.
    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>>;
}
