use std::{sync::Arc, time::Duration};

use futures::{TryStreamExt, future::BoxFuture};
use mongodb::{
    Client, Collection, Database,
    bson::{Document, doc},
    error::{Error as MongoError, ErrorKind, WriteFailure},
    options::IndexOptions,
};
use tokio::sync::RwLock;

use super::{
    config::MongoConfig,
    connection::establish_connection,
    error::{MongoDaoError, MongoResult},
    models::{RecordDocument, expired_only, expiry_after, live_only},
};
use crate::dao::{record_store::RecordStore, storage::StorageResult};

const RECORD_COLLECTION_NAME: &str = "records";
const DUPLICATE_KEY_CODE: i32 = 11000;

/// [`RecordStore`] keeping one document per key in a TTL-indexed collection.
#[derive(Clone)]
pub struct MongoRecordStore {
    inner: Arc<MongoInner>,
}

struct MongoInner {
    state: RwLock<MongoState>,
    config: MongoConfig,
}

struct MongoState {
    client: Client,
    database: Database,
}

impl MongoInner {
    async fn database(&self) -> Database {
        let guard = self.state.read().await;
        guard.database.clone()
    }

    async fn records(&self) -> Collection<RecordDocument> {
        self.database()
            .await
            .collection::<RecordDocument>(RECORD_COLLECTION_NAME)
    }

    async fn ping(&self) -> MongoResult<()> {
        self.database()
            .await
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|source| MongoDaoError::HealthPing { source })?;
        Ok(())
    }

    async fn reconnect(&self) -> MongoResult<()> {
        let (client, database) =
            establish_connection(&self.config.options, &self.config.database_name).await?;
        let mut guard = self.state.write().await;
        guard.client = client;
        guard.database = database;
        Ok(())
    }

    async fn get(&self, key: String) -> MongoResult<Option<String>> {
        self.records()
            .await
            .find_one(doc! { "_id": key.as_str(), "expires_at": live_only() })
            .await
            .map(|found| found.map(|record| record.value))
            .map_err(|source| MongoDaoError::ReadRecord { key, source })
    }

    async fn set(&self, key: String, value: String, ttl: Duration) -> MongoResult<()> {
        let record = RecordDocument::new(key.clone(), value, ttl);
        self.records()
            .await
            .replace_one(doc! { "_id": key.as_str() }, &record)
            .upsert(true)
            .await
            .map_err(|source| MongoDaoError::WriteRecord { key, source })?;
        Ok(())
    }

    /// Upsert restricted to expired documents: a live document makes the upsert collide on `_id`.
    async fn set_if_absent(&self, key: String, value: String, ttl: Duration) -> MongoResult<bool> {
        let result = self
            .records()
            .await
            .update_one(
                doc! { "_id": key.as_str(), "expires_at": expired_only() },
                doc! { "$set": { "value": value, "expires_at": expiry_after(ttl) } },
            )
            .upsert(true)
            .await;

        match result {
            Ok(_) => Ok(true),
            Err(err) if is_duplicate_key(&err) => Ok(false),
            Err(source) => Err(MongoDaoError::WriteRecord { key, source }),
        }
    }

    async fn compare_and_set(
        &self,
        key: String,
        expected: String,
        value: String,
        ttl: Duration,
    ) -> MongoResult<bool> {
        let result = self
            .records()
            .await
            .update_one(
                doc! { "_id": key.as_str(), "value": expected, "expires_at": live_only() },
                doc! { "$set": { "value": value, "expires_at": expiry_after(ttl) } },
            )
            .await
            .map_err(|source| MongoDaoError::WriteRecord { key, source })?;
        Ok(result.matched_count == 1)
    }

    async fn delete(&self, key: String, expected: Option<String>) -> MongoResult<bool> {
        let mut filter = doc! { "_id": key.as_str() };
        if let Some(expected) = expected {
            filter.insert("value", expected);
            filter.insert("expires_at", live_only());
        }

        let result = self
            .records()
            .await
            .delete_one(filter)
            .await
            .map_err(|source| MongoDaoError::DeleteRecord { key, source })?;
        Ok(result.deleted_count == 1)
    }

    /// Key range scan on `_id`, which stays on the primary index.
    async fn scan_keys(&self, prefix: String) -> MongoResult<Vec<String>> {
        let collection = self
            .database()
            .await
            .collection::<Document>(RECORD_COLLECTION_NAME);
        let upper_bound = format!("{prefix}\u{10FFFF}");

        let cursor = collection
            .find(doc! {
                "_id": { "$gte": prefix.as_str(), "$lt": upper_bound },
                "expires_at": live_only(),
            })
            .projection(doc! { "_id": 1 })
            .await
            .map_err(|source| MongoDaoError::ScanRecords {
                prefix: prefix.clone(),
                source,
            })?;

        let documents: Vec<Document> =
            cursor
                .try_collect()
                .await
                .map_err(|source| MongoDaoError::ScanRecords {
                    prefix: prefix.clone(),
                    source,
                })?;

        Ok(documents
            .iter()
            .filter_map(|document| document.get_str("_id").ok().map(str::to_owned))
            .collect())
    }
}

impl MongoRecordStore {
    /// Establish a connection to MongoDB and ensure the TTL index is present.
    pub async fn connect(config: MongoConfig) -> MongoResult<Self> {
        let (client, database) =
            establish_connection(&config.options, &config.database_name).await?;

        let inner = Arc::new(MongoInner {
            state: RwLock::new(MongoState { client, database }),
            config,
        });

        let store = Self { inner };
        store.ensure_indexes().await?;
        Ok(store)
    }

    async fn ensure_indexes(&self) -> MongoResult<()> {
        let collection = self.inner.records().await;
        let index = mongodb::IndexModel::builder()
            .keys(doc! { "expires_at": 1 })
            .options(
                IndexOptions::builder()
                    .name(Some("record_expiry_idx".to_owned()))
                    .expire_after(Some(Duration::ZERO))
                    .build(),
            )
            .build();

        collection
            .create_index(index)
            .await
            .map_err(|source| MongoDaoError::EnsureIndex {
                collection: RECORD_COLLECTION_NAME,
                index: "expires_at",
                source,
            })?;

        Ok(())
    }
}

impl RecordStore for MongoRecordStore {
    fn get(&self, key: &str) -> BoxFuture<'static, StorageResult<Option<String>>> {
        let inner = self.inner.clone();
        let key = key.to_owned();
        Box::pin(async move { Ok(inner.get(key).await?) })
    }

    fn set(&self, key: &str, value: String, ttl: Duration) -> BoxFuture<'static, StorageResult<()>> {
        let inner = self.inner.clone();
        let key = key.to_owned();
        Box::pin(async move { Ok(inner.set(key, value, ttl).await?) })
    }

    fn set_if_absent(
        &self,
        key: &str,
        value: String,
        ttl: Duration,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let inner = self.inner.clone();
        let key = key.to_owned();
        Box::pin(async move { Ok(inner.set_if_absent(key, value, ttl).await?) })
    }

    fn compare_and_set(
        &self,
        key: &str,
        expected: String,
        value: String,
        ttl: Duration,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let inner = self.inner.clone();
        let key = key.to_owned();
        Box::pin(async move { Ok(inner.compare_and_set(key, expected, value, ttl).await?) })
    }

    fn delete(&self, key: &str) -> BoxFuture<'static, StorageResult<()>> {
        let inner = self.inner.clone();
        let key = key.to_owned();
        Box::pin(async move {
            inner.delete(key, None).await?;
            Ok(())
        })
    }

    fn delete_if_equals(
        &self,
        key: &str,
        expected: String,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let inner = self.inner.clone();
        let key = key.to_owned();
        Box::pin(async move { Ok(inner.delete(key, Some(expected)).await?) })
    }

    fn scan_keys(&self, prefix: &str) -> BoxFuture<'static, StorageResult<Vec<String>>> {
        let inner = self.inner.clone();
        let prefix = prefix.to_owned();
        Box::pin(async move { Ok(inner.scan_keys(prefix).await?) })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let inner = self.inner.clone();
        Box::pin(async move { Ok(inner.ping().await?) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let inner = self.inner.clone();
        Box::pin(async move { Ok(inner.reconnect().await?) })
    }
}

fn is_duplicate_key(err: &MongoError) -> bool {
    match err.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(write_error)) => {
            write_error.code == DUPLICATE_KEY_CODE
        }
        ErrorKind::Command(command_error) => command_error.code == DUPLICATE_KEY_CODE,
        _ => false,
    }
}
