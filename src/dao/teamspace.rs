use std::{sync::Arc, time::Duration};

use futures::future::join_all;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::dao::{
    models::TeamspaceEntity,
    record_store::RecordStore,
    storage::{StorageError, StorageResult},
};

const TEAMSPACE_KEY_PREFIX: &str = "teamspace:";

/// A teamspace together with the exact serialized record it was decoded from.
///
/// The raw payload is the expectation handed to [`RecordStore::compare_and_set`].
#[derive(Debug, Clone)]
pub struct StoredTeamspace {
    /// Decoded teamspace.
    pub entity: TeamspaceEntity,
    raw: String,
}

/// Typed access to teamspace records.
#[derive(Clone)]
pub struct TeamspaceRepository {
    store: Arc<dyn RecordStore>,
    ttl: Duration,
}

impl TeamspaceRepository {
    /// Repository writing records with the given time-to-live.
    pub fn new(store: Arc<dyn RecordStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// Overwrite the full record and refresh its time-to-live.
    pub async fn save(&self, teamspace: &TeamspaceEntity) -> StorageResult<()> {
        let key = teamspace_key(teamspace.teamspace_id);
        let payload = encode(&key, teamspace)?;
        self.store.set(&key, payload, self.ttl).await?;
        debug!(key = %key, "saved teamspace");
        Ok(())
    }

    /// Persist a brand-new teamspace, refusing to overwrite an existing record.
    pub async fn insert(&self, teamspace: &TeamspaceEntity) -> StorageResult<bool> {
        let key = teamspace_key(teamspace.teamspace_id);
        let payload = encode(&key, teamspace)?;
        self.store.set_if_absent(&key, payload, self.ttl).await
    }

    /// Replace `previous` with `next` unless another writer got there first.
    ///
    /// Returns the committed teamspace with its bumped version, or `None` on a version conflict.
    pub async fn update(
        &self,
        previous: &StoredTeamspace,
        mut next: TeamspaceEntity,
    ) -> StorageResult<Option<TeamspaceEntity>> {
        next.version = previous.entity.version + 1;
        let key = teamspace_key(next.teamspace_id);
        let payload = encode(&key, &next)?;
        let swapped = self
            .store
            .compare_and_set(&key, previous.raw.clone(), payload, self.ttl)
            .await?;
        Ok(swapped.then_some(next))
    }

    /// Fetch a teamspace; undecodable records are reported as absent.
    pub async fn get(&self, id: Uuid) -> StorageResult<Option<TeamspaceEntity>> {
        Ok(self.get_stored(id).await?.map(|stored| stored.entity))
    }

    /// Fetch a teamspace with the raw record needed for a conditional update.
    pub async fn get_stored(&self, id: Uuid) -> StorageResult<Option<StoredTeamspace>> {
        self.load(&teamspace_key(id)).await
    }

    /// Delete `stored` unless the record changed since it was read.
    pub async fn remove(&self, stored: &StoredTeamspace) -> StorageResult<bool> {
        let key = teamspace_key(stored.entity.teamspace_id);
        let removed = self.store.delete_if_equals(&key, stored.raw.clone()).await?;
        debug!(key = %key, removed, "conditional teamspace delete");
        Ok(removed)
    }

    /// Remove a teamspace unconditionally.
    pub async fn delete(&self, id: Uuid) -> StorageResult<()> {
        let key = teamspace_key(id);
        self.store.delete(&key).await?;
        debug!(key = %key, "deleted teamspace");
        Ok(())
    }

    /// Snapshot of every live teamspace. Corrupt records are skipped.
    pub async fn list_all(&self) -> StorageResult<Vec<TeamspaceEntity>> {
        let keys = self.store.scan_keys(TEAMSPACE_KEY_PREFIX).await?;
        let loaded = join_all(keys.iter().map(|key| self.load(key))).await;

        let mut teamspaces = Vec::with_capacity(loaded.len());
        for stored in loaded {
            if let Some(stored) = stored? {
                teamspaces.push(stored.entity);
            }
        }
        Ok(teamspaces)
    }

    async fn load(&self, key: &str) -> StorageResult<Option<StoredTeamspace>> {
        let Some(raw) = self.store.get(key).await? else {
            return Ok(None);
        };

        match serde_json::from_str::<TeamspaceEntity>(&raw) {
            Ok(entity) => Ok(Some(StoredTeamspace { entity, raw })),
            Err(err) => {
                warn!(key = %key, error = %err, "failed to parse teamspace record; skipping");
                Ok(None)
            }
        }
    }
}

fn teamspace_key(id: Uuid) -> String {
    format!("{TEAMSPACE_KEY_PREFIX}{id}")
}

fn encode(key: &str, teamspace: &TeamspaceEntity) -> StorageResult<String> {
    serde_json::to_string(teamspace).map_err(|source| StorageError::encode(key, source))
}
