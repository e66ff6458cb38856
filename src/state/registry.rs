//! Registry of live observer sessions, grouped by teamspace.
//!
//! The group index and the per-session records live behind a single lock so that a
//! broadcast never sees a session that is half registered or half removed.

use std::collections::{HashMap, HashSet};

use axum::extract::ws::Message;
use thiserror::Error;
use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

/// Identifier of one observer session.
pub type SessionId = Uuid;

#[derive(Clone, Debug)]
/// Handle used to push messages to one connected observer.
pub struct SessionHandle {
    /// Session identifier.
    pub id: SessionId,
    /// Writer queue of the session.
    pub tx: mpsc::UnboundedSender<Message>,
}

impl SessionHandle {
    /// Handle with a fresh session id.
    pub fn new(tx: mpsc::UnboundedSender<Message>) -> Self {
        Self {
            id: Uuid::new_v4(),
            tx,
        }
    }
}

#[derive(Clone, Debug)]
/// Snapshot of a registered session and the identity it observes as.
pub struct Observer {
    /// Session to write to.
    pub session: SessionHandle,
    /// Identity the session observes as.
    pub user_id: String,
}

/// Why a session could not be registered.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// Empty teamspace id.
    #[error("group key must not be empty")]
    MissingGroupKey,
    /// Empty user id.
    #[error("user identity must not be empty")]
    MissingUserId,
}

struct SessionEntry {
    group_key: String,
    user_id: String,
    tx: mpsc::UnboundedSender<Message>,
}

#[derive(Default)]
struct RegistryMaps {
    groups: HashMap<String, HashSet<SessionId>>,
    sessions: HashMap<SessionId, SessionEntry>,
}

impl RegistryMaps {
    fn detach(&mut self, session_id: SessionId) -> Option<SessionEntry> {
        let entry = self.sessions.remove(&session_id)?;
        if let Some(members) = self.groups.get_mut(&entry.group_key) {
            members.remove(&session_id);
            if members.is_empty() {
                self.groups.remove(&entry.group_key);
            }
        }
        Some(entry)
    }
}

/// Observer sessions grouped by teamspace, behind one lock.
#[derive(Default)]
pub struct ConnectionRegistry {
    maps: RwLock<RegistryMaps>,
}

impl ConnectionRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `session` as an observer of `group_key`. A session already registered under
    /// another group is moved.
    pub async fn add_connection(
        &self,
        group_key: &str,
        user_id: &str,
        session: SessionHandle,
    ) -> Result<(), RegistryError> {
        if group_key.trim().is_empty() {
            return Err(RegistryError::MissingGroupKey);
        }
        if user_id.trim().is_empty() {
            return Err(RegistryError::MissingUserId);
        }

        let mut maps = self.maps.write().await;
        maps.detach(session.id);
        maps.groups
            .entry(group_key.to_owned())
            .or_default()
            .insert(session.id);
        maps.sessions.insert(
            session.id,
            SessionEntry {
                group_key: group_key.to_owned(),
                user_id: user_id.to_owned(),
                tx: session.tx,
            },
        );
        Ok(())
    }

    /// Unregister a session, returning the group key and identity it was registered with.
    /// Unknown sessions are ignored.
    pub async fn remove_connection(&self, session_id: SessionId) -> Option<(String, String)> {
        let mut maps = self.maps.write().await;
        maps.detach(session_id)
            .map(|entry| (entry.group_key, entry.user_id))
    }

    /// Snapshot of the sessions currently observing `group_key`.
    pub async fn connections_for(&self, group_key: &str) -> Vec<Observer> {
        let maps = self.maps.read().await;
        let Some(members) = maps.groups.get(group_key) else {
            return Vec::new();
        };

        members
            .iter()
            .filter_map(|id| {
                maps.sessions.get(id).map(|entry| Observer {
                    session: SessionHandle {
                        id: *id,
                        tx: entry.tx.clone(),
                    },
                    user_id: entry.user_id.clone(),
                })
            })
            .collect()
    }

    /// Identity a session observes as, if it is still registered.
    pub async fn user_identity_of(&self, session_id: SessionId) -> Option<String> {
        let maps = self.maps.read().await;
        maps.sessions
            .get(&session_id)
            .map(|entry| entry.user_id.clone())
    }

    /// Number of groups with at least one registered session.
    pub async fn group_count(&self) -> usize {
        self.maps.read().await.groups.len()
    }
}
