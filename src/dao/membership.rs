//! Reverse index `user -> teamspace` guarding the "one teamspace per user" invariant.
//!
//! A claim is written with a conditional create before a user is added to a teamspace and
//! removed only after the user has left it, so a live claim always covers actual membership.

use std::{sync::Arc, time::Duration};

use tracing::{debug, warn};
use uuid::Uuid;

use crate::dao::{
    models::{MembershipClaim, TeamspaceEntity},
    record_store::RecordStore,
    storage::{StorageError, StorageResult},
    teamspace::TeamspaceRepository,
};

const MEMBER_KEY_PREFIX: &str = "member:";

/// A claim together with the serialized record it was decoded from.
#[derive(Debug, Clone)]
pub struct StoredClaim {
    /// Decoded claim.
    pub claim: MembershipClaim,
    raw: String,
}

/// Resolved view of a user's claim.
#[derive(Debug, Clone)]
pub struct Affiliation {
    /// The user's claim.
    pub claim: StoredClaim,
    /// The claimed teamspace, if it still exists.
    pub teamspace: Option<TeamspaceEntity>,
}

impl Affiliation {
    /// Teamspace the claim points at.
    pub fn teamspace_id(&self) -> Uuid {
        self.claim.claim.teamspace_id
    }

    /// A claim is stale once it is older than `grace` and does not cover an actual membership,
    /// either because its teamspace is gone or because the user never made it into the member
    /// set (an abandoned create or join).
    ///
    /// A younger claim whose teamspace is missing may belong to a create that has not inserted
    /// its record yet, so it is still live.
    pub fn is_stale(&self, user_id: &str, grace: Duration) -> bool {
        if self
            .teamspace
            .as_ref()
            .is_some_and(|teamspace| teamspace.is_member(user_id))
        {
            return false;
        }
        self.claim.is_older_than(grace)
    }
}

impl StoredClaim {
    fn is_older_than(&self, grace: Duration) -> bool {
        self.claim
            .claimed_at
            .elapsed()
            .map(|age| age > grace)
            .unwrap_or(false)
    }
}

/// Reverse index answering which teamspace a user belongs to.
#[derive(Clone)]
pub struct MembershipIndex {
    store: Arc<dyn RecordStore>,
    teamspaces: TeamspaceRepository,
    ttl: Duration,
}

impl MembershipIndex {
    /// Build an index whose claims live for `ttl`.
    pub fn new(store: Arc<dyn RecordStore>, teamspaces: TeamspaceRepository, ttl: Duration) -> Self {
        Self {
            store,
            teamspaces,
            ttl,
        }
    }

    /// Reserve `user_id` for `teamspace_id`. Returns `false` when the user already holds a claim.
    pub async fn claim(&self, user_id: &str, teamspace_id: Uuid) -> StorageResult<bool> {
        let key = member_key(user_id);
        let payload = serde_json::to_string(&MembershipClaim::new(teamspace_id))
            .map_err(|source| StorageError::encode(key.as_str(), source))?;
        let claimed = self.store.set_if_absent(&key, payload, self.ttl).await?;
        debug!(user_id, %teamspace_id, claimed, "membership claim attempted");
        Ok(claimed)
    }

    /// Current claim of `user_id`, if any. Corrupt claims are dropped.
    pub async fn claim_of(&self, user_id: &str) -> StorageResult<Option<StoredClaim>> {
        let key = member_key(user_id);
        let Some(raw) = self.store.get(&key).await? else {
            return Ok(None);
        };

        match serde_json::from_str::<MembershipClaim>(&raw) {
            Ok(claim) => Ok(Some(StoredClaim { claim, raw })),
            Err(err) => {
                warn!(key = %key, error = %err, "failed to parse membership claim; dropping it");
                self.store.delete_if_equals(&key, raw).await?;
                Ok(None)
            }
        }
    }

    /// Resolve the claim of `user_id` to the teamspace it points at.
    pub async fn affiliation(&self, user_id: &str) -> StorageResult<Option<Affiliation>> {
        let Some(claim) = self.claim_of(user_id).await? else {
            return Ok(None);
        };
        let teamspace = self.teamspaces.get(claim.claim.teamspace_id).await?;
        Ok(Some(Affiliation { claim, teamspace }))
    }

    /// Drop the claim of `user_id` if it still points at `teamspace_id`.
    pub async fn release(&self, user_id: &str, teamspace_id: Uuid) -> StorageResult<bool> {
        match self.claim_of(user_id).await? {
            Some(stored) if stored.claim.teamspace_id == teamspace_id => {
                self.release_claim(user_id, &stored).await
            }
            _ => Ok(false),
        }
    }

    /// Drop exactly this claim; a newer claim written since is left untouched.
    pub async fn release_claim(&self, user_id: &str, stored: &StoredClaim) -> StorageResult<bool> {
        let released = self
            .store
            .delete_if_equals(&member_key(user_id), stored.raw.clone())
            .await?;
        debug!(user_id, teamspace_id = %stored.claim.teamspace_id, released, "membership claim released");
        Ok(released)
    }

    /// Teamspace listing `user_id` as a member, organizer included.
    pub async fn find_by_member(&self, user_id: &str) -> StorageResult<Option<TeamspaceEntity>> {
        Ok(self
            .affiliation(user_id)
            .await?
            .and_then(|affiliation| affiliation.teamspace)
            .filter(|teamspace| teamspace.is_member(user_id)))
    }

    /// Extend the lifetime of every member claim that still points at `teamspace`.
    ///
    /// The claim is rewritten with its own value so a claim released concurrently stays gone.
    pub async fn refresh(&self, teamspace: &TeamspaceEntity) -> StorageResult<()> {
        for user_id in &teamspace.members {
            let Some(stored) = self.claim_of(user_id).await? else {
                continue;
            };
            if stored.claim.teamspace_id != teamspace.teamspace_id {
                continue;
            }
            self.store
                .compare_and_set(&member_key(user_id), stored.raw.clone(), stored.raw, self.ttl)
                .await?;
        }
        Ok(())
    }

    /// Teamspace organized by `user_id`.
    pub async fn find_by_organizer(&self, user_id: &str) -> StorageResult<Option<TeamspaceEntity>> {
        Ok(self
            .find_by_member(user_id)
            .await?
            .filter(|teamspace| teamspace.is_organizer(user_id)))
    }
}

fn member_key(user_id: &str) -> String {
    format!("{MEMBER_KEY_PREFIX}{user_id}")
}

#[cfg(test)]
mod tests {
    use std::time::SystemTime;

    use super::*;
    use crate::dao::record_store::MemoryRecordStore;

    const TTL: Duration = Duration::from_secs(60);

    fn index() -> (TeamspaceRepository, MembershipIndex) {
        let store: Arc<dyn RecordStore> = Arc::new(MemoryRecordStore::new());
        let teamspaces = TeamspaceRepository::new(store.clone(), TTL);
        let index = MembershipIndex::new(store, teamspaces.clone(), TTL);
        (teamspaces, index)
    }

    #[tokio::test]
    async fn second_claim_for_same_user_fails() {
        let (_, index) = index();
        assert!(index.claim("alice", Uuid::new_v4()).await.unwrap());
        assert!(!index.claim("alice", Uuid::new_v4()).await.unwrap());
    }

    #[tokio::test]
    async fn release_ignores_claims_for_other_teamspaces() {
        let (_, index) = index();
        let kept = Uuid::new_v4();
        index.claim("alice", kept).await.unwrap();

        assert!(!index.release("alice", Uuid::new_v4()).await.unwrap());
        assert_eq!(
            index.claim_of("alice").await.unwrap().unwrap().claim.teamspace_id,
            kept
        );

        assert!(index.release("alice", kept).await.unwrap());
        assert!(index.claim_of("alice").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn finds_teamspace_by_member_and_organizer() {
        let (teamspaces, index) = index();
        let mut teamspace = TeamspaceEntity::new(Uuid::new_v4(), "alice".into());
        teamspace.members.insert("bob".into());
        teamspaces.save(&teamspace).await.unwrap();
        index.claim("alice", teamspace.teamspace_id).await.unwrap();
        index.claim("bob", teamspace.teamspace_id).await.unwrap();

        assert_eq!(
            index.find_by_member("bob").await.unwrap(),
            Some(teamspace.clone())
        );
        assert_eq!(index.find_by_organizer("bob").await.unwrap(), None);
        assert_eq!(
            index.find_by_organizer("alice").await.unwrap(),
            Some(teamspace)
        );
        assert_eq!(index.find_by_member("carol").await.unwrap(), None);
    }

    fn affiliation_with_age(
        teamspace: Option<TeamspaceEntity>,
        teamspace_id: Uuid,
        age: Duration,
    ) -> Affiliation {
        let claim = MembershipClaim {
            teamspace_id,
            claimed_at: SystemTime::now() - age,
        };
        let raw = serde_json::to_string(&claim).unwrap();
        Affiliation {
            claim: StoredClaim { claim, raw },
            teamspace,
        }
    }

    #[test]
    fn fresh_claim_for_missing_teamspace_is_live() {
        let affiliation = affiliation_with_age(None, Uuid::new_v4(), Duration::ZERO);
        assert!(!affiliation.is_stale("alice", Duration::from_secs(5)));
    }

    #[test]
    fn old_claim_for_missing_teamspace_is_stale() {
        let affiliation = affiliation_with_age(None, Uuid::new_v4(), Duration::from_secs(10));
        assert!(affiliation.is_stale("alice", Duration::from_secs(5)));
    }

    #[test]
    fn old_claim_covering_membership_is_live() {
        let teamspace = TeamspaceEntity::new(Uuid::new_v4(), "alice".into());
        let id = teamspace.teamspace_id;
        let affiliation = affiliation_with_age(Some(teamspace), id, Duration::from_secs(600));
        assert!(!affiliation.is_stale("alice", Duration::from_secs(5)));
    }

    #[tokio::test]
    async fn claim_for_missing_teamspace_resolves_without_record() {
        let (_, index) = index();
        index.claim("alice", Uuid::new_v4()).await.unwrap();

        let affiliation = index.affiliation("alice").await.unwrap().unwrap();
        assert!(affiliation.teamspace.is_none());
        assert!(!affiliation.is_stale("alice", Duration::from_secs(5)));
    }

    #[tokio::test]
    async fn fresh_claim_without_membership_is_not_stale() {
        let (teamspaces, index) = index();
        let teamspace = TeamspaceEntity::new(Uuid::new_v4(), "alice".into());
        teamspaces.save(&teamspace).await.unwrap();
        index.claim("bob", teamspace.teamspace_id).await.unwrap();

        let affiliation = index.affiliation("bob").await.unwrap().unwrap();
        assert!(!affiliation.is_stale("bob", Duration::from_secs(5)));
    }
}
