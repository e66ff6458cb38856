//! Teamspace and party lifecycle: create, join, leave, start and join a live party.
//!
//! Every mutation follows the same discipline. A user is reserved with a membership claim
//! before being added to a teamspace record, the record itself is only replaced through a
//! version-checked write, and the claim is released once the user is no longer listed.

use std::{collections::BTreeSet, future::Future, time::Duration};

use tokio::time::timeout;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    config::AppConfig,
    dao::{
        membership::MembershipIndex,
        models::TeamspaceEntity,
        teamspace::TeamspaceRepository,
    },
    dto::ws::LobbyEvent,
    error::ServiceError,
    services::{
        audit,
        notification_service::{Audience, Notifier},
    },
};

/// Attempts at a version-checked write before the operation gives up.
const MAX_WRITE_ATTEMPTS: usize = 8;

/// A committed state change and the observers that still have to be told about it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Committed<T> {
    /// Operation result.
    pub value: T,
    /// Identities queued for redelivery because the immediate broadcast missed them.
    pub pending_notifications: Vec<String>,
}

/// Tunables of [`PartyLifecycle`].
#[derive(Debug, Clone)]
pub struct LifecycleSettings {
    /// Budget for a whole operation; also the age after which an unfinished claim is stale.
    pub operation_timeout: Duration,
    /// Surface missed observers as `NOTIFICATION_FAILED` instead of a pending list.
    pub strict_notifications: bool,
}

impl From<&AppConfig> for LifecycleSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            operation_timeout: config.operation_timeout,
            strict_notifications: config.notifications.strict,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    /// Joining a teamspace that has not started its game.
    Lobby,
    /// Joining a teamspace whose party is already live.
    LiveParty,
}

enum Updated {
    Committed(TeamspaceEntity),
    Unchanged(TeamspaceEntity),
}

/// State machine of teamspaces and parties over the record store.
#[derive(Clone)]
pub struct PartyLifecycle {
    teamspaces: TeamspaceRepository,
    membership: MembershipIndex,
    notifier: Notifier,
    settings: LifecycleSettings,
}

impl PartyLifecycle {
    /// Wire the lifecycle to its repositories and notifier.
    pub fn new(
        teamspaces: TeamspaceRepository,
        membership: MembershipIndex,
        notifier: Notifier,
        settings: LifecycleSettings,
    ) -> Self {
        Self {
            teamspaces,
            membership,
            notifier,
            settings,
        }
    }

    /// Create a teamspace organized by `user_id`.
    pub async fn create(&self, user_id: &str) -> Result<Uuid, ServiceError> {
        self.run("create", user_id, None, async {
            let teamspace_id = Uuid::new_v4();
            self.reserve(user_id, teamspace_id).await?;

            let teamspace = TeamspaceEntity::new(teamspace_id, user_id.to_owned());
            match self.teamspaces.insert(&teamspace).await {
                Ok(true) => {
                    info!(user_id, %teamspace_id, "teamspace created");
                    Ok(teamspace_id)
                }
                Ok(false) => {
                    self.release_quietly(user_id, teamspace_id).await;
                    Err(ServiceError::Internal(format!(
                        "teamspace id `{teamspace_id}` already taken"
                    )))
                }
                Err(err) => {
                    self.release_quietly(user_id, teamspace_id).await;
                    Err(err.into())
                }
            }
        })
        .await
    }

    /// Add `user_id` to a teamspace that has not started its game.
    pub async fn join(
        &self,
        user_id: &str,
        teamspace_id: Uuid,
    ) -> Result<Committed<()>, ServiceError> {
        self.run(
            "join",
            user_id,
            Some(teamspace_id),
            self.admit(user_id, teamspace_id, Admission::Lobby),
        )
        .await
    }

    /// Add `user_id` to a teamspace whose party is already live.
    pub async fn join_live_party(
        &self,
        user_id: &str,
        teamspace_id: Uuid,
    ) -> Result<Committed<()>, ServiceError> {
        self.run(
            "join_live_party",
            user_id,
            Some(teamspace_id),
            self.admit(user_id, teamspace_id, Admission::LiveParty),
        )
        .await
    }

    /// Remove `user_id` from a teamspace. The organizer leaving dissolves the teamspace.
    pub async fn leave(
        &self,
        user_id: &str,
        teamspace_id: Uuid,
    ) -> Result<Committed<()>, ServiceError> {
        self.run("leave", user_id, Some(teamspace_id), async {
            let teamspace = self.existing(teamspace_id).await?;
            if !teamspace.is_member(user_id) {
                return Err(ServiceError::NotAMember);
            }

            if teamspace.is_organizer(user_id) {
                return self.dissolve(teamspace_id).await;
            }

            let outcome = self
                .update_teamspace(teamspace_id, |current| {
                    if !current.is_member(user_id) {
                        return Err(ServiceError::NotAMember);
                    }
                    let mut next = current.clone();
                    next.members.shift_remove(user_id);
                    Ok(Some(next))
                })
                .await?;
            let remaining = match outcome {
                Updated::Committed(teamspace) | Updated::Unchanged(teamspace) => teamspace,
            };
            self.release_quietly(user_id, teamspace_id).await;
            info!(user_id, %teamspace_id, members = remaining.members.len(), "member left teamspace");

            let event = LobbyEvent::MemberList {
                user_ids: remaining.member_ids(),
            };
            self.finish((), teamspace_id, event, Audience::Everyone)
                .await
        })
        .await
    }

    /// Start the game of a teamspace and return its party id.
    ///
    /// Starting an already started teamspace returns the existing id without notifying anyone.
    pub async fn promote(
        &self,
        user_id: &str,
        teamspace_id: Uuid,
    ) -> Result<Committed<Uuid>, ServiceError> {
        self.run("promote", user_id, Some(teamspace_id), async {
            let teamspace = self.existing(teamspace_id).await?;
            if !teamspace.is_organizer(user_id) {
                return Err(ServiceError::NotAuthor);
            }
            self.ensure_organizer_claim(user_id, teamspace_id).await?;

            let outcome = self
                .update_teamspace(teamspace_id, |current| {
                    if !current.is_organizer(user_id) {
                        return Err(ServiceError::NotAuthor);
                    }
                    if current.party_id.is_some() {
                        return Ok(None);
                    }
                    let mut next = current.clone();
                    next.party_id = Some(Uuid::new_v4());
                    Ok(Some(next))
                })
                .await?;

            match outcome {
                Updated::Unchanged(teamspace) => {
                    let party_id = party_id_of(&teamspace)?;
                    debug!(user_id, %teamspace_id, %party_id, "party already started");
                    Ok(Committed {
                        value: party_id,
                        pending_notifications: Vec::new(),
                    })
                }
                Updated::Committed(teamspace) => {
                    let party_id = party_id_of(&teamspace)?;
                    info!(user_id, %teamspace_id, %party_id, "party started");
                    self.finish(
                        party_id,
                        teamspace_id,
                        LobbyEvent::PartyStarted { party_id },
                        Audience::AllExcept(user_id),
                    )
                    .await
                }
            }
        })
        .await
    }

    /// Current members of a teamspace.
    pub async fn list_members(&self, teamspace_id: Uuid) -> Result<Vec<String>, ServiceError> {
        let outcome = match timeout(self.settings.operation_timeout, self.existing(teamspace_id)).await
        {
            Ok(result) => result.map(|teamspace| teamspace.member_ids()),
            Err(_) => Err(ServiceError::Timeout),
        };
        if let Err(err) = &outcome {
            debug!(%teamspace_id, error = %err, "listing members failed");
        }
        outcome
    }

    async fn admit(
        &self,
        user_id: &str,
        teamspace_id: Uuid,
        admission: Admission,
    ) -> Result<Committed<()>, ServiceError> {
        let teamspace = self.existing(teamspace_id).await?;
        if teamspace.is_organizer(user_id) {
            return Err(ServiceError::UserAlreadyInTeam);
        }
        self.check_affiliation(user_id, teamspace_id).await?;
        ensure_admissible(&teamspace, user_id, admission)?;

        self.reserve(user_id, teamspace_id).await?;

        let outcome = self
            .update_teamspace(teamspace_id, |current| {
                ensure_admissible(current, user_id, admission)?;
                let mut next = current.clone();
                next.members.insert(user_id.to_owned());
                Ok(Some(next))
            })
            .await;

        let joined = match outcome {
            Ok(Updated::Committed(teamspace)) | Ok(Updated::Unchanged(teamspace)) => teamspace,
            Err(ServiceError::AlreadyJoined) => return Err(ServiceError::AlreadyJoined),
            Err(err) => {
                self.release_quietly(user_id, teamspace_id).await;
                return Err(err);
            }
        };
        info!(user_id, %teamspace_id, ?admission, members = joined.members.len(), "user joined teamspace");

        let event = LobbyEvent::MemberList {
            user_ids: joined.member_ids(),
        };
        self.finish((), teamspace_id, event, Audience::Everyone)
            .await
    }

    async fn dissolve(&self, teamspace_id: Uuid) -> Result<Committed<()>, ServiceError> {
        let teamspace = self.remove_teamspace(teamspace_id).await?;
        for member in &teamspace.members {
            self.release_quietly(member, teamspace_id).await;
        }
        info!(organizer = %teamspace.organizer, %teamspace_id, "teamspace dissolved");

        let event = LobbyEvent::MemberList {
            user_ids: Vec::new(),
        };
        self.finish((), teamspace_id, event, Audience::Everyone)
            .await
    }

    /// Delete a teamspace record, retried when a concurrent update lands first so the returned
    /// member set is the one that was actually deleted.
    async fn remove_teamspace(&self, teamspace_id: Uuid) -> Result<TeamspaceEntity, ServiceError> {
        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            let Some(stored) = self.teamspaces.get_stored(teamspace_id).await? else {
                return Err(ServiceError::TeamspaceNotFound(teamspace_id));
            };
            if self.teamspaces.remove(&stored).await? {
                return Ok(stored.entity);
            }
            debug!(%teamspace_id, attempt, "teamspace changed before delete; retrying");
        }

        Err(ServiceError::Internal(format!(
            "teamspace `{teamspace_id}` kept changing; gave up deleting after {MAX_WRITE_ATTEMPTS} attempts"
        )))
    }

    async fn existing(&self, teamspace_id: Uuid) -> Result<TeamspaceEntity, ServiceError> {
        self.teamspaces
            .get(teamspace_id)
            .await?
            .ok_or(ServiceError::TeamspaceNotFound(teamspace_id))
    }

    /// Fail when `user_id` is held by a live claim; stale claims are reclaimed on the way.
    async fn check_affiliation(&self, user_id: &str, teamspace_id: Uuid) -> Result<(), ServiceError> {
        let Some(affiliation) = self.membership.affiliation(user_id).await? else {
            return Ok(());
        };

        if affiliation.is_stale(user_id, self.settings.operation_timeout) {
            warn!(
                user_id,
                claimed = %affiliation.teamspace_id(),
                "reclaiming stale membership claim"
            );
            self.membership
                .release_claim(user_id, &affiliation.claim)
                .await?;
            return Ok(());
        }

        if affiliation.teamspace_id() == teamspace_id {
            Err(ServiceError::AlreadyJoined)
        } else {
            Err(ServiceError::UserAlreadyInTeam)
        }
    }

    /// Write the claim reserving `user_id` for `teamspace_id`.
    async fn reserve(&self, user_id: &str, teamspace_id: Uuid) -> Result<(), ServiceError> {
        for _ in 0..MAX_WRITE_ATTEMPTS {
            if self.membership.claim(user_id, teamspace_id).await? {
                return Ok(());
            }
            self.check_affiliation(user_id, teamspace_id).await?;
        }
        Err(ServiceError::Internal(format!(
            "could not reserve `{user_id}` after {MAX_WRITE_ATTEMPTS} attempts"
        )))
    }

    /// The organizer must still hold the claim for the teamspace it is about to start.
    async fn ensure_organizer_claim(
        &self,
        user_id: &str,
        teamspace_id: Uuid,
    ) -> Result<(), ServiceError> {
        match self.membership.claim_of(user_id).await? {
            Some(stored) if stored.claim.teamspace_id == teamspace_id => Ok(()),
            Some(stored) => {
                warn!(
                    user_id,
                    %teamspace_id,
                    claimed = %stored.claim.teamspace_id,
                    "organizer is claimed by another teamspace"
                );
                Err(ServiceError::UserAlreadyInTeam)
            }
            None => {
                if self.membership.claim(user_id, teamspace_id).await? {
                    debug!(user_id, %teamspace_id, "restored expired organizer claim");
                    Ok(())
                } else {
                    Err(ServiceError::UserAlreadyInTeam)
                }
            }
        }
    }

    /// Read-modify-write of one teamspace record, retried on version conflicts.
    ///
    /// `edit` returns `Ok(None)` when the current record needs no change.
    async fn update_teamspace<F>(
        &self,
        teamspace_id: Uuid,
        mut edit: F,
    ) -> Result<Updated, ServiceError>
    where
        F: FnMut(&TeamspaceEntity) -> Result<Option<TeamspaceEntity>, ServiceError>,
    {
        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            let Some(stored) = self.teamspaces.get_stored(teamspace_id).await? else {
                return Err(ServiceError::TeamspaceNotFound(teamspace_id));
            };
            let Some(next) = edit(&stored.entity)? else {
                return Ok(Updated::Unchanged(stored.entity));
            };

            if let Some(committed) = self.teamspaces.update(&stored, next).await? {
                if let Err(err) = self.membership.refresh(&committed).await {
                    warn!(%teamspace_id, error = %err, "failed to refresh membership claims");
                }
                return Ok(Updated::Committed(committed));
            }
            debug!(%teamspace_id, attempt, "teamspace changed concurrently; retrying");
        }

        Err(ServiceError::Internal(format!(
            "teamspace `{teamspace_id}` kept changing; gave up after {MAX_WRITE_ATTEMPTS} attempts"
        )))
    }

    async fn release_quietly(&self, user_id: &str, teamspace_id: Uuid) {
        if let Err(err) = self.membership.release(user_id, teamspace_id).await {
            warn!(user_id, %teamspace_id, error = %err, "failed to release membership claim");
        }
    }

    /// Notify observers of a committed change.
    async fn finish<T>(
        &self,
        value: T,
        teamspace_id: Uuid,
        event: LobbyEvent,
        audience: Audience<'_>,
    ) -> Result<Committed<T>, ServiceError> {
        let pending: BTreeSet<String> = self
            .notifier
            .publish(&teamspace_id.to_string(), event, audience)
            .await;

        if self.settings.strict_notifications && !pending.is_empty() {
            return Err(ServiceError::NotificationFailed {
                failed: pending.into_iter().collect(),
            });
        }

        Ok(Committed {
            value,
            pending_notifications: pending.into_iter().collect(),
        })
    }

    async fn run<T, Fut>(
        &self,
        operation: &'static str,
        user_id: &str,
        teamspace_id: Option<Uuid>,
        work: Fut,
    ) -> Result<T, ServiceError>
    where
        Fut: Future<Output = Result<T, ServiceError>>,
    {
        let outcome = match timeout(self.settings.operation_timeout, work).await {
            Ok(result) => result,
            Err(_) => Err(ServiceError::Timeout),
        };

        if let Err(
            err @ (ServiceError::Unavailable(_) | ServiceError::Internal(_) | ServiceError::Timeout),
        ) = &outcome
        {
            error!(operation, user_id, error = %err, "lifecycle operation failed");
        }
        audit::record(operation, user_id, teamspace_id, &outcome);
        outcome
    }
}

fn ensure_admissible(
    teamspace: &TeamspaceEntity,
    user_id: &str,
    admission: Admission,
) -> Result<(), ServiceError> {
    if teamspace.is_member(user_id) {
        return Err(ServiceError::AlreadyJoined);
    }
    if teamspace.is_full() {
        return Err(ServiceError::TeamspaceFull);
    }
    if admission == Admission::LiveParty && teamspace.party_id.is_none() {
        return Err(ServiceError::GameNotStarted);
    }
    Ok(())
}

fn party_id_of(teamspace: &TeamspaceEntity) -> Result<Uuid, ServiceError> {
    teamspace.party_id.ok_or_else(|| {
        ServiceError::Internal(format!(
            "teamspace `{}` has no party id after start",
            teamspace.teamspace_id
        ))
    })
}
