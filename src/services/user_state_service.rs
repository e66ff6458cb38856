//! Read-only view of where a user currently stands across all teamspaces.

use std::time::Duration;

use tokio::time::timeout;
use tracing::debug;
use uuid::Uuid;

use crate::{
    dao::{models::TeamspaceEntity, teamspace::TeamspaceRepository},
    error::ServiceError,
};

/// Current standing of one user. At most one flag is set; identifiers are empty strings when
/// they do not apply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserState {
    /// Organizer of a teamspace that has not started.
    pub organizing: bool,
    /// Member of someone else's teamspace that has not started.
    pub joining_another: bool,
    /// Member of a teamspace whose party is live.
    pub in_party: bool,
    /// Teamspace behind the organizing or joining state.
    pub teamspace_id: String,
    /// Party behind the playing state.
    pub party_id: String,
}

impl UserState {
    fn organizing(teamspace_id: Uuid) -> Self {
        Self {
            organizing: true,
            teamspace_id: teamspace_id.to_string(),
            ..Self::default()
        }
    }

    fn in_party(party_id: Uuid) -> Self {
        Self {
            in_party: true,
            party_id: party_id.to_string(),
            ..Self::default()
        }
    }

    fn joining(teamspace_id: Uuid) -> Self {
        Self {
            joining_another: true,
            teamspace_id: teamspace_id.to_string(),
            ..Self::default()
        }
    }
}

/// Read-only view of every user's standing across teamspaces.
#[derive(Clone)]
pub struct UserStateAggregator {
    teamspaces: TeamspaceRepository,
    operation_timeout: Duration,
}

impl UserStateAggregator {
    /// Aggregator scanning `teamspaces`, bounded by `operation_timeout`.
    pub fn new(teamspaces: TeamspaceRepository, operation_timeout: Duration) -> Self {
        Self {
            teamspaces,
            operation_timeout,
        }
    }

    /// Scan every live teamspace once and resolve the state of `user_id`.
    pub async fn state_of(&self, user_id: &str) -> Result<UserState, ServiceError> {
        let teamspaces = timeout(self.operation_timeout, self.teamspaces.list_all())
            .await
            .map_err(|_| ServiceError::Timeout)??;
        let state = resolve_state(user_id, &teamspaces);
        debug!(user_id, scanned = teamspaces.len(), ?state, "resolved user state");
        Ok(state)
    }
}

/// Apply the fixed priority: organizing a team that has not started wins outright, then
/// membership in a live party, then plain membership of someone else's team.
pub fn resolve_state<'a, I>(user_id: &str, teamspaces: I) -> UserState
where
    I: IntoIterator<Item = &'a TeamspaceEntity>,
{
    let mut party = None;
    let mut joining = None;

    for teamspace in teamspaces {
        if teamspace.is_organizer(user_id) && teamspace.party_id.is_none() {
            return UserState::organizing(teamspace.teamspace_id);
        }
        if !teamspace.is_member(user_id) {
            continue;
        }
        match teamspace.party_id {
            Some(party_id) => {
                party.get_or_insert(party_id);
            }
            None if !teamspace.is_organizer(user_id) => {
                joining.get_or_insert(teamspace.teamspace_id);
            }
            None => {}
        }
    }

    match (party, joining) {
        (Some(party_id), _) => UserState::in_party(party_id),
        (None, Some(teamspace_id)) => UserState::joining(teamspace_id),
        (None, None) => UserState::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn teamspace(organizer: &str, members: &[&str], started: bool) -> TeamspaceEntity {
        let mut teamspace = TeamspaceEntity::new(Uuid::new_v4(), organizer.into());
        for member in members {
            teamspace.members.insert((*member).into());
        }
        if started {
            teamspace.party_id = Some(Uuid::new_v4());
        }
        teamspace
    }

    #[test]
    fn unaffiliated_user_has_no_state() {
        let teams = [teamspace("alice", &["bob"], false)];
        assert_eq!(resolve_state("carol", &teams), UserState::default());
    }

    #[test]
    fn organizer_without_party_wins_over_live_party_membership() {
        let live = teamspace("zoe", &["alice"], true);
        let organized = teamspace("alice", &[], false);
        let teams = [live, organized.clone()];

        let state = resolve_state("alice", &teams);

        assert!(state.organizing);
        assert!(!state.in_party && !state.joining_another);
        assert_eq!(state.teamspace_id, organized.teamspace_id.to_string());
        assert_eq!(state.party_id, "");
    }

    #[test]
    fn live_party_wins_over_pending_membership() {
        let pending = teamspace("zoe", &["bob"], false);
        let live = teamspace("alice", &["bob"], true);
        let party_id = live.party_id.unwrap();

        let state = resolve_state("bob", &[pending, live]);

        assert_eq!(state, UserState::in_party(party_id));
        assert_eq!(state.teamspace_id, "");
    }

    #[test]
    fn organizer_of_started_party_is_in_party() {
        let live = teamspace("alice", &["bob"], true);
        let party_id = live.party_id.unwrap();

        assert_eq!(resolve_state("alice", &[live]), UserState::in_party(party_id));
    }

    #[test]
    fn member_of_unstarted_team_is_joining() {
        let team = teamspace("alice", &["bob"], false);
        let id = team.teamspace_id;

        let state = resolve_state("bob", &[team]);

        assert!(state.joining_another);
        assert_eq!(state.teamspace_id, id.to_string());
        assert_eq!(state.party_id, "");
    }
}
