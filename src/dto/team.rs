use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

use crate::{
    dto::validation::{validate_teamspace_id, validate_user_id},
    services::{party_service::Committed, user_state_service::UserState},
};

/// Body of `POST /api/organize_team`.
#[derive(Debug, Deserialize, ToSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct OrganizeTeamRequest {
    /// Caller identity; must match the bearer token.
    #[validate(custom(function = "validate_user_id"))]
    pub user_id: String,
}

/// Body shared by every operation that targets one teamspace.
#[derive(Debug, Deserialize, ToSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct TeamspaceRequest {
    /// Caller identity; must match the bearer token.
    #[validate(custom(function = "validate_user_id"))]
    pub user_id: String,
    /// Target teamspace, lowercase UUID.
    #[validate(custom(function = "validate_teamspace_id"))]
    pub teamspace_id: String,
}

impl TeamspaceRequest {
    /// Parsed teamspace identifier; only meaningful after validation.
    pub fn teamspace_uuid(&self) -> Option<Uuid> {
        Uuid::parse_str(&self.teamspace_id).ok()
    }
}

/// Query of `GET /api/check_user_state`.
#[derive(Debug, Deserialize, IntoParams, Validate)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct UserStateQuery {
    /// User to look up; must match the bearer token.
    #[validate(custom(function = "validate_user_id"))]
    pub user_id: String,
}

/// Query of `GET /api/list_joining_party_users`.
#[derive(Debug, Deserialize, IntoParams, Validate)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct MembersQuery {
    /// Teamspace to list, lowercase UUID.
    #[validate(custom(function = "validate_teamspace_id"))]
    pub teamspace_id: String,
    /// Caller identity; must match the bearer token.
    #[validate(custom(function = "validate_user_id"))]
    pub user_id: String,
}

impl MembersQuery {
    /// Parsed teamspace identifier; only meaningful after validation.
    pub fn teamspace_uuid(&self) -> Option<Uuid> {
        Uuid::parse_str(&self.teamspace_id).ok()
    }
}

/// Result of `POST /api/organize_team`.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OrganizeTeamResponse {
    /// Identifier of the new teamspace.
    pub teamspace_id: Uuid,
}

/// Acknowledges a committed membership change.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MembershipChangeResponse {
    /// Observers that missed the live update and will be retried in the background.
    pub pending_notifications: Vec<String>,
}

impl From<Committed<()>> for MembershipChangeResponse {
    fn from(committed: Committed<()>) -> Self {
        Self {
            pending_notifications: committed.pending_notifications,
        }
    }
}

/// Result of `POST /api/start_game`.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StartGameResponse {
    /// Live party identifier.
    pub party_id: Uuid,
    /// Observers that missed the start notification and are queued for redelivery.
    pub pending_notifications: Vec<String>,
}

impl From<Committed<Uuid>> for StartGameResponse {
    fn from(committed: Committed<Uuid>) -> Self {
        Self {
            party_id: committed.value,
            pending_notifications: committed.pending_notifications,
        }
    }
}

/// Where a user currently stands; identifiers are empty strings when not applicable.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UserStateResponse {
    /// Organizer of a teamspace that has not started.
    pub organizing_party: bool,
    /// Member of someone else's teamspace that has not started.
    pub joining_another_party: bool,
    /// Member of a teamspace whose party is live.
    pub now_game_playing: bool,
    /// Teamspace behind the organizing or joining state.
    pub teamspace_id: String,
    /// Party behind the playing state.
    pub party_id: String,
}

impl From<UserState> for UserStateResponse {
    fn from(state: UserState) -> Self {
        Self {
            organizing_party: state.organizing,
            joining_another_party: state.joining_another,
            now_game_playing: state.in_party,
            teamspace_id: state.teamspace_id,
            party_id: state.party_id,
        }
    }
}

/// Result of `GET /api/list_joining_party_users`.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MembersResponse {
    /// Current members, organizer included.
    pub user_ids: Vec<String>,
}

/// Query parameters of the observer WebSocket link.
#[derive(Debug, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct ObserverParams {
    /// Teamspace to observe.
    #[serde(default)]
    pub teamspace_id: String,
    /// Identity of the observer.
    #[serde(default)]
    pub user_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn teamspace_request_rejects_bad_fields() {
        let request: TeamspaceRequest = serde_json::from_value(serde_json::json!({
            "userId": "",
            "teamspaceId": "nope"
        }))
        .unwrap();

        let errors = request.validate().unwrap_err();
        let fields = errors.field_errors();
        assert!(fields.contains_key("user_id"));
        assert!(fields.contains_key("teamspace_id"));
    }

    #[test]
    fn user_state_response_uses_wire_names() {
        let response = UserStateResponse::from(UserState {
            joining_another: true,
            teamspace_id: "t".into(),
            ..UserState::default()
        });

        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            serde_json::json!({
                "organizingParty": false,
                "joiningAnotherParty": true,
                "nowGamePlaying": false,
                "teamspaceId": "t",
                "partyId": ""
            })
        );
    }
}
