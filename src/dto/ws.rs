use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
/// Events pushed to teamspace observers over the WebSocket link.
#[serde(tag = "type")]
pub enum LobbyEvent {
    /// Current member list, sent after every membership change.
    #[serde(rename = "memberList", rename_all = "camelCase")]
    MemberList { user_ids: Vec<String> },
    /// The organizer started the game.
    #[serde(rename = "partyId", rename_all = "camelCase")]
    PartyStarted { party_id: Uuid },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn member_list_wire_shape() {
        let event = LobbyEvent::MemberList {
            user_ids: vec!["alice".into(), "bob".into()],
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            serde_json::json!({"type": "memberList", "userIds": ["alice", "bob"]})
        );
    }

    #[test]
    fn party_started_wire_shape() {
        let party_id = Uuid::new_v4();
        let event = LobbyEvent::PartyStarted { party_id };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            serde_json::json!({"type": "partyId", "partyId": party_id.to_string()})
        );
    }
}
