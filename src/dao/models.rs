use std::time::SystemTime;

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Upper bound on the number of members of a teamspace, organizer included.
pub const MAX_TEAM_MEMBERS: usize = 4;

/// Pre-game grouping of players persisted by the record store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TeamspaceEntity {
    /// Stable identifier generated at creation.
    pub teamspace_id: Uuid,
    /// User who created the teamspace; never changes.
    pub organizer: String,
    /// Current members in join order. Always contains the organizer.
    pub members: IndexSet<String>,
    /// Creation timestamp.
    pub created_at: SystemTime,
    /// Live party identifier, set once when the organizer starts the game.
    #[serde(default)]
    pub party_id: Option<Uuid>,
    /// Optimistic concurrency stamp, bumped by every conditional update.
    #[serde(default)]
    pub version: u64,
}

impl TeamspaceEntity {
    /// Build a fresh teamspace whose only member is its organizer.
    pub fn new(teamspace_id: Uuid, organizer: String) -> Self {
        let mut members = IndexSet::new();
        members.insert(organizer.clone());
        Self {
            teamspace_id,
            organizer,
            members,
            created_at: SystemTime::now(),
            party_id: None,
            version: 0,
        }
    }

    /// Whether `user_id` is in the member set, organizer included.
    pub fn is_member(&self, user_id: &str) -> bool {
        self.members.contains(user_id)
    }

    /// Whether `user_id` created this teamspace.
    pub fn is_organizer(&self, user_id: &str) -> bool {
        self.organizer == user_id
    }

    /// Whether no further member can join.
    pub fn is_full(&self) -> bool {
        self.members.len() >= MAX_TEAM_MEMBERS
    }

    /// Member identifiers in join order.
    pub fn member_ids(&self) -> Vec<String> {
        self.members.iter().cloned().collect()
    }
}

/// Reverse-index entry reserving a user for exactly one teamspace.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MembershipClaim {
    /// Teamspace the user belongs to, or is in the middle of joining.
    pub teamspace_id: Uuid,
    /// When the claim was written.
    pub claimed_at: SystemTime,
}

impl MembershipClaim {
    /// Claim on `teamspace_id` stamped with the current time.
    pub fn new(teamspace_id: Uuid) -> Self {
        Self {
            teamspace_id,
            claimed_at: SystemTime::now(),
        }
    }
}
