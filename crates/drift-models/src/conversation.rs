use serde::{Deserialize, Serialize};

use crate::user::UserProfile;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i64)]
pub enum ConversationKind {
    Ephemeral = 0,
    Durable = 1,
}

impl ConversationKind {
    pub fn as_i64(self) -> i64 {
        self as i64
    }

    pub fn from_i64(value: i64) -> Option<Self> {
        match value {
            0 => Some(Self::Ephemeral),
            1 => Some(Self::Durable),
            _ => None,
        }
    }
}

/// Sorted `(low, high)` view of a participant pair.
pub fn ordered_pair(a: i64, b: i64) -> (i64, i64) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// Order-independent key for a participant pair, used for the
/// one-durable-conversation-per-pair and one-pending-request-per-pair
/// uniqueness invariants.
pub fn pair_key(a: i64, b: i64) -> String {
    let (low, high) = ordered_pair(a, b);
    format!("{low}#{high}")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastMessage {
    pub sender_id: String,
    pub content: String,
    pub created_at: i64,
}

/// One entry of `private_conversations_listed`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub conversation_id: String,
    pub participant_user_ids: Vec<String>,
    pub participant_profiles: Vec<UserProfile>,
    pub last_message: Option<LastMessage>,
    pub updated_at: i64,
    pub is_active: bool,
    pub unread_count: i64,
}
