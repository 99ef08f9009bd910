use serde::{Deserialize, Serialize};

use crate::conversation::ConversationSummary;
use crate::message::PrivateMessage;
use crate::user::UserProfile;

// Chat namespace, client -> server
pub const EVENT_FIND_MATCH: &str = "find_match";
pub const EVENT_MESSAGE: &str = "message";
pub const EVENT_SKIP: &str = "skip";
pub const EVENT_UPGRADE_IDENTITY: &str = "upgrade_identity";
pub const EVENT_SEND_FRIEND_REQUEST: &str = "send_friend_request";
pub const EVENT_ACCEPT_FRIEND_REQUEST: &str = "accept_friend_request";

// Chat namespace, server -> client
pub const EVENT_ONLINE_COUNT: &str = "online_count";
pub const EVENT_MATCHED: &str = "matched";
pub const EVENT_PARTNER_SKIPPED: &str = "partner_skipped";
pub const EVENT_PARTNER_DISCONNECTED: &str = "partner_disconnected";
pub const EVENT_SKIP_COOLDOWN: &str = "skip_cooldown";
pub const EVENT_RATE_LIMITED: &str = "rate_limited";
pub const EVENT_MESSAGE_ERROR: &str = "message_error";
pub const EVENT_SERVER_BUSY: &str = "server_busy";
pub const EVENT_SERVER_ERROR: &str = "server_error";
pub const EVENT_IDENTITY_UPGRADED: &str = "identity_upgraded";
pub const EVENT_FRIEND_ERROR: &str = "friend_error";
pub const EVENT_FRIEND_REQUEST_MESSAGE: &str = "friend_request_message";
pub const EVENT_FRIEND_REQUEST_ACCEPTED: &str = "friend_request_accepted";
pub const EVENT_PRIVATE_CHAT_STARTED: &str = "private_chat_started";

// Private namespace, client -> server
pub const EVENT_OPEN_PRIVATE_CHAT: &str = "open_private_chat";
pub const EVENT_SEND_PRIVATE_MESSAGE: &str = "send_private_message";
pub const EVENT_LOAD_PRIVATE_MESSAGES: &str = "load_private_messages";
pub const EVENT_LIST_PRIVATE_CONVERSATIONS: &str = "list_private_conversations";
pub const EVENT_MARK_READ: &str = "mark_read";
pub const EVENT_DELETE_PRIVATE_CONVERSATION: &str = "delete_private_conversation";
pub const EVENT_TYPING: &str = "typing";
pub const EVENT_STOPPED_TYPING: &str = "stopped_typing";
pub const EVENT_BLOCK_USER: &str = "block_user";
pub const EVENT_UNBLOCK_USER: &str = "unblock_user";
pub const EVENT_LIST_BLOCKED_USERS: &str = "list_blocked_users";

// Private namespace, server -> client
pub const EVENT_PRIVATE_CHAT_OPENED: &str = "private_chat_opened";
pub const EVENT_PRIVATE_MESSAGE: &str = "private_message";
pub const EVENT_PRIVATE_MESSAGES_LOADED: &str = "private_messages_loaded";
pub const EVENT_PRIVATE_CONVERSATIONS_LISTED: &str = "private_conversations_listed";
pub const EVENT_PRIVATE_MESSAGE_READ: &str = "private_message_read";
pub const EVENT_DELETE_PRIVATE_CONVERSATION_SUCCESS: &str = "delete_private_conversation_success";
pub const EVENT_PRIVATE_PRESENCE: &str = "private_presence";
pub const EVENT_PRIVATE_ERROR: &str = "private_error";
pub const EVENT_USER_BLOCKED: &str = "user_blocked";
pub const EVENT_USER_UNBLOCKED: &str = "user_unblocked";
pub const EVENT_BLOCKED_USERS_LISTED: &str = "blocked_users_listed";

/// Every gateway frame, in both directions, is a JSON text message of this
/// shape. `data` is absent for events with no payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayFrame {
    pub event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl GatewayFrame {
    pub fn new(event: &str, data: serde_json::Value) -> Self {
        Self {
            event: event.to_string(),
            data: Some(data),
        }
    }

    pub fn bare(event: &str) -> Self {
        Self {
            event: event.to_string(),
            data: None,
        }
    }
}

// Stable error codes carried by `server_error` / `friend_error` /
// `private_error` payloads.
pub const CODE_BAD_REQUEST: &str = "BAD_REQUEST";
pub const CODE_UNAUTHORIZED: &str = "UNAUTHORIZED";
pub const CODE_FORBIDDEN: &str = "FORBIDDEN";
pub const CODE_NOT_FOUND: &str = "NOT_FOUND";
pub const CODE_CONFLICT: &str = "CONFLICT";
pub const CODE_RATE_LIMITED: &str = "RATE_LIMITED";
pub const CODE_INTERNAL_ERROR: &str = "INTERNAL_ERROR";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SocketErrorPayload {
    pub code: String,
    pub message: String,
    pub status_code: u16,
    pub retryable: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnlineCountPayload {
    pub count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchedPayload {
    pub room_id: String,
}

/// Relayed ephemeral chat message. `sender` is the sending connection id,
/// not a user id: guests have no durable identity to expose.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayedMessagePayload {
    pub sender: String,
    pub message: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkipCooldownPayload {
    pub remaining: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextNoticePayload {
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityUpgradedPayload {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FriendRequestMessagePayload {
    pub request_id: String,
    pub from_username: String,
    pub from: UserProfile,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FriendRequestAcceptedPayload {
    pub request_id: String,
    pub accepted_by: String,
    pub username: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrivateChatStartedPayload {
    pub conversation_id: String,
    pub room_id: String,
    pub messages: Vec<PrivateMessage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrivateChatOpenedPayload {
    pub conversation_id: String,
    pub room_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrivateMessagesLoadedPayload {
    pub conversation_id: String,
    pub messages: Vec<PrivateMessage>,
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrivateConversationsListedPayload {
    pub conversations: Vec<ConversationSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrivateMessageReadPayload {
    pub conversation_id: String,
    pub message_id: String,
    pub reader_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteConversationPayload {
    pub conversation_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingPayload {
    pub conversation_id: String,
    pub user_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrivatePresencePayload {
    pub conversation_id: String,
    pub user_id: String,
    pub is_online: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockedUserEntry {
    pub user_id: String,
    pub username: String,
    pub blocked_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockedUsersListedPayload {
    pub users: Vec<BlockedUserEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserBlockedPayload {
    pub blocked_user_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserUnblockedPayload {
    pub unblocked_user_id: String,
}

// Client request payloads on the private namespace.

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenPrivateChatRequest {
    pub friend_user_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendPrivateMessageRequest {
    pub conversation_id: String,
    pub content: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadPrivateMessagesRequest {
    pub conversation_id: String,
    #[serde(default)]
    pub cursor: Option<String>,
    #[serde(default)]
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListConversationsRequest {
    #[serde(default)]
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkReadRequest {
    pub conversation_id: String,
    pub message_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationRequest {
    pub conversation_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockUserRequest {
    pub user_id: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListBlockedUsersRequest {
    #[serde(default)]
    pub limit: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_round_trip_with_and_without_data() {
        let frame = GatewayFrame::new(EVENT_MATCHED, serde_json::json!({"roomId": "a#b"}));
        let text = serde_json::to_string(&frame).unwrap();
        let parsed: GatewayFrame = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed.event, EVENT_MATCHED);
        assert!(parsed.data.is_some());

        let bare = serde_json::to_string(&GatewayFrame::bare(EVENT_SKIP)).unwrap();
        assert!(!bare.contains("data"));
        let parsed: GatewayFrame = serde_json::from_str(&bare).unwrap();
        assert!(parsed.data.is_none());
    }

    #[test]
    fn error_payload_uses_camel_case_status() {
        let payload = SocketErrorPayload {
            code: CODE_RATE_LIMITED.into(),
            message: "slow down".into(),
            status_code: 429,
            retryable: true,
        };
        let text = serde_json::to_string(&payload).unwrap();
        assert!(text.contains("\"statusCode\":429"));
        assert!(text.contains("\"retryable\":true"));
    }
}
