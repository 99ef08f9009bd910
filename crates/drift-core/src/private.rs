use std::collections::HashMap;
use std::sync::Arc;

use drift_db::conversations::ConversationRow;
use drift_db::messages::MessageRow;
use drift_db::DbPool;
use drift_models::conversation::{ConversationKind, ConversationSummary, LastMessage};
use drift_models::gateway::{
    BlockUserRequest, BlockedUserEntry, BlockedUsersListedPayload, ConversationRequest,
    DeleteConversationPayload, ListBlockedUsersRequest, ListConversationsRequest,
    LoadPrivateMessagesRequest, MarkReadRequest, OpenPrivateChatRequest, PrivateChatOpenedPayload,
    PrivateConversationsListedPayload, PrivateMessageReadPayload, PrivateMessagesLoadedPayload,
    SendPrivateMessageRequest, TypingPayload, UserBlockedPayload, UserUnblockedPayload,
    EVENT_BLOCKED_USERS_LISTED, EVENT_DELETE_PRIVATE_CONVERSATION_SUCCESS, EVENT_PRIVATE_CHAT_OPENED,
    EVENT_PRIVATE_CONVERSATIONS_LISTED, EVENT_PRIVATE_MESSAGE, EVENT_PRIVATE_MESSAGES_LOADED,
    EVENT_PRIVATE_MESSAGE_READ, EVENT_STOPPED_TYPING, EVENT_TYPING, EVENT_USER_BLOCKED,
    EVENT_USER_UNBLOCKED,
};
use drift_models::message::PrivateMessage;
use drift_models::user::UserProfile;
use drift_util::pagination::clamp_limit;
use serde_json::json;

use crate::blocks;
use crate::error::CoreError;
use crate::events::EventBus;
use crate::presence::{self, PresenceRegistry};
use crate::{AppConfig, ProfileCache};

pub fn conversation_room_id(conversation_id: i64) -> String {
    format!("conversation:{conversation_id}")
}

/// Convert a newest-first page of rows into display-ordered wire messages
/// with their `readBy` sets attached.
pub(crate) async fn wire_messages(
    db: &DbPool,
    rows: Vec<MessageRow>,
) -> Result<Vec<PrivateMessage>, CoreError> {
    let ids: Vec<i64> = rows.iter().map(|row| row.id).collect();
    let receipts = drift_db::messages::read_receipts_for_messages(db, &ids).await?;
    let mut read_by: HashMap<i64, Vec<String>> = HashMap::new();
    for (message_id, user_id) in receipts {
        read_by
            .entry(message_id)
            .or_default()
            .push(user_id.to_string());
    }
    let mut messages: Vec<PrivateMessage> = rows
        .into_iter()
        .map(|row| PrivateMessage {
            id: row.id.to_string(),
            conversation_id: row.conversation_id.to_string(),
            sender_id: row.sender_id.to_string(),
            content: row.content,
            created_at: row.created_at.timestamp_millis(),
            read_by: read_by.remove(&row.id).unwrap_or_default(),
        })
        .collect();
    messages.reverse();
    Ok(messages)
}

fn parse_id(raw: &str, field: &str) -> Result<i64, CoreError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(CoreError::BadRequest(format!("{field} is required")));
    }
    trimmed
        .parse()
        .map_err(|_| CoreError::BadRequest(format!("Invalid {field}")))
}

/// Serves durable conversations for authenticated connections: open,
/// send, paginated history, listing, receipts, soft/hard delete, typing
/// relay, and derived presence.
pub struct PrivateService {
    db: DbPool,
    event_bus: EventBus,
    presence: Arc<PresenceRegistry>,
    profiles: ProfileCache,
    config: Arc<AppConfig>,
}

impl PrivateService {
    pub fn new(
        db: DbPool,
        event_bus: EventBus,
        presence: Arc<PresenceRegistry>,
        profiles: ProfileCache,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            db,
            event_bus,
            presence,
            profiles,
            config,
        }
    }

    fn emit_to(&self, connection_id: &str, event: &str, payload: serde_json::Value) {
        self.event_bus
            .dispatch_to_connections(event, payload, vec![connection_id.to_string()]);
    }

    /// Membership guard shared by every conversation-scoped operation:
    /// the conversation must exist, be durable, include the caller, not be
    /// hidden from them, and not be blocked with the other participant.
    async fn assert_member(
        &self,
        user_id: i64,
        conversation_id: i64,
    ) -> Result<ConversationRow, CoreError> {
        let conversation = drift_db::conversations::get_conversation(&self.db, conversation_id)
            .await?
            .ok_or_else(|| CoreError::NotFound("Conversation not found".into()))?;
        if conversation.kind() != Some(ConversationKind::Durable) {
            return Err(CoreError::BadRequest("Conversation is not private".into()));
        }
        if !conversation.involves(user_id) {
            return Err(CoreError::Forbidden(
                "Not authorized for this conversation".into(),
            ));
        }
        if drift_db::conversations::is_hidden_for(&self.db, conversation_id, user_id).await? {
            return Err(CoreError::NotFound("Conversation not found".into()));
        }
        if let Some(other) = conversation.other_participant(user_id) {
            blocks::ensure_not_blocked(&self.db, user_id, other, "Conversation").await?;
        }
        Ok(conversation)
    }

    async fn profile(&self, user_id: i64) -> Result<UserProfile, CoreError> {
        if let Some(profile) = self.profiles.get(&user_id) {
            return Ok(profile);
        }
        let profile = match drift_db::users::get_user_by_id(&self.db, user_id).await? {
            Some(user) => UserProfile {
                user_id: user.id.to_string(),
                username: user.username,
                display_name: user.display_name,
                avatar_hash: user.avatar_hash,
            },
            None => UserProfile {
                user_id: user_id.to_string(),
                username: "Unknown".into(),
                display_name: None,
                avatar_hash: None,
            },
        };
        self.profiles.insert(user_id, profile.clone());
        Ok(profile)
    }

    /// Find-or-create the durable conversation with a friend, reactivate
    /// and un-hide it for the caller, and catch up delivery/read receipts
    /// for everything the other side sent while the caller was away.
    pub async fn open_private_chat(
        &self,
        connection_id: &str,
        user_id: i64,
        request: OpenPrivateChatRequest,
    ) -> Result<(), CoreError> {
        let friend_user_id = parse_id(&request.friend_user_id, "friendUserId")?;
        if friend_user_id == user_id {
            return Err(CoreError::BadRequest(
                "Cannot open private chat with yourself".into(),
            ));
        }
        blocks::ensure_not_blocked(&self.db, user_id, friend_user_id, "Private chat").await?;
        if !crate::friends::are_friends(&self.db, user_id, friend_user_id).await? {
            return Err(CoreError::Forbidden(
                "Private chat is allowed only between friends".into(),
            ));
        }

        let new_id = drift_util::snowflake::generate(self.config.worker_id);
        let conversation =
            drift_db::conversations::find_or_create_durable(&self.db, new_id, user_id, friend_user_id)
                .await?;
        drift_db::conversations::unhide_for_user(&self.db, conversation.id, user_id).await?;
        drift_db::messages::mark_conversation_read(&self.db, conversation.id, user_id).await?;

        let outcome = self.presence.join(conversation.id, connection_id, user_id);
        presence::announce_join(&self.event_bus, conversation.id, user_id, &outcome);

        self.emit_to(
            connection_id,
            EVENT_PRIVATE_CHAT_OPENED,
            json!(PrivateChatOpenedPayload {
                conversation_id: conversation.id.to_string(),
                room_id: conversation_room_id(conversation.id),
            }),
        );
        Ok(())
    }

    /// Append a message, refresh the conversation's denormalized last
    /// message, revive it for anyone who hid it, and fan out to the room.
    /// Recipients with a live connection in the room are immediately
    /// marked delivered.
    pub async fn send_private_message(
        &self,
        connection_id: &str,
        user_id: i64,
        request: SendPrivateMessageRequest,
    ) -> Result<(), CoreError> {
        let conversation_id = parse_id(&request.conversation_id, "conversationId")?;
        let content = request.content.trim();
        if content.is_empty() {
            return Err(CoreError::BadRequest("Message content is required".into()));
        }
        if content.chars().count() > self.config.chat.max_message_length {
            return Err(CoreError::BadRequest("Message too long".into()));
        }

        let conversation = self.assert_member(user_id, conversation_id).await?;

        let message_id = drift_util::snowflake::generate(self.config.worker_id);
        let message =
            drift_db::messages::create_message(&self.db, message_id, conversation.id, user_id, content)
                .await?;
        drift_db::conversations::touch_last_message(
            &self.db,
            conversation.id,
            user_id,
            &message.content,
            message.created_at,
        )
        .await?;
        drift_db::conversations::unhide_all(&self.db, conversation.id).await?;

        let outcome = self.presence.join(conversation.id, connection_id, user_id);
        presence::announce_join(&self.event_bus, conversation.id, user_id, &outcome);

        // Everyone else currently in the room has the message on screen;
        // mark it delivered for them right away.
        let members = self.presence.members(conversation.id);
        let mut delivered_to: Vec<i64> = members
            .iter()
            .map(|(_, uid)| *uid)
            .filter(|uid| *uid != user_id)
            .collect();
        delivered_to.sort_unstable();
        delivered_to.dedup();
        for recipient in delivered_to {
            drift_db::messages::mark_delivered(&self.db, message.id, conversation.id, recipient)
                .await?;
        }

        let payload = PrivateMessage {
            id: message.id.to_string(),
            conversation_id: conversation.id.to_string(),
            sender_id: user_id.to_string(),
            content: message.content.clone(),
            created_at: message.created_at.timestamp_millis(),
            read_by: Vec::new(),
        };
        self.event_bus.dispatch_to_connections(
            EVENT_PRIVATE_MESSAGE,
            json!(payload),
            self.presence.connections(conversation.id),
        );
        Ok(())
    }

    /// One page of history strictly older than the cursor, newest page
    /// first but display-ordered within the page. `nextCursor` is the
    /// oldest returned id when the page was full, else null.
    pub async fn load_private_messages(
        &self,
        connection_id: &str,
        user_id: i64,
        request: LoadPrivateMessagesRequest,
    ) -> Result<(), CoreError> {
        let conversation_id = parse_id(&request.conversation_id, "conversationId")?;
        let conversation = self.assert_member(user_id, conversation_id).await?;

        let limit = clamp_limit(request.limit, self.config.chat.history_page_size);
        let cursor = match &request.cursor {
            Some(raw) => Some(parse_id(raw, "cursor")?),
            None => None,
        };

        let page = drift_db::messages::list_page(&self.db, conversation.id, cursor, limit).await?;
        let next_cursor = if page.len() as i64 == limit {
            page.last().map(|oldest| oldest.id.to_string())
        } else {
            None
        };
        let messages = wire_messages(&self.db, page).await?;

        self.emit_to(
            connection_id,
            EVENT_PRIVATE_MESSAGES_LOADED,
            json!(PrivateMessagesLoadedPayload {
                conversation_id: conversation.id.to_string(),
                messages,
                next_cursor,
            }),
        );
        Ok(())
    }

    /// All non-hidden durable conversations for the caller, annotated with
    /// participant profiles, the last message, and the unread count.
    pub async fn list_private_conversations(
        &self,
        connection_id: &str,
        user_id: i64,
        request: ListConversationsRequest,
    ) -> Result<(), CoreError> {
        let limit = clamp_limit(request.limit, self.config.chat.history_page_size);
        let rows = drift_db::conversations::list_durable_for_user(&self.db, user_id, limit).await?;

        let mut conversations = Vec::with_capacity(rows.len());
        for row in rows {
            let mut participant_profiles = Vec::with_capacity(2);
            for participant in row.participants() {
                participant_profiles.push(self.profile(participant).await?);
            }
            let unread_count = drift_db::messages::unread_count(&self.db, row.id, user_id).await?;
            let last_message = match (
                row.last_message_sender_id,
                row.last_message_content.clone(),
                row.last_message_at,
            ) {
                (Some(sender_id), Some(content), Some(at)) => Some(LastMessage {
                    sender_id: sender_id.to_string(),
                    content,
                    created_at: at.timestamp_millis(),
                }),
                _ => None,
            };
            conversations.push(ConversationSummary {
                conversation_id: row.id.to_string(),
                participant_user_ids: row
                    .participants()
                    .iter()
                    .map(|id| id.to_string())
                    .collect(),
                participant_profiles,
                last_message,
                updated_at: row.updated_at.timestamp_millis(),
                is_active: row.is_active,
                unread_count,
            });
        }

        self.emit_to(
            connection_id,
            EVENT_PRIVATE_CONVERSATIONS_LISTED,
            json!(PrivateConversationsListedPayload { conversations }),
        );
        Ok(())
    }

    /// Monotonically add the caller to a message's read/delivered sets and
    /// notify the room.
    pub async fn mark_read(
        &self,
        connection_id: &str,
        user_id: i64,
        request: MarkReadRequest,
    ) -> Result<(), CoreError> {
        let conversation_id = parse_id(&request.conversation_id, "conversationId")?;
        let message_id = parse_id(&request.message_id, "messageId")?;
        let conversation = self.assert_member(user_id, conversation_id).await?;

        if !drift_db::messages::mark_read(&self.db, message_id, conversation.id, user_id).await? {
            return Err(CoreError::NotFound("Message not found".into()));
        }

        let outcome = self.presence.join(conversation.id, connection_id, user_id);
        presence::announce_join(&self.event_bus, conversation.id, user_id, &outcome);

        self.event_bus.dispatch_to_connections(
            EVENT_PRIVATE_MESSAGE_READ,
            json!(PrivateMessageReadPayload {
                conversation_id: conversation.id.to_string(),
                message_id: message_id.to_string(),
                reader_id: user_id.to_string(),
            }),
            self.presence.connections(conversation.id),
        );
        Ok(())
    }

    /// Soft-delete for the caller; hard-delete (messages included) once
    /// every participant has hidden the conversation.
    pub async fn delete_private_conversation(
        &self,
        connection_id: &str,
        user_id: i64,
        request: ConversationRequest,
    ) -> Result<(), CoreError> {
        let conversation_id = parse_id(&request.conversation_id, "conversationId")?;
        let conversation = drift_db::conversations::get_conversation(&self.db, conversation_id)
            .await?
            .ok_or_else(|| CoreError::NotFound("Conversation not found".into()))?;
        if conversation.kind() != Some(ConversationKind::Durable) {
            return Err(CoreError::BadRequest("Conversation is not private".into()));
        }
        if !conversation.involves(user_id) {
            return Err(CoreError::Forbidden(
                "Not authorized for this conversation".into(),
            ));
        }

        if !drift_db::conversations::is_hidden_for(&self.db, conversation.id, user_id).await? {
            drift_db::conversations::hide_for_user(&self.db, conversation.id, user_id).await?;
            let hidden = drift_db::conversations::hidden_user_ids(&self.db, conversation.id).await?;
            let everyone_hid = conversation
                .participants()
                .iter()
                .all(|participant| hidden.contains(participant));
            if everyone_hid {
                drift_db::conversations::delete_conversation(&self.db, conversation.id).await?;
            }
        }

        let payload = json!(DeleteConversationPayload {
            conversation_id: conversation.id.to_string(),
        });
        let mut recipients = self.presence.connections(conversation.id);
        if !recipients.iter().any(|conn| conn == connection_id) {
            recipients.push(connection_id.to_string());
        }
        self.event_bus.dispatch_to_connections(
            EVENT_DELETE_PRIVATE_CONVERSATION_SUCCESS,
            payload,
            recipients,
        );
        Ok(())
    }

    /// Transient typing relay to the other room members; nothing is
    /// persisted and non-members are dropped silently.
    pub async fn typing(
        &self,
        connection_id: &str,
        user_id: i64,
        request: ConversationRequest,
        started: bool,
    ) -> Result<(), CoreError> {
        let conversation_id = parse_id(&request.conversation_id, "conversationId")?;
        if !self.presence.is_member(conversation_id, connection_id) {
            return Ok(());
        }
        let recipients: Vec<String> = self
            .presence
            .connections(conversation_id)
            .into_iter()
            .filter(|conn| conn != connection_id)
            .collect();
        if recipients.is_empty() {
            return Ok(());
        }
        let event = if started { EVENT_TYPING } else { EVENT_STOPPED_TYPING };
        self.event_bus.dispatch_to_connections(
            event,
            json!(TypingPayload {
                conversation_id: conversation_id.to_string(),
                user_id: user_id.to_string(),
            }),
            recipients,
        );
        Ok(())
    }

    pub async fn block_user(
        &self,
        connection_id: &str,
        user_id: i64,
        request: BlockUserRequest,
    ) -> Result<(), CoreError> {
        let blocked_id = parse_id(&request.user_id, "userId")?;
        blocks::block_user(&self.db, user_id, blocked_id).await?;
        self.emit_to(
            connection_id,
            EVENT_USER_BLOCKED,
            json!(UserBlockedPayload {
                blocked_user_id: blocked_id.to_string(),
            }),
        );
        Ok(())
    }

    pub async fn unblock_user(
        &self,
        connection_id: &str,
        user_id: i64,
        request: BlockUserRequest,
    ) -> Result<(), CoreError> {
        let blocked_id = parse_id(&request.user_id, "userId")?;
        blocks::unblock_user(&self.db, user_id, blocked_id).await?;
        self.emit_to(
            connection_id,
            EVENT_USER_UNBLOCKED,
            json!(UserUnblockedPayload {
                unblocked_user_id: blocked_id.to_string(),
            }),
        );
        Ok(())
    }

    pub async fn list_blocked_users(
        &self,
        connection_id: &str,
        user_id: i64,
        request: ListBlockedUsersRequest,
    ) -> Result<(), CoreError> {
        let rows = blocks::list_blocked(&self.db, user_id, request.limit).await?;
        let users = rows
            .into_iter()
            .map(|row| BlockedUserEntry {
                user_id: row.blocked_id.to_string(),
                username: row.username,
                blocked_at: row.created_at.timestamp_millis(),
            })
            .collect();
        self.emit_to(
            connection_id,
            EVENT_BLOCKED_USERS_LISTED,
            json!(BlockedUsersListedPayload { users }),
        );
        Ok(())
    }

    /// Drop the connection from every conversation room and broadcast the
    /// resulting offline transitions.
    pub fn disconnect(&self, connection_id: &str) {
        let departures = self.presence.leave_all(connection_id);
        presence::announce_departures(&self.event_bus, &departures);
    }
}
