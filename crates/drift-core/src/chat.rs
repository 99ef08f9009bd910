use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::Utc;
use drift_db::DbPool;
use drift_models::gateway::{
    FriendRequestAcceptedPayload, FriendRequestMessagePayload, IdentityUpgradedPayload,
    MatchedPayload, OnlineCountPayload, PrivateChatStartedPayload, RelayedMessagePayload,
    SkipCooldownPayload, TextNoticePayload, EVENT_FRIEND_REQUEST_ACCEPTED,
    EVENT_FRIEND_REQUEST_MESSAGE, EVENT_IDENTITY_UPGRADED, EVENT_MATCHED, EVENT_MESSAGE,
    EVENT_MESSAGE_ERROR, EVENT_ONLINE_COUNT, EVENT_PARTNER_DISCONNECTED, EVENT_PARTNER_SKIPPED,
    EVENT_PRIVATE_CHAT_STARTED, EVENT_RATE_LIMITED, EVENT_SERVER_BUSY, EVENT_SKIP_COOLDOWN,
};
use drift_models::identity::ConnectionIdentity;
use drift_models::user::UserProfile;
use serde_json::json;
use uuid::Uuid;

use crate::auth;
use crate::cooldown::PairCooldownLedger;
use crate::error::CoreError;
use crate::events::EventBus;
use crate::gate::RateGate;
use crate::presence::{self, PresenceRegistry};
use crate::private;
use crate::queue::MatchQueue;
use crate::rooms::{Room, RoomManager};
use crate::AppConfig;

/// Orchestrates matchmaking, room lifecycle, the rate/cooldown gates, and
/// the friend-request handshake that promotes an ephemeral pairing into a
/// durable conversation.
///
/// All in-memory coordination state lives behind one mutex that is only
/// ever held for synchronous mutations; persistence calls are awaited with
/// the lock released, and every match re-checks queue/room membership
/// before committing.
pub struct ChatService {
    db: DbPool,
    event_bus: EventBus,
    presence: Arc<PresenceRegistry>,
    config: Arc<AppConfig>,
    state: Mutex<ChatState>,
}

struct ChatState {
    identities: HashMap<String, ConnectionIdentity>,
    /// Connections whose pairing was promoted to a private conversation;
    /// terminal for this session, they no longer enter matchmaking.
    promoted: HashSet<String>,
    queue: MatchQueue,
    cooldowns: PairCooldownLedger,
    rooms: RoomManager,
    gate: RateGate,
}

enum MessageOutcome {
    RateLimited,
    NoRoom,
    Relayed {
        conversation_id: Option<i64>,
        sender_user_id: Option<i64>,
    },
}

enum SkipOutcome {
    Cooldown(Duration),
    NoRoom,
    TornDown { room: Room, partner: String },
}

impl ChatService {
    pub fn new(
        db: DbPool,
        event_bus: EventBus,
        presence: Arc<PresenceRegistry>,
        config: Arc<AppConfig>,
    ) -> Self {
        let gate = RateGate::new(
            Duration::from_millis(config.chat.message_window_ms),
            config.chat.message_limit,
            Duration::from_millis(config.chat.skip_cooldown_ms),
        );
        Self {
            db,
            event_bus,
            presence,
            config,
            state: Mutex::new(ChatState {
                identities: HashMap::new(),
                promoted: HashSet::new(),
                queue: MatchQueue::new(),
                cooldowns: PairCooldownLedger::new(),
                rooms: RoomManager::new(),
                gate,
            }),
        }
    }

    fn state_guard(&self) -> MutexGuard<'_, ChatState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn emit_to(&self, connection_id: &str, event: &str, payload: serde_json::Value) {
        self.event_bus
            .dispatch_to_connections(event, payload, vec![connection_id.to_string()]);
    }

    /// Register a fresh connection with a guest identity and broadcast the
    /// updated namespace headcount.
    pub fn register_connection(&self, connection_id: &str) {
        let count = {
            let mut st = self.state_guard();
            st.identities.insert(
                connection_id.to_string(),
                ConnectionIdentity::guest(
                    connection_id.to_string(),
                    format!("guest-{}", Uuid::new_v4()),
                ),
            );
            st.identities.len()
        };
        self.event_bus
            .dispatch_chat_namespace(EVENT_ONLINE_COUNT, json!(OnlineCountPayload { count }));
    }

    pub fn connection_count(&self) -> usize {
        self.state_guard().identities.len()
    }

    pub fn queue_len(&self) -> usize {
        self.state_guard().queue.len()
    }

    pub fn is_queued(&self, connection_id: &str) -> bool {
        self.state_guard().queue.contains(connection_id)
    }

    pub fn active_room_count(&self) -> usize {
        self.state_guard().rooms.active_room_count()
    }

    pub fn room_id_of(&self, connection_id: &str) -> Option<String> {
        self.state_guard()
            .rooms
            .room_by_connection(connection_id)
            .map(|room| room.room_id.clone())
    }

    pub fn identity_of(&self, connection_id: &str) -> Option<ConnectionIdentity> {
        self.state_guard().identities.get(connection_id).cloned()
    }

    /// Enter matchmaking. A no-op for unknown, already-queued, roomed, or
    /// promoted connections; a full queue answers `server_busy` instead.
    pub async fn find_match(&self, connection_id: &str) {
        {
            let mut st = self.state_guard();
            if !st.identities.contains_key(connection_id) || st.promoted.contains(connection_id) {
                return;
            }
            if st.queue.contains(connection_id) {
                return;
            }
            if st.queue.len() >= self.config.chat.max_queue_size {
                drop(st);
                self.emit_to(connection_id, EVENT_SERVER_BUSY, json!({}));
                return;
            }
            if st.rooms.room_by_connection(connection_id).is_some() {
                return;
            }
            st.queue.enqueue(connection_id);
        }
        self.try_pair().await;
    }

    /// One bounded pass over the queue: pop candidate pairs, reject pairs
    /// still under skip cooldown or with a standing block, and commit the
    /// first viable pairing. Unmatched entries stay queued for the next
    /// `find_match` trigger.
    async fn try_pair(&self) {
        let max_attempts = self.state_guard().queue.len() + 1;

        for _ in 0..max_attempts {
            let candidate = {
                let mut st = self.state_guard();
                let Some((a, b)) = st.queue.dequeue_pair() else {
                    return;
                };
                let pair = crate::rooms::room_id_for(&a, &b);
                if st.cooldowns.is_blocked(&pair) {
                    st.queue.enqueue(&a);
                    st.queue.enqueue(&b);
                    None
                } else {
                    let a_user = st.identities.get(&a).and_then(|i| i.user_id);
                    let b_user = st.identities.get(&b).and_then(|i| i.user_id);
                    Some((a, b, a_user, b_user))
                }
            };
            let Some((a, b, a_user, b_user)) = candidate else {
                continue;
            };

            // The block gate applies only when both sides are
            // authenticated, and is awaited with the lock released.
            if let (Some(user_a), Some(user_b)) = (a_user, b_user) {
                match drift_db::blocks::is_blocked_either_direction(&self.db, user_a, user_b).await
                {
                    Ok(false) => {}
                    Ok(true) => {
                        self.requeue_if_alive(&[&a, &b]);
                        continue;
                    }
                    Err(err) => {
                        tracing::error!("block lookup failed during matching: {err}");
                        self.requeue_if_alive(&[&a, &b]);
                        return;
                    }
                }
            }

            // Authenticated pairings get an ephemeral conversation so the
            // exchange is logged; guest pairings relay without persistence.
            let conversation_id = match (a_user, b_user) {
                (Some(user_a), Some(user_b)) => {
                    let id = drift_util::snowflake::generate(self.config.worker_id);
                    match drift_db::conversations::create_ephemeral(&self.db, id, user_a, user_b)
                        .await
                    {
                        Ok(row) => Some(row.id),
                        Err(err) => {
                            tracing::warn!("ephemeral conversation create failed: {err}");
                            None
                        }
                    }
                }
                _ => None,
            };

            // Commit only if both sides are still connected and roomless;
            // a skip or disconnect during the awaits above aborts the
            // candidate here.
            let room_id = {
                let mut st = self.state_guard();
                let a_ready = st.identities.contains_key(&a)
                    && st.rooms.room_by_connection(&a).is_none();
                let b_ready = st.identities.contains_key(&b)
                    && st.rooms.room_by_connection(&b).is_none();
                if a_ready && b_ready {
                    st.queue.remove(&a);
                    st.queue.remove(&b);
                    let room = st.rooms.create_room(&a, &b, conversation_id);
                    Some(room.room_id)
                } else {
                    if a_ready {
                        st.queue.enqueue(&a);
                    }
                    if b_ready {
                        st.queue.enqueue(&b);
                    }
                    None
                }
            };

            match room_id {
                Some(room_id) => {
                    self.event_bus.dispatch_to_connections(
                        EVENT_MATCHED,
                        json!(MatchedPayload { room_id }),
                        vec![a, b],
                    );
                    return;
                }
                None => {
                    if let Some(id) = conversation_id {
                        // Conversation orphaned by the aborted match.
                        if let Err(err) =
                            drift_db::conversations::set_active(&self.db, id, false).await
                        {
                            tracing::warn!("failed to deactivate orphaned conversation: {err}");
                        }
                    }
                    continue;
                }
            }
        }
    }

    fn requeue_if_alive(&self, connection_ids: &[&str]) {
        let mut st = self.state_guard();
        for connection_id in connection_ids {
            if st.identities.contains_key(*connection_id) {
                st.queue.enqueue(connection_id);
            }
        }
    }

    /// Admission pipeline: silent drop, content ceilings, sliding-window
    /// rate check, then relay. The relay is published under the state lock
    /// so broadcast order equals admission order within a room.
    pub async fn handle_message(&self, connection_id: &str, raw: &str) {
        let Some(content) = drift_util::validation::normalize_content(raw) else {
            return;
        };
        if let Err(err) = drift_util::validation::check_content(
            content,
            self.config.chat.max_message_length,
            self.config.chat.max_words,
        ) {
            self.emit_to(
                connection_id,
                EVENT_MESSAGE_ERROR,
                json!(TextNoticePayload {
                    message: err.to_string(),
                }),
            );
            return;
        }

        let outcome = {
            let mut st = self.state_guard();
            if !st.gate.admit_message(connection_id, Instant::now()) {
                MessageOutcome::RateLimited
            } else {
                match st.rooms.room_by_connection(connection_id).cloned() {
                    None => MessageOutcome::NoRoom,
                    Some(room) => {
                        self.event_bus.dispatch_to_connections(
                            EVENT_MESSAGE,
                            json!(RelayedMessagePayload {
                                sender: connection_id.to_string(),
                                message: content.to_string(),
                                timestamp: Utc::now().timestamp_millis(),
                            }),
                            room.connections.to_vec(),
                        );
                        MessageOutcome::Relayed {
                            conversation_id: room.conversation_id,
                            sender_user_id: st
                                .identities
                                .get(connection_id)
                                .and_then(|i| i.user_id),
                        }
                    }
                }
            }
        };

        match outcome {
            MessageOutcome::RateLimited => {
                self.emit_to(
                    connection_id,
                    EVENT_RATE_LIMITED,
                    json!(TextNoticePayload {
                        message: "You are sending messages too fast.".into(),
                    }),
                );
            }
            MessageOutcome::NoRoom => {}
            MessageOutcome::Relayed {
                conversation_id: Some(conversation_id),
                sender_user_id: Some(sender_user_id),
            } => {
                let id = drift_util::snowflake::generate(self.config.worker_id);
                if let Err(err) = drift_db::messages::create_message(
                    &self.db,
                    id,
                    conversation_id,
                    sender_user_id,
                    content,
                )
                .await
                {
                    tracing::warn!("failed to log ephemeral message: {err}");
                }
            }
            MessageOutcome::Relayed { .. } => {}
        }
    }

    /// Leave the current pairing. The pair is cooldown-blocked, the
    /// partner is notified, and both sides re-enter matchmaking.
    pub async fn skip(&self, connection_id: &str) {
        let outcome = {
            let mut st = self.state_guard();
            if !st.identities.contains_key(connection_id) {
                return;
            }
            match st.gate.admit_skip(connection_id, Instant::now()) {
                Err(remaining) => SkipOutcome::Cooldown(remaining),
                Ok(()) => match st.rooms.room_by_connection(connection_id).cloned() {
                    None => SkipOutcome::NoRoom,
                    Some(room) => {
                        let block = Duration::from_millis(self.config.chat.skip_block_ms);
                        st.cooldowns.block(room.room_id.clone(), block);
                        st.rooms.remove_room(&room.room_id);
                        match room.partner_of(connection_id).map(str::to_string) {
                            Some(partner) => SkipOutcome::TornDown { room, partner },
                            None => SkipOutcome::NoRoom,
                        }
                    }
                },
            }
        };

        match outcome {
            SkipOutcome::Cooldown(remaining) => {
                self.emit_to(
                    connection_id,
                    EVENT_SKIP_COOLDOWN,
                    json!(SkipCooldownPayload {
                        remaining: remaining.as_millis() as u64,
                    }),
                );
            }
            SkipOutcome::NoRoom => {
                self.find_match(connection_id).await;
            }
            SkipOutcome::TornDown { room, partner } => {
                self.emit_to(&partner, EVENT_PARTNER_SKIPPED, json!({}));
                if let Some(conversation_id) = room.conversation_id {
                    if let Err(err) =
                        drift_db::conversations::set_active(&self.db, conversation_id, false).await
                    {
                        tracing::warn!("failed to deactivate skipped conversation: {err}");
                    }
                }
                // Both sides re-enter matchmaking.
                self.find_match(&partner).await;
                self.find_match(connection_id).await;
            }
        }
    }

    /// Verify a bearer token and rewrite the connection's identity from
    /// Guest to User in place. Queue and room membership are untouched.
    pub async fn upgrade_identity(&self, connection_id: &str, token: &str) {
        let token = token.trim();
        if token.is_empty() {
            self.emit_upgrade_result(connection_id, false, Some("Token is required."));
            return;
        }
        let claims = match auth::validate_token(token, &self.config.jwt_secret) {
            Ok(claims) => claims,
            Err(_) => {
                self.emit_upgrade_result(connection_id, false, Some("Invalid token."));
                return;
            }
        };
        let user = match drift_db::users::get_user_by_id(&self.db, claims.sub).await {
            Ok(Some(user)) => user,
            Ok(None) => {
                self.emit_upgrade_result(connection_id, false, Some("Unknown user."));
                return;
            }
            Err(err) => {
                tracing::error!("user lookup failed during identity upgrade: {err}");
                self.emit_upgrade_result(connection_id, false, Some("Something went wrong."));
                return;
            }
        };

        let upgraded = {
            let mut st = self.state_guard();
            match st.identities.get_mut(connection_id) {
                Some(identity) => {
                    let display_name = user
                        .display_name
                        .clone()
                        .unwrap_or_else(|| user.username.clone());
                    identity.upgrade(user.id, display_name);
                    true
                }
                None => false,
            }
        };
        if upgraded {
            self.emit_upgrade_result(connection_id, true, None);
        }
    }

    fn emit_upgrade_result(&self, connection_id: &str, success: bool, message: Option<&str>) {
        self.emit_to(
            connection_id,
            EVENT_IDENTITY_UPGRADED,
            json!(IdentityUpgradedPayload {
                success,
                message: message.map(str::to_string),
            }),
        );
    }

    /// Offer friendship to the current room partner. Both sides must be
    /// authenticated; the partner is notified with the pending request.
    pub async fn send_friend_request(&self, connection_id: &str) -> Result<(), CoreError> {
        let (from_user, from_name, partner_connection, to_user) = {
            let st = self.state_guard();
            let me = st
                .identities
                .get(connection_id)
                .ok_or_else(|| CoreError::Unauthorized("Login required".into()))?;
            let from_user = me
                .user_id
                .ok_or_else(|| CoreError::Unauthorized("Login required".into()))?;
            let from_name = me.display_name.clone().unwrap_or_default();
            let room = st
                .rooms
                .room_by_connection(connection_id)
                .ok_or_else(|| CoreError::BadRequest("No active chat partner".into()))?;
            let partner_connection = room
                .partner_of(connection_id)
                .ok_or_else(|| CoreError::Internal("room membership out of sync".into()))?
                .to_string();
            let partner = st
                .identities
                .get(&partner_connection)
                .ok_or_else(|| CoreError::Internal("partner identity missing".into()))?;
            let to_user = partner
                .user_id
                .ok_or_else(|| CoreError::BadRequest("Partner has not logged in".into()))?;
            (from_user, from_name, partner_connection, to_user)
        };

        let request_id = drift_util::snowflake::generate(self.config.worker_id);
        let request = crate::friends::send_request(
            &self.db,
            request_id,
            from_user,
            to_user,
            self.config.chat.friend_request_ttl_days,
        )
        .await?;

        self.emit_to(
            &partner_connection,
            EVENT_FRIEND_REQUEST_MESSAGE,
            json!(FriendRequestMessagePayload {
                request_id: request.id.to_string(),
                from_username: from_name.clone(),
                from: UserProfile {
                    user_id: from_user.to_string(),
                    username: from_name,
                    display_name: None,
                    avatar_hash: None,
                },
            }),
        );
        Ok(())
    }

    /// Accept the partner's friend request and promote the pairing:
    /// friendship recorded, durable conversation looked up or created,
    /// recent history loaded, both connections moved into the
    /// conversation's room, and the ephemeral room torn down.
    pub async fn accept_friend_request(
        &self,
        connection_id: &str,
        request_id: &str,
    ) -> Result<(), CoreError> {
        let request_id: i64 = request_id
            .trim()
            .parse()
            .map_err(|_| CoreError::BadRequest("Invalid request id".into()))?;

        let (my_user, my_name, partner_connection, partner_user, room) = {
            let st = self.state_guard();
            let me = st
                .identities
                .get(connection_id)
                .ok_or_else(|| CoreError::Unauthorized("Login required".into()))?;
            let my_user = me
                .user_id
                .ok_or_else(|| CoreError::Unauthorized("Login required".into()))?;
            let my_name = me.display_name.clone().unwrap_or_default();
            let room = st
                .rooms
                .room_by_connection(connection_id)
                .cloned()
                .ok_or_else(|| CoreError::BadRequest("No active chat partner".into()))?;
            let partner_connection = room
                .partner_of(connection_id)
                .ok_or_else(|| CoreError::Internal("room membership out of sync".into()))?
                .to_string();
            let partner = st
                .identities
                .get(&partner_connection)
                .ok_or_else(|| CoreError::Internal("partner identity missing".into()))?;
            let partner_user = partner
                .user_id
                .ok_or_else(|| CoreError::BadRequest("Partner has not logged in".into()))?;
            (my_user, my_name, partner_connection, partner_user, room)
        };

        // The request must be the pending one between this room's pair.
        let pending = drift_db::friend_requests::get_request(&self.db, request_id)
            .await?
            .ok_or_else(|| CoreError::NotFound("Request not found".into()))?;
        if pending.from_user_id != partner_user || pending.to_user_id != my_user {
            return Err(CoreError::Forbidden(
                "Not authorized to accept this request".into(),
            ));
        }

        let accepted = crate::friends::accept_request(&self.db, request_id, my_user).await?;

        let conversation_id = drift_util::snowflake::generate(self.config.worker_id);
        let conversation = drift_db::conversations::find_or_create_durable(
            &self.db,
            conversation_id,
            my_user,
            partner_user,
        )
        .await?;
        let page = drift_db::messages::list_page(
            &self.db,
            conversation.id,
            None,
            self.config.chat.history_page_size,
        )
        .await?;
        let messages = private::wire_messages(&self.db, page).await?;

        // Tear down the ephemeral room; both sessions reach their
        // terminal state for matchmaking.
        {
            let mut st = self.state_guard();
            st.rooms.remove_room(&room.room_id);
            st.promoted.insert(connection_id.to_string());
            st.promoted.insert(partner_connection.clone());
        }
        if let Some(ephemeral_id) = room.conversation_id {
            if let Err(err) =
                drift_db::conversations::set_active(&self.db, ephemeral_id, false).await
            {
                tracing::warn!("failed to deactivate promoted ephemeral conversation: {err}");
            }
        }

        // Move both connections into the conversation's room.
        for (conn, user) in [
            (connection_id, my_user),
            (partner_connection.as_str(), partner_user),
        ] {
            let outcome = self.presence.join(conversation.id, conn, user);
            presence::announce_join(&self.event_bus, conversation.id, user, &outcome);
        }

        let recipients = vec![connection_id.to_string(), partner_connection];
        self.event_bus.dispatch_to_connections(
            EVENT_FRIEND_REQUEST_ACCEPTED,
            json!(FriendRequestAcceptedPayload {
                request_id: accepted.id.to_string(),
                accepted_by: my_user.to_string(),
                username: my_name,
            }),
            recipients.clone(),
        );
        self.event_bus.dispatch_to_connections(
            EVENT_PRIVATE_CHAT_STARTED,
            json!(PrivateChatStartedPayload {
                conversation_id: conversation.id.to_string(),
                room_id: private::conversation_room_id(conversation.id),
                messages,
            }),
            recipients,
        );
        Ok(())
    }

    /// Full teardown for a closed connection: queue entry, gate state, and
    /// identity are dropped, any owned room is destroyed, its conversation
    /// deactivated, and the partner notified and re-queued.
    pub async fn disconnect(&self, connection_id: &str) {
        let (room, remaining) = {
            let mut st = self.state_guard();
            st.queue.remove(connection_id);
            st.gate.clear(connection_id);
            st.identities.remove(connection_id);
            st.promoted.remove(connection_id);
            let room = st.rooms.room_by_connection(connection_id).cloned();
            if let Some(room) = &room {
                st.rooms.remove_room(&room.room_id);
            }
            (room, st.identities.len())
        };

        self.event_bus.dispatch_chat_namespace(
            EVENT_ONLINE_COUNT,
            json!(OnlineCountPayload { count: remaining }),
        );

        let departures = self.presence.leave_all(connection_id);
        presence::announce_departures(&self.event_bus, &departures);

        if let Some(room) = room {
            if let Some(partner) = room.partner_of(connection_id).map(str::to_string) {
                self.emit_to(&partner, EVENT_PARTNER_DISCONNECTED, json!({}));
                if let Some(conversation_id) = room.conversation_id {
                    if let Err(err) =
                        drift_db::conversations::set_active(&self.db, conversation_id, false).await
                    {
                        tracing::warn!("failed to deactivate abandoned conversation: {err}");
                    }
                }
                self.find_match(&partner).await;
            }
        }
    }

    /// Periodic health line: queue depth, active rooms, live connections.
    pub fn spawn_health_logger(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let service = self;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(30));
            interval.tick().await; // skip immediate first tick
            loop {
                interval.tick().await;
                let (queued, rooms, connections) = {
                    let st = service.state_guard();
                    (
                        st.queue.len(),
                        st.rooms.active_room_count(),
                        st.identities.len(),
                    )
                };
                tracing::info!(queued, rooms, connections, "chat health status");
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{assert_no_event, next_event, next_event_for, test_state, test_state_with};
    use crate::ChatConfig;

    async fn seed_user(state: &crate::AppState, id: i64, username: &str) -> String {
        drift_db::users::create_user(&state.db, id, username)
            .await
            .unwrap();
        auth::create_token(id, &state.config.jwt_secret, 3600).unwrap()
    }

    async fn connect_and_queue(state: &crate::AppState, ids: &[&str]) {
        for id in ids {
            state.chat.register_connection(id);
        }
        for id in ids {
            state.chat.find_match(id).await;
        }
    }

    async fn authenticated_pair(state: &crate::AppState) -> (String, String) {
        let token_a = seed_user(state, 10, "ada").await;
        let token_b = seed_user(state, 20, "lin").await;
        state.chat.register_connection("a");
        state.chat.register_connection("b");
        state.chat.upgrade_identity("a", &token_a).await;
        state.chat.upgrade_identity("b", &token_b).await;
        state.chat.find_match("a").await;
        state.chat.find_match("b").await;
        ("a".into(), "b".into())
    }

    #[tokio::test]
    async fn find_match_pairs_half_the_queue() {
        let state = test_state().await;
        let ids = ["a", "b", "c", "d", "e"];
        connect_and_queue(&state, &ids).await;

        assert_eq!(state.chat.active_room_count(), 2);
        assert_eq!(state.chat.queue_len(), 1);

        // No connection appears in two rooms: each room holds exactly two
        // of the five connections.
        let mut occupants: HashMap<String, Vec<&str>> = HashMap::new();
        for id in ids {
            if let Some(room_id) = state.chat.room_id_of(id) {
                occupants.entry(room_id).or_default().push(id);
            }
        }
        assert_eq!(occupants.len(), 2);
        assert!(occupants.values().all(|members| members.len() == 2));
    }

    #[tokio::test]
    async fn find_match_is_a_noop_while_queued_or_roomed() {
        let state = test_state().await;
        state.chat.register_connection("a");
        state.chat.find_match("a").await;
        state.chat.find_match("a").await;
        assert_eq!(state.chat.queue_len(), 1);

        state.chat.register_connection("b");
        state.chat.find_match("b").await;
        assert_eq!(state.chat.active_room_count(), 1);
        state.chat.find_match("a").await;
        assert_eq!(state.chat.active_room_count(), 1);
        assert_eq!(state.chat.queue_len(), 0);
    }

    #[tokio::test]
    async fn full_queue_answers_server_busy() {
        let state = test_state_with(ChatConfig {
            max_queue_size: 1,
            ..ChatConfig::default()
        })
        .await;
        state.chat.register_connection("a");
        state.chat.find_match("a").await;
        assert!(state.chat.is_queued("a"));

        let mut rx = state.event_bus.subscribe();
        state.chat.register_connection("b");
        state.chat.find_match("b").await;
        next_event_for(&mut rx, EVENT_SERVER_BUSY, "b").await;
        assert!(state.chat.is_queued("a"));
        assert!(!state.chat.is_queued("b"));
        assert_eq!(state.chat.active_room_count(), 0);
    }

    #[tokio::test]
    async fn matched_event_names_one_room_for_both_sides() {
        let state = test_state().await;
        state.chat.register_connection("a");
        state.chat.register_connection("b");
        let mut rx = state.event_bus.subscribe();
        state.chat.find_match("a").await;
        state.chat.find_match("b").await;

        let event = next_event(&mut rx, EVENT_MATCHED).await;
        assert!(event.is_for_connection("a"));
        assert!(event.is_for_connection("b"));
        let room_id = event.payload["roomId"].as_str().unwrap().to_string();
        assert_eq!(state.chat.room_id_of("a"), Some(room_id.clone()));
        assert_eq!(state.chat.room_id_of("b"), Some(room_id));
    }

    #[tokio::test]
    async fn skip_tears_down_blocks_the_pair_and_requeues_both() {
        let state = test_state_with(ChatConfig {
            skip_block_ms: 60,
            skip_cooldown_ms: 0,
            ..ChatConfig::default()
        })
        .await;
        connect_and_queue(&state, &["a", "b"]).await;
        assert_eq!(state.chat.active_room_count(), 1);

        let mut rx = state.event_bus.subscribe();
        state.chat.skip("a").await;

        next_event_for(&mut rx, EVENT_PARTNER_SKIPPED, "b").await;
        assert_eq!(state.chat.active_room_count(), 0);
        // Both sides re-enter matchmaking but stay queued: the pair is
        // cooldown-blocked from re-matching.
        assert!(state.chat.is_queued("a"));
        assert!(state.chat.is_queued("b"));

        // Once the cooldown lapses, the next find_match trigger pairs
        // them again.
        tokio::time::sleep(Duration::from_millis(90)).await;
        state.chat.register_connection("c");
        state.chat.find_match("c").await;
        assert_eq!(state.chat.active_room_count(), 1);
        assert!(state.chat.room_id_of("a").is_some());
        assert!(state.chat.room_id_of("b").is_some());
        assert!(state.chat.is_queued("c"));
    }

    #[tokio::test]
    async fn second_skip_within_cooldown_is_rejected() {
        let state = test_state().await;
        connect_and_queue(&state, &["a", "b"]).await;
        state.chat.skip("a").await;
        assert!(state.chat.is_queued("a"));
        assert!(state.chat.is_queued("b"));

        let mut rx = state.event_bus.subscribe();
        state.chat.skip("a").await;
        let event = next_event_for(&mut rx, EVENT_SKIP_COOLDOWN, "a").await;
        let remaining = event.payload["remaining"].as_u64().unwrap();
        assert!(remaining > 0 && remaining <= 3000);
        // The rejected skip tears nothing down and re-queues nothing.
        assert!(state.chat.is_queued("a"));
        assert!(state.chat.is_queued("b"));
        assert_eq!(state.chat.active_room_count(), 0);
    }

    #[tokio::test]
    async fn message_rate_limit_rejects_the_sixth_in_window() {
        let state = test_state().await;
        connect_and_queue(&state, &["a", "b"]).await;

        let mut rx = state.event_bus.subscribe();
        for i in 0..5 {
            state.chat.handle_message("a", &format!("hello {i}")).await;
            next_event(&mut rx, EVENT_MESSAGE).await;
        }
        state.chat.handle_message("a", "one too many").await;
        next_event_for(&mut rx, EVENT_RATE_LIMITED, "a").await;

        // The partner's window is independent.
        state.chat.handle_message("b", "still fine").await;
        let event = next_event(&mut rx, EVENT_MESSAGE).await;
        assert_eq!(event.payload["sender"].as_str(), Some("b"));
    }

    #[tokio::test]
    async fn content_ceilings_answer_message_error() {
        let state = test_state().await;
        connect_and_queue(&state, &["a", "b"]).await;
        let mut rx = state.event_bus.subscribe();

        state.chat.handle_message("a", &"x".repeat(501)).await;
        next_event_for(&mut rx, EVENT_MESSAGE_ERROR, "a").await;

        let wordy = vec!["w"; 31].join(" ");
        state.chat.handle_message("a", &wordy).await;
        next_event_for(&mut rx, EVENT_MESSAGE_ERROR, "a").await;

        // Empty-after-trim payloads are dropped silently.
        state.chat.handle_message("a", "   ").await;
        assert_no_event(&mut rx, EVENT_MESSAGE_ERROR).await;
    }

    #[tokio::test]
    async fn guest_messages_relay_without_persistence() {
        let state = test_state().await;
        connect_and_queue(&state, &["a", "b"]).await;
        let mut rx = state.event_bus.subscribe();
        state.chat.handle_message("a", "hi").await;
        let event = next_event(&mut rx, EVENT_MESSAGE).await;
        assert_eq!(event.payload["message"].as_str(), Some("hi"));

        let logged: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM messages")
            .fetch_one(&state.db)
            .await
            .unwrap();
        assert_eq!(logged, 0);
    }

    #[tokio::test]
    async fn authenticated_pairing_logs_messages_to_an_ephemeral_conversation() {
        let state = test_state().await;
        let (a, _b) = authenticated_pair(&state).await;
        assert_eq!(state.chat.active_room_count(), 1);

        let conversations: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM conversations WHERE kind = 0")
                .fetch_one(&state.db)
                .await
                .unwrap();
        assert_eq!(conversations, 1);

        state.chat.handle_message(&a, "logged line").await;
        // Persistence happens after the relay; the await above completes it.
        let (sender, content): (i64, String) =
            sqlx::query_as("SELECT sender_id, content FROM messages LIMIT 1")
                .fetch_one(&state.db)
                .await
                .unwrap();
        assert_eq!(sender, 10);
        assert_eq!(content, "logged line");
    }

    #[tokio::test]
    async fn upgrade_rewrites_identity_without_touching_queue_state() {
        let state = test_state().await;
        let token = seed_user(&state, 10, "ada").await;
        state.chat.register_connection("a");
        state.chat.find_match("a").await;

        let mut rx = state.event_bus.subscribe();
        state.chat.upgrade_identity("a", &token).await;
        let event = next_event_for(&mut rx, EVENT_IDENTITY_UPGRADED, "a").await;
        assert_eq!(event.payload["success"].as_bool(), Some(true));

        let identity = state.chat.identity_of("a").unwrap();
        assert!(identity.is_user());
        assert_eq!(identity.user_id, Some(10));
        assert!(state.chat.is_queued("a"));
    }

    #[tokio::test]
    async fn upgrade_with_bad_token_reports_failure() {
        let state = test_state().await;
        state.chat.register_connection("a");
        let mut rx = state.event_bus.subscribe();
        state.chat.upgrade_identity("a", "not-a-jwt").await;
        let event = next_event_for(&mut rx, EVENT_IDENTITY_UPGRADED, "a").await;
        assert_eq!(event.payload["success"].as_bool(), Some(false));
        assert!(!state.chat.identity_of("a").unwrap().is_user());
    }

    #[tokio::test]
    async fn blocked_users_are_never_paired() {
        let state = test_state().await;
        let token_a = seed_user(&state, 10, "ada").await;
        let token_b = seed_user(&state, 20, "lin").await;
        drift_db::blocks::block_user(&state.db, 10, 20).await.unwrap();

        state.chat.register_connection("a");
        state.chat.register_connection("b");
        state.chat.upgrade_identity("a", &token_a).await;
        state.chat.upgrade_identity("b", &token_b).await;
        state.chat.find_match("a").await;
        state.chat.find_match("b").await;

        assert_eq!(state.chat.active_room_count(), 0);
        assert!(state.chat.is_queued("a"));
        assert!(state.chat.is_queued("b"));
    }

    #[tokio::test]
    async fn friend_requests_require_an_authenticated_pair() {
        let state = test_state().await;
        connect_and_queue(&state, &["a", "b"]).await;
        let err = state.chat.send_friend_request("a").await.unwrap_err();
        assert!(matches!(err, CoreError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn acceptance_promotes_the_pairing_to_a_private_conversation() {
        let state = test_state().await;
        let (a, b) = authenticated_pair(&state).await;
        let ephemeral_room = state.chat.room_id_of(&a).unwrap();

        // Pre-promotion traffic lands in the ephemeral conversation only.
        state.chat.handle_message(&a, "hi").await;

        let mut rx = state.event_bus.subscribe();
        state.chat.send_friend_request(&a).await.unwrap();
        let offer = next_event_for(&mut rx, EVENT_FRIEND_REQUEST_MESSAGE, &b).await;
        let request_id = offer.payload["requestId"].as_str().unwrap().to_string();
        assert_eq!(offer.payload["fromUsername"].as_str(), Some("ada"));

        state.chat.accept_friend_request(&b, &request_id).await.unwrap();

        let accepted = next_event(&mut rx, EVENT_FRIEND_REQUEST_ACCEPTED).await;
        assert!(accepted.is_for_connection(&a) && accepted.is_for_connection(&b));

        let started = next_event(&mut rx, EVENT_PRIVATE_CHAT_STARTED).await;
        assert!(started.is_for_connection(&a) && started.is_for_connection(&b));
        let conversation_id = started.payload["conversationId"].as_str().unwrap();
        assert_ne!(started.payload["roomId"].as_str().unwrap(), ephemeral_room);
        // The durable conversation starts empty: the ephemeral "hi" is a
        // different conversation and is not carried over.
        assert_eq!(started.payload["messages"].as_array().unwrap().len(), 0);

        // Friendship is recorded, the ephemeral room is gone, and both
        // sessions are terminal for matchmaking.
        assert!(drift_db::friendships::are_friends(&state.db, 10, 20).await.unwrap());
        assert!(state.chat.room_id_of(&a).is_none());
        state.chat.find_match(&a).await;
        assert!(!state.chat.is_queued(&a));

        // The durable conversation is unique for the pair.
        let durable: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM conversations WHERE kind = 1")
            .fetch_one(&state.db)
            .await
            .unwrap();
        assert_eq!(durable, 1);
        let stored_pair: String =
            sqlx::query_scalar("SELECT pair_key FROM conversations WHERE kind = 1")
                .fetch_one(&state.db)
                .await
                .unwrap();
        assert_eq!(stored_pair, "10#20");
        assert_eq!(
            conversation_id,
            sqlx::query_scalar::<_, i64>("SELECT id FROM conversations WHERE kind = 1")
                .fetch_one(&state.db)
                .await
                .unwrap()
                .to_string()
        );
    }

    #[tokio::test]
    async fn accepting_twice_is_a_conflict() {
        let state = test_state().await;
        let (a, b) = authenticated_pair(&state).await;
        let mut rx = state.event_bus.subscribe();
        state.chat.send_friend_request(&a).await.unwrap();
        let offer = next_event_for(&mut rx, EVENT_FRIEND_REQUEST_MESSAGE, &b).await;
        let request_id = offer.payload["requestId"].as_str().unwrap().to_string();

        state.chat.accept_friend_request(&b, &request_id).await.unwrap();
        let err = state
            .chat
            .accept_friend_request(&b, &request_id)
            .await
            .unwrap_err();
        // The ephemeral room is already gone after the promotion.
        assert!(matches!(err, CoreError::BadRequest(_)));
    }

    #[tokio::test]
    async fn duplicate_pending_request_is_a_conflict() {
        let state = test_state().await;
        let (a, b) = authenticated_pair(&state).await;
        state.chat.send_friend_request(&a).await.unwrap();
        let err = state.chat.send_friend_request(&b).await.unwrap_err();
        assert!(matches!(err, CoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn disconnect_notifies_and_requeues_the_partner() {
        let state = test_state().await;
        connect_and_queue(&state, &["a", "b"]).await;
        let mut rx = state.event_bus.subscribe();

        state.chat.disconnect("a").await;
        let count = next_event(&mut rx, EVENT_ONLINE_COUNT).await;
        assert_eq!(count.payload["count"].as_u64(), Some(1));
        next_event_for(&mut rx, EVENT_PARTNER_DISCONNECTED, "b").await;

        assert_eq!(state.chat.active_room_count(), 0);
        assert!(state.chat.is_queued("b"));
        assert_eq!(state.chat.connection_count(), 1);
    }
}
