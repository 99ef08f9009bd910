use dashmap::DashMap;
use std::collections::HashMap;

use drift_models::gateway::{PrivatePresencePayload, EVENT_PRIVATE_PRESENCE};
use serde_json::json;

use crate::events::EventBus;

/// Result of joining a conversation room.
#[derive(Debug)]
pub struct JoinOutcome {
    /// True when this was the user's first live connection in the room,
    /// i.e. the user just came online for this conversation.
    pub came_online: bool,
    /// The other connections already in the room, with their user ids.
    pub others: Vec<(String, i64)>,
}

/// A room membership dropped by a disconnecting connection.
#[derive(Debug)]
pub struct Departure {
    pub conversation_id: i64,
    pub user_id: i64,
    /// True when no other connection of the same user remains in the room.
    pub went_offline: bool,
    /// Connections still in the room.
    pub remaining: Vec<String>,
}

/// Live membership of conversation rooms, keyed by conversation id.
/// Presence is derived from this registry, never stored: a user is online
/// for a conversation iff at least one of their connections is joined.
#[derive(Debug, Default)]
pub struct PresenceRegistry {
    rooms: DashMap<i64, HashMap<String, i64>>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn join(&self, conversation_id: i64, connection_id: &str, user_id: i64) -> JoinOutcome {
        let mut room = self.rooms.entry(conversation_id).or_default();
        let already_online = room
            .iter()
            .any(|(conn, uid)| *uid == user_id && conn != connection_id);
        let was_member = room.insert(connection_id.to_string(), user_id).is_some();
        let others = room
            .iter()
            .filter(|(conn, _)| conn.as_str() != connection_id)
            .map(|(conn, uid)| (conn.clone(), *uid))
            .collect();
        JoinOutcome {
            came_online: !already_online && !was_member,
            others,
        }
    }

    pub fn leave(&self, conversation_id: i64, connection_id: &str) -> Option<Departure> {
        let mut departure = None;
        self.rooms.remove_if_mut(&conversation_id, |_, room| {
            if let Some(user_id) = room.remove(connection_id) {
                let went_offline = !room.values().any(|uid| *uid == user_id);
                departure = Some(Departure {
                    conversation_id,
                    user_id,
                    went_offline,
                    remaining: room.keys().cloned().collect(),
                });
            }
            room.is_empty()
        });
        departure
    }

    /// Drop a disconnecting connection from every room it joined.
    pub fn leave_all(&self, connection_id: &str) -> Vec<Departure> {
        let joined: Vec<i64> = self
            .rooms
            .iter()
            .filter(|entry| entry.value().contains_key(connection_id))
            .map(|entry| *entry.key())
            .collect();
        joined
            .into_iter()
            .filter_map(|conversation_id| self.leave(conversation_id, connection_id))
            .collect()
    }

    pub fn is_member(&self, conversation_id: i64, connection_id: &str) -> bool {
        self.rooms
            .get(&conversation_id)
            .map(|room| room.contains_key(connection_id))
            .unwrap_or(false)
    }

    pub fn connections(&self, conversation_id: i64) -> Vec<String> {
        self.rooms
            .get(&conversation_id)
            .map(|room| room.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn members(&self, conversation_id: i64) -> Vec<(String, i64)> {
        self.rooms
            .get(&conversation_id)
            .map(|room| room.iter().map(|(c, u)| (c.clone(), *u)).collect())
            .unwrap_or_default()
    }

    pub fn is_user_online(&self, conversation_id: i64, user_id: i64) -> bool {
        self.rooms
            .get(&conversation_id)
            .map(|room| room.values().any(|uid| *uid == user_id))
            .unwrap_or(false)
    }
}

/// Broadcast the presence transition of a fresh join to the connections
/// that were already in the room.
pub fn announce_join(event_bus: &EventBus, conversation_id: i64, user_id: i64, outcome: &JoinOutcome) {
    if !outcome.came_online || outcome.others.is_empty() {
        return;
    }
    let payload = PrivatePresencePayload {
        conversation_id: conversation_id.to_string(),
        user_id: user_id.to_string(),
        is_online: true,
    };
    event_bus.dispatch_to_connections(
        EVENT_PRIVATE_PRESENCE,
        json!(payload),
        outcome.others.iter().map(|(conn, _)| conn.clone()).collect(),
    );
}

/// Broadcast offline transitions for a disconnecting connection.
pub fn announce_departures(event_bus: &EventBus, departures: &[Departure]) {
    for departure in departures {
        if !departure.went_offline || departure.remaining.is_empty() {
            continue;
        }
        let payload = PrivatePresencePayload {
            conversation_id: departure.conversation_id.to_string(),
            user_id: departure.user_id.to_string(),
            is_online: false,
        };
        event_bus.dispatch_to_connections(
            EVENT_PRIVATE_PRESENCE,
            json!(payload),
            departure.remaining.clone(),
        );
    }
}
