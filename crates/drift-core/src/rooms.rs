use std::collections::HashMap;
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct Room {
    pub room_id: String,
    pub connections: [String; 2],
    pub conversation_id: Option<i64>,
    pub created_at: Instant,
}

impl Room {
    pub fn partner_of(&self, connection_id: &str) -> Option<&str> {
        let [a, b] = &self.connections;
        if a == connection_id {
            Some(b)
        } else if b == connection_id {
            Some(a)
        } else {
            None
        }
    }
}

/// Deterministic, order-independent room id for a connection pair.
pub fn room_id_for(a: &str, b: &str) -> String {
    if a <= b {
        format!("{a}#{b}")
    } else {
        format!("{b}#{a}")
    }
}

/// Owns the room map and the connection -> room reverse index. Mutated
/// only under the chat service's state lock.
#[derive(Debug, Default)]
pub struct RoomManager {
    rooms: HashMap<String, Room>,
    by_connection: HashMap<String, String>,
}

impl RoomManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a room for two connections. A connection already owning a
    /// room is a violation of the 1:1 connection-room invariant and a
    /// programming error, not a recoverable condition.
    pub fn create_room(&mut self, a: &str, b: &str, conversation_id: Option<i64>) -> Room {
        assert!(
            !self.by_connection.contains_key(a) && !self.by_connection.contains_key(b),
            "connection already owns a room"
        );
        let room_id = room_id_for(a, b);
        let room = Room {
            room_id: room_id.clone(),
            connections: [a.to_string(), b.to_string()],
            conversation_id,
            created_at: Instant::now(),
        };
        self.by_connection.insert(a.to_string(), room_id.clone());
        self.by_connection.insert(b.to_string(), room_id.clone());
        self.rooms.insert(room_id, room.clone());
        room
    }

    pub fn room_by_connection(&self, connection_id: &str) -> Option<&Room> {
        let room_id = self.by_connection.get(connection_id)?;
        self.rooms.get(room_id)
    }

    pub fn remove_room(&mut self, room_id: &str) -> Option<Room> {
        let room = self.rooms.remove(room_id)?;
        let [a, b] = &room.connections;
        self.by_connection.remove(a);
        self.by_connection.remove(b);
        Some(room)
    }

    pub fn set_conversation(&mut self, room_id: &str, conversation_id: i64) {
        if let Some(room) = self.rooms.get_mut(room_id) {
            room.conversation_id = Some(conversation_id);
        }
    }

    pub fn active_room_count(&self) -> usize {
        self.rooms.len()
    }
}
