use tokio::sync::broadcast;

/// Delivery scope for a server event.
#[derive(Debug, Clone)]
pub enum EventTarget {
    /// Every live connection on the chat namespace (e.g. `online_count`).
    ChatNamespace,
    /// Specific connections, on either namespace.
    Connections(Vec<String>),
}

#[derive(Debug, Clone)]
pub struct ServerEvent {
    pub event_type: String,
    pub payload: serde_json::Value,
    pub target: EventTarget,
}

impl ServerEvent {
    pub fn is_for_connection(&self, connection_id: &str) -> bool {
        match &self.target {
            EventTarget::ChatNamespace => false,
            EventTarget::Connections(ids) => ids.iter().any(|id| id == connection_id),
        }
    }
}

/// Broadcast-based event bus for real-time dispatch. Every connection task
/// subscribes and filters by target; publishing never blocks.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ServerEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn publish(&self, event: ServerEvent) {
        // Ignore error if no receivers
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.sender.subscribe()
    }

    /// Helper: deliver an event to a set of connections.
    pub fn dispatch_to_connections(
        &self,
        event_type: &str,
        payload: serde_json::Value,
        connection_ids: Vec<String>,
    ) {
        self.publish(ServerEvent {
            event_type: event_type.to_string(),
            payload,
            target: EventTarget::Connections(connection_ids),
        });
    }

    /// Helper: deliver an event to every chat-namespace connection.
    pub fn dispatch_chat_namespace(&self, event_type: &str, payload: serde_json::Value) {
        self.publish(ServerEvent {
            event_type: event_type.to_string(),
            payload,
            target: EventTarget::ChatNamespace,
        });
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(4096)
    }
}
