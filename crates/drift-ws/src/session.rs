use axum::extract::ws::Message;
use drift_core::events::{EventTarget, ServerEvent};
use drift_models::gateway::GatewayFrame;
use futures_util::SinkExt;

/// Per-connection session record. `user_id` is set only on the private
/// namespace, where the handshake is authenticated; chat-namespace
/// identity lives in the chat service and may be upgraded mid-session.
pub struct Session {
    pub connection_id: String,
    pub user_id: Option<i64>,
}

impl Session {
    pub fn chat(connection_id: String) -> Self {
        Self {
            connection_id,
            user_id: None,
        }
    }

    pub fn private(connection_id: String, user_id: i64) -> Self {
        Self {
            connection_id,
            user_id: Some(user_id),
        }
    }

    /// Chat-namespace broadcasts reach chat sessions only; targeted
    /// events reach the named connections on either namespace.
    pub fn should_receive_event(&self, event: &ServerEvent) -> bool {
        match &event.target {
            EventTarget::ChatNamespace => self.user_id.is_none(),
            EventTarget::Connections(_) => event.is_for_connection(&self.connection_id),
        }
    }
}

pub async fn send_frame(
    sender: &mut (impl SinkExt<Message> + Unpin),
    frame: GatewayFrame,
) -> Result<(), ()> {
    let text = match serde_json::to_string(&frame) {
        Ok(text) => text,
        Err(err) => {
            tracing::error!("failed to serialize outbound frame: {err}");
            return Ok(());
        }
    };
    sender.send(Message::Text(text.into())).await.map_err(|_| ())
}
