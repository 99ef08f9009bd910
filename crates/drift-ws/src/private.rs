use axum::extract::ws::{Message, WebSocket};
use drift_core::error::CoreError;
use drift_core::AppState;
use drift_models::gateway::{
    GatewayFrame, EVENT_BLOCK_USER, EVENT_DELETE_PRIVATE_CONVERSATION, EVENT_LIST_BLOCKED_USERS,
    EVENT_LIST_PRIVATE_CONVERSATIONS, EVENT_LOAD_PRIVATE_MESSAGES, EVENT_MARK_READ,
    EVENT_OPEN_PRIVATE_CHAT, EVENT_PRIVATE_ERROR, EVENT_SEND_PRIVATE_MESSAGE, EVENT_STOPPED_TYPING,
    EVENT_TYPING, EVENT_UNBLOCK_USER,
};
use futures_util::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde_json::json;
use tokio::sync::broadcast;
use tokio::time::Duration;
use uuid::Uuid;

use crate::limits::event_rate_limits;
use crate::session::{send_frame, Session};

/// One task per authenticated private-chat connection. Every handler
/// failure is converted into a `private_error` frame; the connection is
/// never torn down for a handled error.
pub async fn handle_connection(socket: WebSocket, state: AppState, user_id: i64) {
    let connection_id = Uuid::new_v4().to_string();
    let session = Session::private(connection_id.clone(), user_id);
    let mut event_rx = state.event_bus.subscribe();
    tracing::info!(connection_id = %connection_id, user_id, "private connection established");

    let (mut sender, mut receiver) = socket.split();
    let mut ping_interval = tokio::time::interval(Duration::from_secs(20));
    ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    let disconnect_reason = loop {
        tokio::select! {
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let Ok(frame) = serde_json::from_str::<GatewayFrame>(&text) else {
                            tracing::debug!(connection_id = %connection_id, "dropping unparseable frame");
                            continue;
                        };
                        let result = if event_rate_limits().check_key(&connection_id).is_err() {
                            Err(CoreError::RateLimited("Too many events, slow down.".into()))
                        } else {
                            handle_frame(&state, &connection_id, user_id, frame).await
                        };
                        if let Err(err) = result {
                            if matches!(err, CoreError::Database(_) | CoreError::Internal(_)) {
                                tracing::error!(
                                    connection_id = %connection_id,
                                    user_id,
                                    "private handler failed: {err}"
                                );
                            }
                            let frame = GatewayFrame::new(
                                EVENT_PRIVATE_ERROR,
                                json!(err.to_socket_error()),
                            );
                            if send_frame(&mut sender, frame).await.is_err() {
                                break "websocket send error";
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) => break "client close frame",
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break "websocket receive error",
                    None => break "websocket stream ended",
                }
            }
            event = event_rx.recv() => {
                match event {
                    Ok(event) => {
                        if !session.should_receive_event(&event) {
                            continue;
                        }
                        let frame = GatewayFrame::new(&event.event_type, event.payload);
                        if send_frame(&mut sender, frame).await.is_err() {
                            break "websocket send error";
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(
                            connection_id = %connection_id,
                            skipped,
                            "event stream lagged; dropping connection"
                        );
                        break "event stream lagged";
                    }
                    Err(broadcast::error::RecvError::Closed) => break "event stream closed",
                }
            }
            _ = ping_interval.tick() => {
                if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break "websocket ping send error";
                }
            }
        }
    };

    tracing::info!(connection_id = %connection_id, user_id, disconnect_reason, "private connection closed");
    state.private.disconnect(&connection_id);
}

fn parse_request<T: DeserializeOwned>(frame: &GatewayFrame) -> Result<T, CoreError> {
    let data = frame
        .data
        .clone()
        .ok_or_else(|| CoreError::BadRequest("Missing request payload".into()))?;
    serde_json::from_value(data).map_err(|_| CoreError::BadRequest("Invalid request payload".into()))
}

fn parse_optional<T: DeserializeOwned + Default>(frame: &GatewayFrame) -> Result<T, CoreError> {
    match frame.data.clone() {
        Some(data) => serde_json::from_value(data)
            .map_err(|_| CoreError::BadRequest("Invalid request payload".into())),
        None => Ok(T::default()),
    }
}

async fn handle_frame(
    state: &AppState,
    connection_id: &str,
    user_id: i64,
    frame: GatewayFrame,
) -> Result<(), CoreError> {
    match frame.event.as_str() {
        EVENT_OPEN_PRIVATE_CHAT => {
            let request = parse_request(&frame)?;
            state
                .private
                .open_private_chat(connection_id, user_id, request)
                .await
        }
        EVENT_SEND_PRIVATE_MESSAGE => {
            let request = parse_request(&frame)?;
            state
                .private
                .send_private_message(connection_id, user_id, request)
                .await
        }
        EVENT_LOAD_PRIVATE_MESSAGES => {
            let request = parse_request(&frame)?;
            state
                .private
                .load_private_messages(connection_id, user_id, request)
                .await
        }
        EVENT_LIST_PRIVATE_CONVERSATIONS => {
            let request = parse_optional(&frame)?;
            state
                .private
                .list_private_conversations(connection_id, user_id, request)
                .await
        }
        EVENT_MARK_READ => {
            let request = parse_request(&frame)?;
            state.private.mark_read(connection_id, user_id, request).await
        }
        EVENT_DELETE_PRIVATE_CONVERSATION => {
            let request = parse_request(&frame)?;
            state
                .private
                .delete_private_conversation(connection_id, user_id, request)
                .await
        }
        EVENT_TYPING => {
            let request = parse_request(&frame)?;
            state.private.typing(connection_id, user_id, request, true).await
        }
        EVENT_STOPPED_TYPING => {
            let request = parse_request(&frame)?;
            state
                .private
                .typing(connection_id, user_id, request, false)
                .await
        }
        EVENT_BLOCK_USER => {
            let request = parse_request(&frame)?;
            state.private.block_user(connection_id, user_id, request).await
        }
        EVENT_UNBLOCK_USER => {
            let request = parse_request(&frame)?;
            state
                .private
                .unblock_user(connection_id, user_id, request)
                .await
        }
        EVENT_LIST_BLOCKED_USERS => {
            let request = parse_optional(&frame)?;
            state
                .private
                .list_blocked_users(connection_id, user_id, request)
                .await
        }
        other => {
            tracing::debug!(connection_id = %connection_id, event = other, "unknown private event");
            Ok(())
        }
    }
}
