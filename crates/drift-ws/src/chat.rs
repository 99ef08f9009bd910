use axum::extract::ws::{Message, WebSocket};
use drift_core::error::CoreError;
use drift_core::AppState;
use drift_models::gateway::{
    GatewayFrame, TextNoticePayload, EVENT_ACCEPT_FRIEND_REQUEST, EVENT_FIND_MATCH,
    EVENT_FRIEND_ERROR, EVENT_MESSAGE, EVENT_RATE_LIMITED, EVENT_SEND_FRIEND_REQUEST,
    EVENT_SERVER_ERROR, EVENT_SKIP, EVENT_UPGRADE_IDENTITY,
};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::broadcast;
use tokio::time::Duration;
use uuid::Uuid;

use crate::limits::event_rate_limits;
use crate::session::{send_frame, Session};

/// One task per anonymous chat connection: inbound frames are dispatched
/// to the chat service, bus events filtered by session and forwarded out.
pub async fn handle_connection(socket: WebSocket, state: AppState) {
    let connection_id = Uuid::new_v4().to_string();
    let session = Session::chat(connection_id.clone());
    let mut event_rx = state.event_bus.subscribe();
    state.chat.register_connection(&connection_id);
    tracing::info!(connection_id = %connection_id, "chat connection established");

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
                        if event_rate_limits().check_key(&connection_id).is_err() {
                            let _ = send_frame(
                                &mut sender,
                                GatewayFrame::new(
                                    EVENT_RATE_LIMITED,
                                    json!(TextNoticePayload {
                                        message: "Too many events, slow down.".into(),
                                    }),
                                ),
                            )
                            .await;
                            continue;
                        }
                        handle_frame(&state, &connection_id, frame, &mut sender).await;
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

    tracing::info!(connection_id = %connection_id, disconnect_reason, "chat connection closed");
    state.chat.disconnect(&connection_id).await;
}

async fn handle_frame(
    state: &AppState,
    connection_id: &str,
    frame: GatewayFrame,
    sender: &mut (impl SinkExt<Message> + Unpin),
) {
    match frame.event.as_str() {
        EVENT_FIND_MATCH => state.chat.find_match(connection_id).await,
        EVENT_MESSAGE => {
            if let Some(text) = frame.data.as_ref().and_then(|d| d.as_str()) {
                state.chat.handle_message(connection_id, text).await;
            }
        }
        EVENT_SKIP => state.chat.skip(connection_id).await,
        EVENT_UPGRADE_IDENTITY => match frame.data.as_ref().and_then(|d| d.as_str()) {
            Some(token) => state.chat.upgrade_identity(connection_id, token).await,
            None => {
                let err = CoreError::BadRequest("Invalid token payload".into());
                let _ = send_frame(
                    sender,
                    GatewayFrame::new(EVENT_SERVER_ERROR, json!(err.to_socket_error())),
                )
                .await;
            }
        },
        EVENT_SEND_FRIEND_REQUEST => {
            if let Err(err) = state.chat.send_friend_request(connection_id).await {
                let _ = send_frame(
                    sender,
                    GatewayFrame::new(EVENT_FRIEND_ERROR, json!(err.to_socket_error())),
                )
                .await;
            }
        }
        EVENT_ACCEPT_FRIEND_REQUEST => {
            let request_id = frame
                .data
                .as_ref()
                .and_then(|d| d.as_str())
                .unwrap_or_default();
            if let Err(err) = state
                .chat
                .accept_friend_request(connection_id, request_id)
                .await
            {
                let _ = send_frame(
                    sender,
                    GatewayFrame::new(EVENT_FRIEND_ERROR, json!(err.to_socket_error())),
                )
                .await;
            }
        }
        other => {
            tracing::debug!(connection_id = %connection_id, event = other, "unknown chat event");
        }
    }
}
