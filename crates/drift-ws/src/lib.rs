mod chat;
mod limits;
mod private;
mod session;

use axum::{
    extract::{ws::WebSocketUpgrade, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::get,
    Router,
};
use drift_core::AppState;
use serde::Deserialize;

pub fn gateway_router() -> Router<AppState> {
    Router::new()
        .route("/gateway/chat", get(chat_upgrade))
        .route("/gateway/private", get(private_upgrade))
}

async fn chat_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| chat::handle_connection(socket, state))
}

#[derive(Deserialize)]
struct PrivateHandshake {
    token: Option<String>,
}

/// The private namespace requires a valid bearer token at connection
/// time; a bad handshake is rejected before the WebSocket is accepted.
async fn private_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(handshake): Query<PrivateHandshake>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, (StatusCode, &'static str)> {
    let token = handshake
        .token
        .clone()
        .or_else(|| {
            headers
                .get(header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "))
                .map(str::to_string)
        })
        .ok_or((StatusCode::UNAUTHORIZED, "Missing bearer token"))?;

    let claims = drift_core::auth::validate_token(&token, &state.config.jwt_secret)
        .map_err(|_| (StatusCode::UNAUTHORIZED, "Invalid or expired token"))?;
    let user = drift_db::users::get_user_by_id(&state.db, claims.sub)
        .await
        .map_err(|_| (StatusCode::INTERNAL_SERVER_ERROR, "Database error"))?
        .ok_or((StatusCode::UNAUTHORIZED, "Unknown user"))?;

    Ok(ws.on_upgrade(move |socket| private::handle_connection(socket, state, user.id)))
}
