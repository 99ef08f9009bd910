pub mod auth;
pub mod blocks;
pub mod chat;
pub mod cooldown;
pub mod error;
pub mod events;
pub mod friends;
pub mod gate;
pub mod presence;
pub mod private;
pub mod queue;
pub mod rooms;

use std::sync::Arc;

use drift_db::DbPool;
use drift_models::user::UserProfile;

use chat::ChatService;
use events::EventBus;
use presence::PresenceRegistry;
use private::PrivateService;

/// Tunables for the matchmaking and gating behavior of the chat
/// namespace. Defaults match the production configuration.
#[derive(Clone, Debug)]
pub struct ChatConfig {
    pub max_queue_size: usize,
    /// How long a skipped pair stays excluded from re-matching.
    pub skip_block_ms: u64,
    /// Minimum wall-clock gap between two skips from one connection.
    pub skip_cooldown_ms: u64,
    /// Sliding-window message admission: at most `message_limit` messages
    /// per `message_window_ms`.
    pub message_limit: usize,
    pub message_window_ms: u64,
    pub max_words: usize,
    pub max_message_length: usize,
    pub friend_request_ttl_days: i64,
    /// Default (and promotion-time) history page size.
    pub history_page_size: i64,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 1000,
            skip_block_ms: 5000,
            skip_cooldown_ms: 3000,
            message_limit: 5,
            message_window_ms: 3000,
            max_words: 30,
            max_message_length: 500,
            friend_request_ttl_days: 7,
            history_page_size: 30,
        }
    }
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub jwt_secret: String,
    pub jwt_expiry_seconds: u64,
    pub worker_id: u16,
    pub chat: ChatConfig,
}

/// Cached public profiles for the hot listing/presence paths.
pub type ProfileCache = moka::sync::Cache<i64, UserProfile>;

/// Build the profile cache with a 5-minute TTL and 10k max entries.
pub fn build_profile_cache() -> ProfileCache {
    moka::sync::Cache::builder()
        .max_capacity(10_000)
        .time_to_live(std::time::Duration::from_secs(300))
        .build()
}

#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    pub event_bus: EventBus,
    pub config: Arc<AppConfig>,
    pub chat: Arc<ChatService>,
    pub private: Arc<PrivateService>,
    pub presence: Arc<PresenceRegistry>,
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;
    use crate::events::ServerEvent;
    use std::time::Duration;
    use tokio::sync::broadcast::Receiver;

    pub(crate) async fn test_state() -> AppState {
        test_state_with(ChatConfig::default()).await
    }

    pub(crate) async fn test_state_with(chat: ChatConfig) -> AppState {
        let db = drift_db::create_pool("sqlite::memory:", 1).await.unwrap();
        drift_db::run_migrations(&db).await.unwrap();
        AppState::new(
            db,
            AppConfig {
                jwt_secret: "test-secret".into(),
                jwt_expiry_seconds: 3600,
                worker_id: 1,
                chat,
            },
        )
    }

    /// Wait for the next event of the given type, skipping others.
    pub(crate) async fn next_event(rx: &mut Receiver<ServerEvent>, event_type: &str) -> ServerEvent {
        loop {
            let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
                .await
                .unwrap_or_else(|_| panic!("timed out waiting for {event_type}"))
                .expect("event bus closed");
            if event.event_type == event_type {
                return event;
            }
        }
    }

    /// Wait for the next event of the given type addressed to a specific
    /// connection.
    pub(crate) async fn next_event_for(
        rx: &mut Receiver<ServerEvent>,
        event_type: &str,
        connection_id: &str,
    ) -> ServerEvent {
        loop {
            let event = next_event(rx, event_type).await;
            if event.is_for_connection(connection_id) {
                return event;
            }
        }
    }

    /// Assert that no event of the given type arrives within the window.
    pub(crate) async fn assert_no_event(rx: &mut Receiver<ServerEvent>, event_type: &str) {
        let deadline = tokio::time::sleep(Duration::from_millis(150));
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                event = rx.recv() => {
                    if let Ok(event) = event {
                        assert_ne!(event.event_type, event_type, "unexpected {event_type} event");
                    }
                }
                () = &mut deadline => return,
            }
        }
    }
}

impl AppState {
    pub fn new(db: DbPool, config: AppConfig) -> Self {
        let config = Arc::new(config);
        let event_bus = EventBus::default();
        let presence = Arc::new(PresenceRegistry::new());
        let chat = Arc::new(ChatService::new(
            db.clone(),
            event_bus.clone(),
            Arc::clone(&presence),
            Arc::clone(&config),
        ));
        let private = Arc::new(PrivateService::new(
            db.clone(),
            event_bus.clone(),
            Arc::clone(&presence),
            build_profile_cache(),
            Arc::clone(&config),
        ));
        Self {
            db,
            event_bus,
            config,
            chat,
            private,
            presence,
        }
    }
}
