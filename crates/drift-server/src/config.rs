use anyhow::Result;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fs;

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub chat: ChatConfig,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Distinguishes id generators when several instances share a
    /// database.
    #[serde(default = "default_worker_id")]
    pub worker_id: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            worker_id: default_worker_id(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_url")]
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct AuthConfig {
    /// Shared secret with the external account system that issues tokens.
    #[serde(default = "generate_jwt_secret")]
    pub jwt_secret: String,
    #[serde(default = "default_jwt_expiry")]
    pub jwt_expiry_seconds: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: generate_jwt_secret(),
            jwt_expiry_seconds: default_jwt_expiry(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ChatConfig {
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,
    #[serde(default = "default_skip_block_ms")]
    pub skip_block_ms: u64,
    #[serde(default = "default_skip_cooldown_ms")]
    pub skip_cooldown_ms: u64,
    #[serde(default = "default_message_limit")]
    pub message_limit: usize,
    #[serde(default = "default_message_window_ms")]
    pub message_window_ms: u64,
    #[serde(default = "default_max_words")]
    pub max_words: usize,
    #[serde(default = "default_max_message_length")]
    pub max_message_length: usize,
    #[serde(default = "default_friend_request_ttl_days")]
    pub friend_request_ttl_days: i64,
    #[serde(default = "default_history_page_size")]
    pub history_page_size: i64,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            max_queue_size: default_max_queue_size(),
            skip_block_ms: default_skip_block_ms(),
            skip_cooldown_ms: default_skip_cooldown_ms(),
            message_limit: default_message_limit(),
            message_window_ms: default_message_window_ms(),
            max_words: default_max_words(),
            max_message_length: default_max_message_length(),
            friend_request_ttl_days: default_friend_request_ttl_days(),
            history_page_size: default_history_page_size(),
        }
    }
}

impl Config {
    /// Load the configuration, writing a fresh default file (with a
    /// generated JWT secret) when none exists yet.
    pub fn load(path: &str) -> Result<Self> {
        match fs::read_to_string(path) {
            Ok(contents) => Ok(toml::from_str(&contents)?),
            Err(_) => {
                let config = Config::default();
                if let Ok(serialized) = toml::to_string_pretty(&config) {
                    if fs::write(path, serialized).is_ok() {
                        harden_secret_file_permissions(path);
                        tracing::info!("wrote default configuration to {path}");
                    }
                }
                Ok(config)
            }
        }
    }

    pub fn app_config(&self) -> drift_core::AppConfig {
        drift_core::AppConfig {
            jwt_secret: self.auth.jwt_secret.clone(),
            jwt_expiry_seconds: self.auth.jwt_expiry_seconds,
            worker_id: self.server.worker_id,
            chat: drift_core::ChatConfig {
                max_queue_size: self.chat.max_queue_size,
                skip_block_ms: self.chat.skip_block_ms,
                skip_cooldown_ms: self.chat.skip_cooldown_ms,
                message_limit: self.chat.message_limit,
                message_window_ms: self.chat.message_window_ms,
                max_words: self.chat.max_words,
                max_message_length: self.chat.max_message_length,
                friend_request_ttl_days: self.chat.friend_request_ttl_days,
                history_page_size: self.chat.history_page_size,
            },
        }
    }
}

fn harden_secret_file_permissions(path: &str) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = fs::set_permissions(path, fs::Permissions::from_mode(0o600));
    }
    #[cfg(not(unix))]
    {
        let _ = path;
    }
}

fn generate_jwt_secret() -> String {
    let mut rng = rand::thread_rng();
    (0..64)
        .map(|_| format!("{:x}", rng.gen_range(0..16)))
        .collect()
}

fn default_bind_address() -> String {
    "0.0.0.0:8080".into()
}

fn default_worker_id() -> u16 {
    1
}

fn default_database_url() -> String {
    "sqlite://./data/drift.db?mode=rwc".into()
}

fn default_max_connections() -> u32 {
    10
}

fn default_jwt_expiry() -> u64 {
    86_400
}

fn default_max_queue_size() -> usize {
    1000
}

fn default_skip_block_ms() -> u64 {
    5000
}

fn default_skip_cooldown_ms() -> u64 {
    3000
}

fn default_message_limit() -> usize {
    5
}

fn default_message_window_ms() -> u64 {
    3000
}

fn default_max_words() -> usize {
    30
}

fn default_max_message_length() -> usize {
    500
}

fn default_friend_request_ttl_days() -> i64 {
    7
}

fn default_history_page_size() -> i64 {
    30
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_yields_full_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.server.bind_address, "0.0.0.0:8080");
        assert_eq!(config.chat.message_limit, 5);
        assert_eq!(config.chat.max_message_length, 500);
        assert_eq!(config.auth.jwt_secret.len(), 64);
    }

    #[test]
    fn partial_sections_override_only_named_fields() {
        let config: Config = toml::from_str(
            "[chat]\nmessage_limit = 10\n\n[server]\nbind_address = \"127.0.0.1:9000\"\n",
        )
        .unwrap();
        assert_eq!(config.chat.message_limit, 10);
        assert_eq!(config.chat.message_window_ms, 3000);
        assert_eq!(config.server.bind_address, "127.0.0.1:9000");
    }
}
