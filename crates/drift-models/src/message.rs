use serde::{Deserialize, Serialize};

/// Wire shape of a persisted private message.
///
/// `created_at` is unix milliseconds; ids are stringified snowflakes so
/// browser clients never hit the 53-bit integer cliff.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrivateMessage {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub content: String,
    pub created_at: i64,
    pub read_by: Vec<String>,
}
