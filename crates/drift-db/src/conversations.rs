use crate::{DbError, DbPool};
use chrono::{DateTime, Utc};
use drift_models::conversation::{ordered_pair, pair_key, ConversationKind};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ConversationRow {
    pub id: i64,
    pub kind: i64,
    pub participant_a: i64,
    pub participant_b: i64,
    pub pair_key: String,
    pub is_active: bool,
    pub last_message_sender_id: Option<i64>,
    pub last_message_content: Option<String>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ConversationRow {
    pub fn kind(&self) -> Option<ConversationKind> {
        ConversationKind::from_i64(self.kind)
    }

    pub fn participants(&self) -> [i64; 2] {
        [self.participant_a, self.participant_b]
    }

    pub fn involves(&self, user_id: i64) -> bool {
        self.participant_a == user_id || self.participant_b == user_id
    }

    pub fn other_participant(&self, user_id: i64) -> Option<i64> {
        if self.participant_a == user_id {
            Some(self.participant_b)
        } else if self.participant_b == user_id {
            Some(self.participant_a)
        } else {
            None
        }
    }
}

const COLUMNS: &str = "id, kind, participant_a, participant_b, pair_key, is_active, \
                       last_message_sender_id, last_message_content, last_message_at, \
                       created_at, updated_at";

pub async fn create_ephemeral(
    pool: &DbPool,
    id: i64,
    user_a: i64,
    user_b: i64,
) -> Result<ConversationRow, DbError> {
    let (low, high) = ordered_pair(user_a, user_b);
    let row = sqlx::query_as::<_, ConversationRow>(&format!(
        "INSERT INTO conversations (id, kind, participant_a, participant_b, pair_key)
         VALUES (?1, 0, ?2, ?3, ?4)
         RETURNING {COLUMNS}"
    ))
    .bind(id)
    .bind(low)
    .bind(high)
    .bind(pair_key(user_a, user_b))
    .fetch_one(pool)
    .await?;
    Ok(row)
}

/// Find the durable conversation for a pair, creating it if absent.
/// The pair-key unique index makes concurrent callers converge on one
/// row; reopening always reactivates it.
pub async fn find_or_create_durable(
    pool: &DbPool,
    id: i64,
    user_a: i64,
    user_b: i64,
) -> Result<ConversationRow, DbError> {
    let (low, high) = ordered_pair(user_a, user_b);
    let row = sqlx::query_as::<_, ConversationRow>(&format!(
        "INSERT INTO conversations (id, kind, participant_a, participant_b, pair_key)
         VALUES (?1, 1, ?2, ?3, ?4)
         ON CONFLICT (pair_key) WHERE kind = 1
         DO UPDATE SET is_active = 1, updated_at = datetime('now')
         RETURNING {COLUMNS}"
    ))
    .bind(id)
    .bind(low)
    .bind(high)
    .bind(pair_key(user_a, user_b))
    .fetch_one(pool)
    .await?;
    Ok(row)
}

pub async fn get_conversation(pool: &DbPool, id: i64) -> Result<Option<ConversationRow>, DbError> {
    let row = sqlx::query_as::<_, ConversationRow>(&format!(
        "SELECT {COLUMNS} FROM conversations WHERE id = ?1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn set_active(pool: &DbPool, id: i64, active: bool) -> Result<(), DbError> {
    sqlx::query("UPDATE conversations SET is_active = ?2 WHERE id = ?1")
        .bind(id)
        .bind(active)
        .execute(pool)
        .await?;
    Ok(())
}

/// Denormalize the latest message onto the conversation and bump
/// `updated_at` so conversation listings sort by recency.
pub async fn touch_last_message(
    pool: &DbPool,
    id: i64,
    sender_id: i64,
    content: &str,
    at: DateTime<Utc>,
) -> Result<(), DbError> {
    sqlx::query(
        "UPDATE conversations
         SET last_message_sender_id = ?2,
             last_message_content = ?3,
             last_message_at = ?4,
             updated_at = ?4
         WHERE id = ?1",
    )
    .bind(id)
    .bind(sender_id)
    .bind(content)
    .bind(at)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn hide_for_user(pool: &DbPool, id: i64, user_id: i64) -> Result<(), DbError> {
    sqlx::query(
        "INSERT INTO conversation_hidden (conversation_id, user_id)
         VALUES (?1, ?2)
         ON CONFLICT (conversation_id, user_id) DO NOTHING",
    )
    .bind(id)
    .bind(user_id)
    .execute(pool)
    .await?;
    sqlx::query("UPDATE conversations SET is_active = 0 WHERE id = ?1")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn unhide_for_user(pool: &DbPool, id: i64, user_id: i64) -> Result<(), DbError> {
    sqlx::query("DELETE FROM conversation_hidden WHERE conversation_id = ?1 AND user_id = ?2")
        .bind(id)
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// A new message revives the conversation for everyone who hid it.
pub async fn unhide_all(pool: &DbPool, id: i64) -> Result<(), DbError> {
    sqlx::query("DELETE FROM conversation_hidden WHERE conversation_id = ?1")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn hidden_user_ids(pool: &DbPool, id: i64) -> Result<Vec<i64>, DbError> {
    let rows: Vec<(i64,)> =
        sqlx::query_as("SELECT user_id FROM conversation_hidden WHERE conversation_id = ?1")
            .bind(id)
            .fetch_all(pool)
            .await?;
    Ok(rows.into_iter().map(|(id,)| id).collect())
}

pub async fn is_hidden_for(pool: &DbPool, id: i64, user_id: i64) -> Result<bool, DbError> {
    let exists: Option<(i32,)> = sqlx::query_as(
        "SELECT 1 FROM conversation_hidden WHERE conversation_id = ?1 AND user_id = ?2 LIMIT 1",
    )
    .bind(id)
    .bind(user_id)
    .fetch_optional(pool)
    .await?;
    Ok(exists.is_some())
}

pub async fn list_durable_for_user(
    pool: &DbPool,
    user_id: i64,
    limit: i64,
) -> Result<Vec<ConversationRow>, DbError> {
    let rows = sqlx::query_as::<_, ConversationRow>(&format!(
        "SELECT {COLUMNS} FROM conversations c
         WHERE c.kind = 1
           AND (c.participant_a = ?1 OR c.participant_b = ?1)
           AND NOT EXISTS (
               SELECT 1 FROM conversation_hidden h
               WHERE h.conversation_id = c.id AND h.user_id = ?1
           )
         ORDER BY datetime(c.updated_at) DESC, c.id DESC
         LIMIT ?2"
    ))
    .bind(user_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Hard delete; messages and receipts go with it via the FK cascade.
pub async fn delete_conversation(pool: &DbPool, id: i64) -> Result<(), DbError> {
    sqlx::query("DELETE FROM conversations WHERE id = ?1")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ephemeral_conversations_are_not_pair_unique() {
        let pool = crate::test_pool().await;
        create_ephemeral(&pool, 10, 2, 1).await.unwrap();
        let second = create_ephemeral(&pool, 11, 1, 2).await.unwrap();
        assert_eq!(second.id, 11);
        assert_eq!(second.participant_a, 1);
        assert_eq!(second.participant_b, 2);
    }

    #[tokio::test]
    async fn durable_conversation_is_unique_per_pair() {
        let pool = crate::test_pool().await;
        let first = find_or_create_durable(&pool, 20, 5, 3).await.unwrap();
        let second = find_or_create_durable(&pool, 21, 3, 5).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.pair_key, "3#5");
        assert!(second.is_active);
    }

    #[tokio::test]
    async fn reopening_reactivates_a_deactivated_conversation() {
        let pool = crate::test_pool().await;
        let convo = find_or_create_durable(&pool, 30, 1, 2).await.unwrap();
        set_active(&pool, convo.id, false).await.unwrap();
        let reopened = find_or_create_durable(&pool, 31, 1, 2).await.unwrap();
        assert_eq!(reopened.id, convo.id);
        assert!(reopened.is_active);
    }

    #[tokio::test]
    async fn hide_and_unhide_track_per_user() {
        let pool = crate::test_pool().await;
        let convo = find_or_create_durable(&pool, 40, 1, 2).await.unwrap();

        hide_for_user(&pool, convo.id, 1).await.unwrap();
        assert!(is_hidden_for(&pool, convo.id, 1).await.unwrap());
        assert!(!is_hidden_for(&pool, convo.id, 2).await.unwrap());
        assert_eq!(hidden_user_ids(&pool, convo.id).await.unwrap(), vec![1]);

        // Hiding is idempotent.
        hide_for_user(&pool, convo.id, 1).await.unwrap();
        assert_eq!(hidden_user_ids(&pool, convo.id).await.unwrap().len(), 1);

        unhide_all(&pool, convo.id).await.unwrap();
        assert!(hidden_user_ids(&pool, convo.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn listing_excludes_hidden_and_ephemeral() {
        let pool = crate::test_pool().await;
        let durable = find_or_create_durable(&pool, 50, 1, 2).await.unwrap();
        create_ephemeral(&pool, 51, 1, 3).await.unwrap();
        let hidden = find_or_create_durable(&pool, 52, 1, 4).await.unwrap();
        hide_for_user(&pool, hidden.id, 1).await.unwrap();

        let listed = list_durable_for_user(&pool, 1, 50).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, durable.id);

        // The other participant still sees the hidden conversation.
        let for_other = list_durable_for_user(&pool, 4, 50).await.unwrap();
        assert_eq!(for_other.len(), 1);
    }

    #[tokio::test]
    async fn delete_cascades_to_messages() {
        let pool = crate::test_pool().await;
        let convo = find_or_create_durable(&pool, 60, 1, 2).await.unwrap();
        crate::messages::create_message(&pool, 61, convo.id, 1, "hello")
            .await
            .unwrap();

        delete_conversation(&pool, convo.id).await.unwrap();
        assert!(get_conversation(&pool, convo.id).await.unwrap().is_none());
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM messages")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }
}
