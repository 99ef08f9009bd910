use crate::{DbError, DbPool};
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MessageRow {
    pub id: i64,
    pub conversation_id: i64,
    pub sender_id: i64,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ReceiptRow {
    pub message_id: i64,
    pub user_id: i64,
    pub delivered_at: Option<DateTime<Utc>>,
    pub read_at: Option<DateTime<Utc>>,
}

pub async fn create_message(
    pool: &DbPool,
    id: i64,
    conversation_id: i64,
    sender_id: i64,
    content: &str,
) -> Result<MessageRow, DbError> {
    let row = sqlx::query_as::<_, MessageRow>(
        "INSERT INTO messages (id, conversation_id, sender_id, content)
         VALUES (?1, ?2, ?3, ?4)
         RETURNING id, conversation_id, sender_id, content, created_at",
    )
    .bind(id)
    .bind(conversation_id)
    .bind(sender_id)
    .bind(content)
    .fetch_one(pool)
    .await?;
    Ok(row)
}

pub async fn get_message(pool: &DbPool, id: i64) -> Result<Option<MessageRow>, DbError> {
    let row = sqlx::query_as::<_, MessageRow>(
        "SELECT id, conversation_id, sender_id, content, created_at
         FROM messages WHERE id = ?1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// One page of history, newest first. `before` is a strict upper bound on
/// the message id (the pagination cursor).
pub async fn list_page(
    pool: &DbPool,
    conversation_id: i64,
    before: Option<i64>,
    limit: i64,
) -> Result<Vec<MessageRow>, DbError> {
    let rows = match before {
        Some(before_id) => {
            sqlx::query_as::<_, MessageRow>(
                "SELECT id, conversation_id, sender_id, content, created_at
                 FROM messages
                 WHERE conversation_id = ?1 AND id < ?2
                 ORDER BY id DESC LIMIT ?3",
            )
            .bind(conversation_id)
            .bind(before_id)
            .bind(limit)
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query_as::<_, MessageRow>(
                "SELECT id, conversation_id, sender_id, content, created_at
                 FROM messages
                 WHERE conversation_id = ?1
                 ORDER BY id DESC LIMIT ?2",
            )
            .bind(conversation_id)
            .bind(limit)
            .fetch_all(pool)
            .await?
        }
    };
    Ok(rows)
}

/// Record a read receipt. Returns false when the message does not exist in
/// the conversation or was sent by the reader themselves. Receipts are
/// monotonic: existing timestamps are never overwritten.
pub async fn mark_read(
    pool: &DbPool,
    message_id: i64,
    conversation_id: i64,
    user_id: i64,
) -> Result<bool, DbError> {
    let result = sqlx::query(
        "INSERT INTO message_receipts (message_id, user_id, delivered_at, read_at)
         SELECT m.id, ?2, datetime('now'), datetime('now')
         FROM messages m
         WHERE m.id = ?1 AND m.conversation_id = ?3 AND m.sender_id != ?2
         ON CONFLICT (message_id, user_id) DO UPDATE SET
             delivered_at = COALESCE(message_receipts.delivered_at, excluded.delivered_at),
             read_at = COALESCE(message_receipts.read_at, excluded.read_at)",
    )
    .bind(message_id)
    .bind(user_id)
    .bind(conversation_id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Like `mark_read`, but only fills the delivery timestamp.
pub async fn mark_delivered(
    pool: &DbPool,
    message_id: i64,
    conversation_id: i64,
    user_id: i64,
) -> Result<bool, DbError> {
    let result = sqlx::query(
        "INSERT INTO message_receipts (message_id, user_id, delivered_at, read_at)
         SELECT m.id, ?2, datetime('now'), NULL
         FROM messages m
         WHERE m.id = ?1 AND m.conversation_id = ?3 AND m.sender_id != ?2
         ON CONFLICT (message_id, user_id) DO UPDATE SET
             delivered_at = COALESCE(message_receipts.delivered_at, excluded.delivered_at)",
    )
    .bind(message_id)
    .bind(user_id)
    .bind(conversation_id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Catch-up on open: mark every message from the other participant as
/// delivered and read for `user_id`.
pub async fn mark_conversation_read(
    pool: &DbPool,
    conversation_id: i64,
    user_id: i64,
) -> Result<u64, DbError> {
    let result = sqlx::query(
        "INSERT INTO message_receipts (message_id, user_id, delivered_at, read_at)
         SELECT m.id, ?2, datetime('now'), datetime('now')
         FROM messages m
         WHERE m.conversation_id = ?1 AND m.sender_id != ?2
         ON CONFLICT (message_id, user_id) DO UPDATE SET
             delivered_at = COALESCE(message_receipts.delivered_at, excluded.delivered_at),
             read_at = COALESCE(message_receipts.read_at, excluded.read_at)",
    )
    .bind(conversation_id)
    .bind(user_id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

/// Messages from the other participant that `user_id` has not read yet.
pub async fn unread_count(
    pool: &DbPool,
    conversation_id: i64,
    user_id: i64,
) -> Result<i64, DbError> {
    let (count,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*)
         FROM messages m
         WHERE m.conversation_id = ?1
           AND m.sender_id != ?2
           AND NOT EXISTS (
               SELECT 1 FROM message_receipts r
               WHERE r.message_id = m.id AND r.user_id = ?2 AND r.read_at IS NOT NULL
           )",
    )
    .bind(conversation_id)
    .bind(user_id)
    .fetch_one(pool)
    .await?;
    Ok(count)
}

/// `(message_id, reader_id)` pairs for a page of messages, for building
/// the wire `readBy` sets.
pub async fn read_receipts_for_messages(
    pool: &DbPool,
    message_ids: &[i64],
) -> Result<Vec<(i64, i64)>, DbError> {
    if message_ids.is_empty() {
        return Ok(Vec::new());
    }
    let placeholders: Vec<String> = (1..=message_ids.len()).map(|i| format!("?{}", i)).collect();
    let sql = format!(
        "SELECT message_id, user_id FROM message_receipts
         WHERE read_at IS NOT NULL AND message_id IN ({})",
        placeholders.join(", ")
    );
    let mut query = sqlx::query_as::<_, (i64, i64)>(&sql);
    for id in message_ids {
        query = query.bind(id);
    }
    let rows = query.fetch_all(pool).await?;
    Ok(rows)
}

pub async fn get_receipt(
    pool: &DbPool,
    message_id: i64,
    user_id: i64,
) -> Result<Option<ReceiptRow>, DbError> {
    let row = sqlx::query_as::<_, ReceiptRow>(
        "SELECT message_id, user_id, delivered_at, read_at
         FROM message_receipts WHERE message_id = ?1 AND user_id = ?2",
    )
    .bind(message_id)
    .bind(user_id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup_conversation(pool: &DbPool) -> i64 {
        crate::conversations::find_or_create_durable(pool, 100, 1, 2)
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn page_respects_cursor_and_order() {
        let pool = crate::test_pool().await;
        let convo = setup_conversation(&pool).await;
        for i in 0..5 {
            create_message(&pool, 200 + i, convo, 1, &format!("msg {i}"))
                .await
                .unwrap();
        }

        let page = list_page(&pool, convo, None, 50).await.unwrap();
        assert_eq!(page.len(), 5);
        assert!(page[0].id > page[1].id);

        let older = list_page(&pool, convo, Some(203), 50).await.unwrap();
        assert_eq!(older.len(), 3);
        assert!(older.iter().all(|m| m.id < 203));

        let limited = list_page(&pool, convo, None, 2).await.unwrap();
        assert_eq!(limited.len(), 2);
    }

    #[tokio::test]
    async fn mark_read_is_monotonic_and_idempotent() {
        let pool = crate::test_pool().await;
        let convo = setup_conversation(&pool).await;
        create_message(&pool, 300, convo, 1, "hi").await.unwrap();

        assert!(mark_read(&pool, 300, convo, 2).await.unwrap());
        let first = get_receipt(&pool, 300, 2).await.unwrap().unwrap();
        assert!(first.read_at.is_some());
        assert!(first.delivered_at.is_some());

        assert!(mark_read(&pool, 300, convo, 2).await.unwrap());
        let second = get_receipt(&pool, 300, 2).await.unwrap().unwrap();
        assert_eq!(second.read_at, first.read_at);
        assert_eq!(second.delivered_at, first.delivered_at);
    }

    #[tokio::test]
    async fn mark_delivered_never_clears_read() {
        let pool = crate::test_pool().await;
        let convo = setup_conversation(&pool).await;
        create_message(&pool, 310, convo, 1, "hi").await.unwrap();

        assert!(mark_read(&pool, 310, convo, 2).await.unwrap());
        assert!(mark_delivered(&pool, 310, convo, 2).await.unwrap());
        let receipt = get_receipt(&pool, 310, 2).await.unwrap().unwrap();
        assert!(receipt.read_at.is_some());
    }

    #[tokio::test]
    async fn mark_read_rejects_own_and_foreign_messages() {
        let pool = crate::test_pool().await;
        let convo = setup_conversation(&pool).await;
        create_message(&pool, 320, convo, 1, "hi").await.unwrap();

        // Sender cannot read-receipt their own message.
        assert!(!mark_read(&pool, 320, convo, 1).await.unwrap());
        // Wrong conversation id.
        assert!(!mark_read(&pool, 320, convo + 1, 2).await.unwrap());
        // Missing message.
        assert!(!mark_read(&pool, 999, convo, 2).await.unwrap());
    }

    #[tokio::test]
    async fn unread_count_tracks_read_receipts() {
        let pool = crate::test_pool().await;
        let convo = setup_conversation(&pool).await;
        create_message(&pool, 330, convo, 1, "a").await.unwrap();
        create_message(&pool, 331, convo, 1, "b").await.unwrap();
        create_message(&pool, 332, convo, 2, "mine").await.unwrap();

        assert_eq!(unread_count(&pool, convo, 2).await.unwrap(), 2);
        mark_read(&pool, 330, convo, 2).await.unwrap();
        assert_eq!(unread_count(&pool, convo, 2).await.unwrap(), 1);

        let caught_up = mark_conversation_read(&pool, convo, 2).await.unwrap();
        assert!(caught_up >= 1);
        assert_eq!(unread_count(&pool, convo, 2).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn read_receipts_projection_covers_requested_page() {
        let pool = crate::test_pool().await;
        let convo = setup_conversation(&pool).await;
        create_message(&pool, 340, convo, 1, "a").await.unwrap();
        create_message(&pool, 341, convo, 1, "b").await.unwrap();
        mark_read(&pool, 340, convo, 2).await.unwrap();
        mark_delivered(&pool, 341, convo, 2).await.unwrap();

        let receipts = read_receipts_for_messages(&pool, &[340, 341]).await.unwrap();
        assert_eq!(receipts, vec![(340, 2)]);
        assert!(read_receipts_for_messages(&pool, &[]).await.unwrap().is_empty());
    }
}
