use crate::{DbError, DbPool};
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct BlockRow {
    pub blocker_id: i64,
    pub blocked_id: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct BlockedUserRow {
    pub blocked_id: i64,
    pub username: String,
    pub created_at: DateTime<Utc>,
}

pub async fn is_blocked_either_direction(
    pool: &DbPool,
    user_a: i64,
    user_b: i64,
) -> Result<bool, DbError> {
    let exists: Option<(i32,)> = sqlx::query_as(
        "SELECT 1 FROM user_blocks
         WHERE (blocker_id = ?1 AND blocked_id = ?2)
            OR (blocker_id = ?2 AND blocked_id = ?1)
         LIMIT 1",
    )
    .bind(user_a)
    .bind(user_b)
    .fetch_optional(pool)
    .await?;
    Ok(exists.is_some())
}

/// Record a block. In the same transaction the friendship is removed in
/// both directions and the pair's pending friend request is cancelled.
pub async fn block_user(
    pool: &DbPool,
    blocker_id: i64,
    blocked_id: i64,
) -> Result<BlockRow, DbError> {
    let mut tx = pool.begin().await?;

    let row = sqlx::query_as::<_, BlockRow>(
        "INSERT INTO user_blocks (blocker_id, blocked_id)
         VALUES (?1, ?2)
         ON CONFLICT (blocker_id, blocked_id) DO UPDATE SET blocker_id = blocker_id
         RETURNING blocker_id, blocked_id, created_at",
    )
    .bind(blocker_id)
    .bind(blocked_id)
    .fetch_one(&mut *tx)
    .await?;

    sqlx::query(
        "DELETE FROM friendships
         WHERE (user_id = ?1 AND friend_id = ?2) OR (user_id = ?2 AND friend_id = ?1)",
    )
    .bind(blocker_id)
    .bind(blocked_id)
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        "UPDATE friend_requests SET status = 'cancelled', expires_at = NULL
         WHERE pair_key = ?1 AND status = 'pending'",
    )
    .bind(drift_models::conversation::pair_key(blocker_id, blocked_id))
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(row)
}

/// Returns false when no block existed.
pub async fn unblock_user(pool: &DbPool, blocker_id: i64, blocked_id: i64) -> Result<bool, DbError> {
    let result = sqlx::query("DELETE FROM user_blocks WHERE blocker_id = ?1 AND blocked_id = ?2")
        .bind(blocker_id)
        .bind(blocked_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn list_blocked(
    pool: &DbPool,
    blocker_id: i64,
    limit: i64,
) -> Result<Vec<BlockedUserRow>, DbError> {
    let rows = sqlx::query_as::<_, BlockedUserRow>(
        "SELECT b.blocked_id, u.username, b.created_at
         FROM user_blocks b
         INNER JOIN users u ON u.id = b.blocked_id
         WHERE b.blocker_id = ?1
         ORDER BY b.created_at DESC, b.blocked_id DESC
         LIMIT ?2",
    )
    .bind(blocker_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}
