use crate::{DbError, DbPool};

pub async fn are_friends(pool: &DbPool, user_id: i64, friend_id: i64) -> Result<bool, DbError> {
    let exists: Option<(i32,)> =
        sqlx::query_as("SELECT 1 FROM friendships WHERE user_id = ?1 AND friend_id = ?2 LIMIT 1")
            .bind(user_id)
            .bind(friend_id)
            .fetch_optional(pool)
            .await?;
    Ok(exists.is_some())
}

/// Insert the friendship in both directions; idempotent.
pub async fn add_friendship(pool: &DbPool, user_a: i64, user_b: i64) -> Result<(), DbError> {
    sqlx::query(
        "INSERT INTO friendships (user_id, friend_id)
         VALUES (?1, ?2), (?2, ?1)
         ON CONFLICT (user_id, friend_id) DO NOTHING",
    )
    .bind(user_a)
    .bind(user_b)
    .execute(pool)
    .await?;
    Ok(())
}

/// Delete both directions so the relationship is fully cleaned up.
pub async fn remove_friendship(pool: &DbPool, user_a: i64, user_b: i64) -> Result<(), DbError> {
    sqlx::query(
        "DELETE FROM friendships
         WHERE (user_id = ?1 AND friend_id = ?2) OR (user_id = ?2 AND friend_id = ?1)",
    )
    .bind(user_a)
    .bind(user_b)
    .execute(pool)
    .await?;
    Ok(())
}
