use crate::{DbError, DbPool};
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UserRow {
    pub id: i64,
    pub username: String,
    pub display_name: Option<String>,
    pub avatar_hash: Option<String>,
    pub created_at: DateTime<Utc>,
}

pub async fn create_user(pool: &DbPool, id: i64, username: &str) -> Result<UserRow, DbError> {
    let row = sqlx::query_as::<_, UserRow>(
        "INSERT INTO users (id, username)
         VALUES (?1, ?2)
         RETURNING id, username, display_name, avatar_hash, created_at",
    )
    .bind(id)
    .bind(username)
    .fetch_one(pool)
    .await?;
    Ok(row)
}

pub async fn get_user_by_id(pool: &DbPool, id: i64) -> Result<Option<UserRow>, DbError> {
    let row = sqlx::query_as::<_, UserRow>(
        "SELECT id, username, display_name, avatar_hash, created_at
         FROM users WHERE id = ?1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn get_users_by_ids(pool: &DbPool, ids: &[i64]) -> Result<Vec<UserRow>, DbError> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let placeholders: Vec<String> = (1..=ids.len()).map(|i| format!("?{}", i)).collect();
    let sql = format!(
        "SELECT id, username, display_name, avatar_hash, created_at
         FROM users WHERE id IN ({})",
        placeholders.join(", ")
    );
    let mut query = sqlx::query_as::<_, UserRow>(&sql);
    for id in ids {
        query = query.bind(id);
    }
    let rows = query.fetch_all(pool).await?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_and_fetch_user() {
        let pool = crate::test_pool().await;
        let user = create_user(&pool, 1, "ada").await.unwrap();
        assert_eq!(user.username, "ada");
        assert!(user.display_name.is_none());

        let fetched = get_user_by_id(&pool, 1).await.unwrap().unwrap();
        assert_eq!(fetched.id, 1);

        assert!(get_user_by_id(&pool, 99).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn fetch_many_by_ids() {
        let pool = crate::test_pool().await;
        create_user(&pool, 1, "ada").await.unwrap();
        create_user(&pool, 2, "lin").await.unwrap();
        let rows = get_users_by_ids(&pool, &[1, 2, 3]).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert!(get_users_by_ids(&pool, &[]).await.unwrap().is_empty());
    }
}
