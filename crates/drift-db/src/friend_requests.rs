use crate::{DbError, DbPool};
use chrono::{DateTime, Utc};
use drift_models::conversation::pair_key;
use drift_models::friend::FriendRequestStatus;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct FriendRequestRow {
    pub id: i64,
    pub from_user_id: i64,
    pub to_user_id: i64,
    pub pair_key: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl FriendRequestRow {
    pub fn parsed_status(&self) -> Option<FriendRequestStatus> {
        FriendRequestStatus::parse(&self.status)
    }
}

/// Outcome of the transactional accept; the service layer maps these to
/// user-facing errors.
#[derive(Debug)]
pub enum AcceptOutcome {
    Accepted(FriendRequestRow),
    NotFound,
    NotTarget,
    AlreadyHandled,
}

const COLUMNS: &str = "id, from_user_id, to_user_id, pair_key, status, created_at, expires_at";

/// Create a pending request. A second pending request for the same pair,
/// in either direction, trips the partial unique index; callers translate
/// that with `DbError::is_unique_violation`.
pub async fn create_request(
    pool: &DbPool,
    id: i64,
    from_user_id: i64,
    to_user_id: i64,
    expires_at: DateTime<Utc>,
) -> Result<FriendRequestRow, DbError> {
    let row = sqlx::query_as::<_, FriendRequestRow>(&format!(
        "INSERT INTO friend_requests (id, from_user_id, to_user_id, pair_key, status, expires_at)
         VALUES (?1, ?2, ?3, ?4, 'pending', ?5)
         RETURNING {COLUMNS}"
    ))
    .bind(id)
    .bind(from_user_id)
    .bind(to_user_id)
    .bind(pair_key(from_user_id, to_user_id))
    .bind(expires_at)
    .fetch_one(pool)
    .await?;
    Ok(row)
}

/// Fetch a request, lazily flipping it to `expired` first if its pending
/// TTL has lapsed. There is no background sweeper; expiry is always
/// applied at the moment a request is next touched.
pub async fn get_request(pool: &DbPool, id: i64) -> Result<Option<FriendRequestRow>, DbError> {
    sqlx::query(
        "UPDATE friend_requests SET status = 'expired'
         WHERE id = ?1 AND status = 'pending'
           AND expires_at IS NOT NULL AND datetime(expires_at) <= datetime('now')",
    )
    .bind(id)
    .execute(pool)
    .await?;

    let row = sqlx::query_as::<_, FriendRequestRow>(&format!(
        "SELECT {COLUMNS} FROM friend_requests WHERE id = ?1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn find_pending_by_pair(
    pool: &DbPool,
    user_a: i64,
    user_b: i64,
) -> Result<Option<FriendRequestRow>, DbError> {
    let row = sqlx::query_as::<_, FriendRequestRow>(&format!(
        "SELECT {COLUMNS} FROM friend_requests
         WHERE pair_key = ?1 AND status = 'pending'
           AND (expires_at IS NULL OR datetime(expires_at) > datetime('now'))"
    ))
    .bind(pair_key(user_a, user_b))
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// Accept a request and record the friendship, in one transaction so the
/// status flip and both friendship rows commit together.
pub async fn accept_request(
    pool: &DbPool,
    request_id: i64,
    user_id: i64,
) -> Result<AcceptOutcome, DbError> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        "UPDATE friend_requests SET status = 'expired'
         WHERE id = ?1 AND status = 'pending'
           AND expires_at IS NOT NULL AND datetime(expires_at) <= datetime('now')",
    )
    .bind(request_id)
    .execute(&mut *tx)
    .await?;

    let row = sqlx::query_as::<_, FriendRequestRow>(&format!(
        "SELECT {COLUMNS} FROM friend_requests WHERE id = ?1"
    ))
    .bind(request_id)
    .fetch_optional(&mut *tx)
    .await?;

    let Some(row) = row else {
        return Ok(AcceptOutcome::NotFound);
    };
    if row.to_user_id != user_id {
        return Ok(AcceptOutcome::NotTarget);
    }
    if row.parsed_status() != Some(FriendRequestStatus::Pending) {
        return Ok(AcceptOutcome::AlreadyHandled);
    }

    let accepted = sqlx::query_as::<_, FriendRequestRow>(&format!(
        "UPDATE friend_requests SET status = 'accepted', expires_at = NULL
         WHERE id = ?1
         RETURNING {COLUMNS}"
    ))
    .bind(request_id)
    .fetch_one(&mut *tx)
    .await?;

    sqlx::query(
        "INSERT INTO friendships (user_id, friend_id)
         VALUES (?1, ?2), (?2, ?1)
         ON CONFLICT (user_id, friend_id) DO NOTHING",
    )
    .bind(accepted.from_user_id)
    .bind(accepted.to_user_id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(AcceptOutcome::Accepted(accepted))
}

/// Cancel the pair's pending request, if any. Used when one side blocks
/// the other.
pub async fn cancel_pending_for_pair(
    pool: &DbPool,
    user_a: i64,
    user_b: i64,
) -> Result<u64, DbError> {
    let result = sqlx::query(
        "UPDATE friend_requests SET status = 'cancelled', expires_at = NULL
         WHERE pair_key = ?1 AND status = 'pending'",
    )
    .bind(pair_key(user_a, user_b))
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn next_week() -> DateTime<Utc> {
        Utc::now() + Duration::days(7)
    }

    #[tokio::test]
    async fn one_pending_request_per_pair_either_direction() {
        let pool = crate::test_pool().await;
        create_request(&pool, 1, 10, 20, next_week()).await.unwrap();

        let dup = create_request(&pool, 2, 20, 10, next_week()).await;
        let err = dup.expect_err("duplicate pending must fail");
        assert!(err.is_unique_violation());

        // After the first resolves, a new request may be created.
        let outcome = accept_request(&pool, 1, 20).await.unwrap();
        assert!(matches!(outcome, AcceptOutcome::Accepted(_)));
        create_request(&pool, 3, 20, 10, next_week()).await.unwrap();
    }

    #[tokio::test]
    async fn accept_guards_target_and_status() {
        let pool = crate::test_pool().await;
        create_request(&pool, 5, 10, 20, next_week()).await.unwrap();

        assert!(matches!(
            accept_request(&pool, 99, 20).await.unwrap(),
            AcceptOutcome::NotFound
        ));
        assert!(matches!(
            accept_request(&pool, 5, 10).await.unwrap(),
            AcceptOutcome::NotTarget
        ));

        let outcome = accept_request(&pool, 5, 20).await.unwrap();
        let AcceptOutcome::Accepted(row) = outcome else {
            panic!("expected accept");
        };
        assert_eq!(row.status, "accepted");
        assert!(row.expires_at.is_none());
        assert!(crate::friendships::are_friends(&pool, 10, 20).await.unwrap());
        assert!(crate::friendships::are_friends(&pool, 20, 10).await.unwrap());

        assert!(matches!(
            accept_request(&pool, 5, 20).await.unwrap(),
            AcceptOutcome::AlreadyHandled
        ));
    }

    #[tokio::test]
    async fn overdue_pending_request_expires_lazily() {
        let pool = crate::test_pool().await;
        let past = Utc::now() - Duration::hours(1);
        create_request(&pool, 7, 10, 20, past).await.unwrap();

        let row = get_request(&pool, 7).await.unwrap().unwrap();
        assert_eq!(row.status, "expired");

        assert!(matches!(
            accept_request(&pool, 7, 20).await.unwrap(),
            AcceptOutcome::AlreadyHandled
        ));
        assert!(!crate::friendships::are_friends(&pool, 10, 20).await.unwrap());

        // An expired request no longer occupies the pending slot.
        create_request(&pool, 8, 20, 10, next_week()).await.unwrap();
    }

    #[tokio::test]
    async fn cancel_clears_only_pending() {
        let pool = crate::test_pool().await;
        create_request(&pool, 9, 10, 20, next_week()).await.unwrap();
        assert_eq!(cancel_pending_for_pair(&pool, 20, 10).await.unwrap(), 1);
        let row = get_request(&pool, 9).await.unwrap().unwrap();
        assert_eq!(row.status, "cancelled");
        assert_eq!(cancel_pending_for_pair(&pool, 20, 10).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn pending_lookup_by_pair() {
        let pool = crate::test_pool().await;
        assert!(find_pending_by_pair(&pool, 10, 20).await.unwrap().is_none());
        create_request(&pool, 11, 10, 20, next_week()).await.unwrap();
        let found = find_pending_by_pair(&pool, 20, 10).await.unwrap().unwrap();
        assert_eq!(found.id, 11);
    }
}
