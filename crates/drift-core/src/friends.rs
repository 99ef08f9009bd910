use chrono::{Duration, Utc};
use drift_db::friend_requests::{self, AcceptOutcome, FriendRequestRow};
use drift_db::DbPool;

use crate::error::CoreError;

/// Create a pending friend request from one user to another. At most one
/// pending request may exist per unordered pair; both the pre-check and
/// the unique index report it as a conflict.
pub async fn send_request(
    db: &DbPool,
    request_id: i64,
    from_user_id: i64,
    to_user_id: i64,
    ttl_days: i64,
) -> Result<FriendRequestRow, CoreError> {
    if from_user_id == to_user_id {
        return Err(CoreError::Conflict(
            "Cannot send a friend request to yourself".into(),
        ));
    }
    if drift_db::blocks::is_blocked_either_direction(db, from_user_id, to_user_id).await? {
        return Err(CoreError::Forbidden(
            "Friend requests are blocked between these users".into(),
        ));
    }
    if friend_requests::find_pending_by_pair(db, from_user_id, to_user_id)
        .await?
        .is_some()
    {
        return Err(CoreError::Conflict("Friend request already pending".into()));
    }

    let expires_at = Utc::now() + Duration::days(ttl_days);
    match friend_requests::create_request(db, request_id, from_user_id, to_user_id, expires_at).await
    {
        Ok(row) => Ok(row),
        // Lost the race against a concurrent request for the same pair.
        Err(err) if err.is_unique_violation() => {
            Err(CoreError::Conflict("Friend request already pending".into()))
        }
        Err(err) => Err(err.into()),
    }
}

/// Accept a pending request as `user_id` and record the friendship. The
/// status flip and both friendship rows commit in one transaction.
pub async fn accept_request(
    db: &DbPool,
    request_id: i64,
    user_id: i64,
) -> Result<FriendRequestRow, CoreError> {
    match friend_requests::accept_request(db, request_id, user_id).await? {
        AcceptOutcome::Accepted(row) => Ok(row),
        AcceptOutcome::NotFound => Err(CoreError::NotFound("Request not found".into())),
        AcceptOutcome::NotTarget => Err(CoreError::Forbidden(
            "Not authorized to accept this request".into(),
        )),
        AcceptOutcome::AlreadyHandled => Err(CoreError::Conflict("Request already handled".into())),
    }
}

pub async fn are_friends(db: &DbPool, user_a: i64, user_b: i64) -> Result<bool, CoreError> {
    Ok(drift_db::friendships::are_friends(db, user_a, user_b).await?)
}
