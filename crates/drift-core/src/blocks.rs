use drift_db::blocks::{self, BlockRow, BlockedUserRow};
use drift_db::DbPool;
use drift_util::pagination::clamp_limit;

use crate::error::CoreError;

/// Matching, messaging, and conversation access are all denied while a
/// block exists in either direction.
pub async fn ensure_not_blocked(
    db: &DbPool,
    user_a: i64,
    user_b: i64,
    context: &str,
) -> Result<(), CoreError> {
    if blocks::is_blocked_either_direction(db, user_a, user_b).await? {
        return Err(CoreError::Forbidden(format!(
            "{context} is blocked between these users"
        )));
    }
    Ok(())
}

pub async fn block_user(
    db: &DbPool,
    blocker_id: i64,
    blocked_id: i64,
) -> Result<BlockRow, CoreError> {
    if blocker_id == blocked_id {
        return Err(CoreError::BadRequest("Cannot block yourself".into()));
    }
    if drift_db::users::get_user_by_id(db, blocked_id).await?.is_none() {
        return Err(CoreError::NotFound("User not found".into()));
    }
    Ok(blocks::block_user(db, blocker_id, blocked_id).await?)
}

pub async fn unblock_user(db: &DbPool, blocker_id: i64, blocked_id: i64) -> Result<(), CoreError> {
    if blocker_id == blocked_id {
        return Err(CoreError::BadRequest("Cannot unblock yourself".into()));
    }
    if !blocks::unblock_user(db, blocker_id, blocked_id).await? {
        return Err(CoreError::NotFound("Block relation not found".into()));
    }
    Ok(())
}

pub async fn list_blocked(
    db: &DbPool,
    blocker_id: i64,
    limit: Option<i64>,
) -> Result<Vec<BlockedUserRow>, CoreError> {
    Ok(blocks::list_blocked(db, blocker_id, clamp_limit(limit, 50)).await?)
}
