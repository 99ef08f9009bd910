use drift_models::gateway::{
    SocketErrorPayload, CODE_BAD_REQUEST, CODE_CONFLICT, CODE_FORBIDDEN, CODE_INTERNAL_ERROR,
    CODE_NOT_FOUND, CODE_RATE_LIMITED, CODE_UNAUTHORIZED,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("database error: {0}")]
    Database(#[from] drift_db::DbError),
    #[error("internal error: {0}")]
    Internal(String),
}

impl CoreError {
    pub fn status_code(&self) -> u16 {
        match self {
            Self::BadRequest(_) => 400,
            Self::Unauthorized(_) => 401,
            Self::Forbidden(_) => 403,
            Self::NotFound(_) => 404,
            Self::Conflict(_) => 409,
            Self::RateLimited(_) => 429,
            Self::Database(_) | Self::Internal(_) => 500,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => CODE_BAD_REQUEST,
            Self::Unauthorized(_) => CODE_UNAUTHORIZED,
            Self::Forbidden(_) => CODE_FORBIDDEN,
            Self::NotFound(_) => CODE_NOT_FOUND,
            Self::Conflict(_) => CODE_CONFLICT,
            Self::RateLimited(_) => CODE_RATE_LIMITED,
            Self::Database(_) | Self::Internal(_) => CODE_INTERNAL_ERROR,
        }
    }

    /// Wire payload for `server_error` / `friend_error` / `private_error`.
    /// Database and internal failures are logged server-side and masked on
    /// the wire.
    pub fn to_socket_error(&self) -> SocketErrorPayload {
        let status_code = self.status_code();
        let message = match self {
            Self::Database(err) => {
                tracing::error!("database error surfaced to client: {err}");
                "Something went wrong.".to_string()
            }
            Self::Internal(err) => {
                tracing::error!("internal error surfaced to client: {err}");
                "Something went wrong.".to_string()
            }
            Self::BadRequest(msg)
            | Self::Unauthorized(msg)
            | Self::Forbidden(msg)
            | Self::NotFound(msg)
            | Self::Conflict(msg)
            | Self::RateLimited(msg) => msg.clone(),
        };
        SocketErrorPayload {
            code: self.code().to_string(),
            message,
            status_code,
            retryable: status_code >= 500 || matches!(self, Self::RateLimited(_)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_only_for_rate_limits_and_server_faults() {
        assert!(CoreError::RateLimited("slow down".into())
            .to_socket_error()
            .retryable);
        assert!(CoreError::Internal("boom".into()).to_socket_error().retryable);
        assert!(!CoreError::Forbidden("no".into()).to_socket_error().retryable);
        assert!(!CoreError::NotFound("gone".into()).to_socket_error().retryable);
    }

    #[test]
    fn internal_details_are_masked() {
        let payload = CoreError::Internal("connection pool exhausted".into()).to_socket_error();
        assert_eq!(payload.status_code, 500);
        assert_eq!(payload.message, "Something went wrong.");
    }

    #[test]
    fn codes_match_statuses() {
        let err = CoreError::Conflict("dup".into());
        let payload = err.to_socket_error();
        assert_eq!(payload.code, "CONFLICT");
        assert_eq!(payload.status_code, 409);
        assert_eq!(payload.message, "dup");
    }
}
