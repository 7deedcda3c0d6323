//! Failure taxonomy for the identity core.

use chrono::{DateTime, Utc};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("an account with this email already exists")]
    DuplicateEmail,

    #[error("password must be at least {min_length} characters")]
    WeakPassword { min_length: usize },

    /// Unknown email and wrong password are deliberately the same failure.
    #[error("invalid email or password")]
    InvalidCredentials,

    #[error("user not found")]
    UserNotFound,

    #[error("session has expired")]
    SessionExpired,

    #[error("session is not valid")]
    SessionInvalid,

    #[error("forbidden")]
    Forbidden,

    /// Target of an administrative operation does not exist.
    #[error("not found")]
    NotFound,

    #[error("account is banned: {reason}")]
    BannedAccount {
        reason: String,
        expires_at: Option<DateTime<Utc>>,
    },

    #[error("{field}: {message}")]
    Validation {
        field: &'static str,
        message: String,
    },

    #[error("service unavailable")]
    ServiceUnavailable,

    #[error("internal error")]
    Internal,
}

impl AuthError {
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            field,
            message: message.into(),
        }
    }
}

impl From<sqlx::Error> for AuthError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                tracing::error!(error = %err, "Storage unavailable");
                AuthError::ServiceUnavailable
            }
            sqlx::Error::Database(db_err)
                if db_err.is_unique_violation() && db_err.message().contains("users.email") =>
            {
                AuthError::DuplicateEmail
            }
            _ => {
                tracing::error!(error = %err, "Storage error");
                AuthError::Internal
            }
        }
    }
}

impl From<tokio::task::JoinError> for AuthError {
    fn from(err: tokio::task::JoinError) -> Self {
        tracing::error!(error = %err, "Blocking task failed");
        AuthError::Internal
    }
}

/// Run a storage operation under `limit`; running out of time is reported
/// as `ServiceUnavailable`.
pub(crate) async fn bounded<T, F>(limit: Duration, operation: &'static str, fut: F) -> Result<T, AuthError>
where
    F: Future<Output = Result<T, AuthError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => {
            tracing::error!(
                operation = operation,
                timeout_ms = limit.as_millis() as u64,
                "Storage call timed out"
            );
            Err(AuthError::ServiceUnavailable)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bounded_passes_through_result() {
        let ok = bounded(Duration::from_secs(1), "noop", async { Ok::<_, AuthError>(7) }).await;
        assert_eq!(ok.unwrap(), 7);

        let err = bounded(Duration::from_secs(1), "noop", async {
            Err::<(), _>(AuthError::NotFound)
        })
        .await;
        assert!(matches!(err, Err(AuthError::NotFound)));
    }

    #[tokio::test]
    async fn test_bounded_times_out_as_unavailable() {
        let result = bounded(Duration::from_millis(10), "slow", async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, AuthError>(())
        })
        .await;
        assert!(matches!(result, Err(AuthError::ServiceUnavailable)));
    }

    #[test]
    fn test_pool_timeout_maps_to_unavailable() {
        let err: AuthError = sqlx::Error::PoolTimedOut.into();
        assert!(matches!(err, AuthError::ServiceUnavailable));

        let err: AuthError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, AuthError::Internal));
    }
}
