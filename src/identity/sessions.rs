//! Session issuance, validation with sliding renewal, and revocation.
//!
//! A session is Active until it either goes unused past `expires_at`
//! (Expired) or is deleted by logout or a ban (Revoked). Both end states
//! are terminal: the row is gone and the token never validates again.

use chrono::{DateTime, Utc};
use sqlx::{Executor, Sqlite};
use std::time::Duration;
use tokio::time::interval;

use super::error::bounded;
use super::secrets::{generate_token, hash_token, is_well_formed_token};
use super::verification::VerificationStore;
use super::AuthError;
use crate::config::AuthConfig;
use crate::db::{RequestContext, Session, User};
use crate::DbPool;

/// Lifetime and renewal granularity of sessions.
#[derive(Debug, Clone, Copy)]
pub struct SessionPolicy {
    pub lifetime: chrono::Duration,
    /// A session is only extended once its last renewal is older than this.
    pub renewal: chrono::Duration,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            lifetime: chrono::Duration::days(7),
            renewal: chrono::Duration::hours(24),
        }
    }
}

impl SessionPolicy {
    pub fn from_config(config: &AuthConfig) -> Self {
        Self {
            lifetime: chrono::Duration::seconds(config.session_lifetime_seconds),
            renewal: chrono::Duration::seconds(config.session_renewal_seconds),
        }
    }
}

/// A freshly issued session together with the only copy of its raw token.
#[derive(Debug, Clone)]
pub struct IssuedSession {
    pub token: String,
    pub session: Session,
}

/// Who is making a request.
#[derive(Debug, Clone)]
pub enum Identity {
    Authenticated { user: User, session: Session },
    Anonymous,
}

impl Identity {
    pub fn user(&self) -> Option<&User> {
        match self {
            Identity::Authenticated { user, .. } => Some(user),
            Identity::Anonymous => None,
        }
    }
}

#[derive(Clone)]
pub struct SessionManager {
    db: DbPool,
    policy: SessionPolicy,
    timeout: Duration,
}

impl SessionManager {
    pub fn new(db: DbPool, policy: SessionPolicy, timeout: Duration) -> Self {
        Self { db, policy, timeout }
    }

    pub fn policy(&self) -> SessionPolicy {
        self.policy
    }

    pub async fn issue(&self, user_id: &str, context: &RequestContext) -> Result<IssuedSession, AuthError> {
        bounded(self.timeout, "issue_session", async {
            let token = generate_token();
            let now = Utc::now();
            let session = Session {
                id: uuid::Uuid::new_v4().to_string(),
                token_hash: hash_token(&token),
                user_id: user_id.to_string(),
                expires_at: now + self.policy.lifetime,
                created_at: now,
                updated_at: now,
                ip_address: context.ip_address.clone(),
                user_agent: context.user_agent.clone(),
            };

            sqlx::query(
                r#"
                INSERT INTO sessions (id, token_hash, user_id, expires_at, created_at, updated_at, ip_address, user_agent)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&session.id)
            .bind(&session.token_hash)
            .bind(&session.user_id)
            .bind(session.expires_at)
            .bind(session.created_at)
            .bind(session.updated_at)
            .bind(&session.ip_address)
            .bind(&session.user_agent)
            .execute(&self.db)
            .await?;

            tracing::debug!(user_id = %user_id, session_id = %session.id, "Issued session");
            Ok(IssuedSession { token, session })
        })
        .await
    }

    /// Resolve a token to its user and session, extending the session when
    /// the last renewal is older than the renewal granularity.
    pub async fn validate(&self, token: &str) -> Result<(User, Session), AuthError> {
        if !is_well_formed_token(token) {
            return Err(AuthError::SessionInvalid);
        }
        let token_hash = hash_token(token);

        bounded(self.timeout, "validate_session", async {
            // Session and owner are read from one snapshot, so a ban that
            // commits in between is seen either entirely or not at all.
            let mut tx = self.db.begin().await?;
            let session: Option<Session> =
                sqlx::query_as("SELECT * FROM sessions WHERE token_hash = ?")
                    .bind(&token_hash)
                    .fetch_optional(&mut *tx)
                    .await?;
            let Some(session) = session else {
                return Err(AuthError::SessionInvalid);
            };
            let user: Option<User> = sqlx::query_as("SELECT * FROM users WHERE id = ?")
                .bind(&session.user_id)
                .fetch_optional(&mut *tx)
                .await?;
            tx.commit().await?;

            let now = Utc::now();

            if session.is_expired_at(now) {
                self.delete_by_id(&session.id).await?;
                tracing::debug!(session_id = %session.id, "Session expired");
                return Err(AuthError::SessionExpired);
            }

            let Some(user) = user else {
                self.delete_by_id(&session.id).await?;
                return Err(AuthError::SessionInvalid);
            };

            if now - session.updated_at > self.policy.renewal {
                let session = self.renew(session, now).await?;
                return Ok((user, session));
            }

            Ok((user, session))
        })
        .await
    }

    /// `Anonymous` when no token was presented; a presented token must validate.
    pub async fn resolve(&self, token: Option<&str>) -> Result<Identity, AuthError> {
        match token {
            None => Ok(Identity::Anonymous),
            Some(token) => {
                let (user, session) = self.validate(token).await?;
                Ok(Identity::Authenticated { user, session })
            }
        }
    }

    /// Delete the session behind `token`. Unknown tokens are fine.
    pub async fn revoke(&self, token: &str) -> Result<(), AuthError> {
        let token_hash = hash_token(token);
        bounded(self.timeout, "revoke_session", async {
            let result = sqlx::query("DELETE FROM sessions WHERE token_hash = ?")
                .bind(&token_hash)
                .execute(&self.db)
                .await?;
            if result.rows_affected() > 0 {
                tracing::debug!("Revoked session");
            }
            Ok(())
        })
        .await
    }

    pub async fn revoke_all_for_user(&self, user_id: &str) -> Result<u64, AuthError> {
        bounded(self.timeout, "revoke_user_sessions", async {
            let removed = delete_user_sessions(&self.db, user_id).await?;
            tracing::info!(user_id = %user_id, removed = removed, "Revoked all sessions for user");
            Ok(removed)
        })
        .await
    }

    /// Delete every session past its expiry. Returns the number removed.
    pub async fn purge_expired(&self) -> Result<u64, AuthError> {
        bounded(self.timeout, "purge_sessions", async {
            let result = sqlx::query("DELETE FROM sessions WHERE expires_at < ?")
                .bind(Utc::now())
                .execute(&self.db)
                .await?;
            Ok(result.rows_affected())
        })
        .await
    }

    /// Extend the session, conditional on nobody having renewed it since the
    /// threshold. Losing that race means another request already did the
    /// work, so the stored row is authoritative.
    async fn renew(&self, session: Session, now: DateTime<Utc>) -> Result<Session, AuthError> {
        let expires_at = now + self.policy.lifetime;
        let threshold = now - self.policy.renewal;

        let result = sqlx::query(
            "UPDATE sessions SET expires_at = ?, updated_at = ? WHERE id = ? AND updated_at < ?",
        )
        .bind(expires_at)
        .bind(now)
        .bind(&session.id)
        .bind(threshold)
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 1 {
            tracing::debug!(session_id = %session.id, "Renewed session");
            return Ok(Session {
                expires_at,
                updated_at: now,
                ..session
            });
        }

        let current: Option<Session> = sqlx::query_as("SELECT * FROM sessions WHERE id = ?")
            .bind(&session.id)
            .fetch_optional(&self.db)
            .await?;
        current.ok_or(AuthError::SessionInvalid)
    }

    async fn delete_by_id(&self, id: &str) -> Result<(), AuthError> {
        sqlx::query("DELETE FROM sessions WHERE id = ?")
            .bind(id)
            .execute(&self.db)
            .await?;
        Ok(())
    }
}

/// Delete every session owned by `user_id` on any executor, so callers can
/// fold the purge into their own transaction.
pub(crate) async fn delete_user_sessions<'e, E>(executor: E, user_id: &str) -> Result<u64, AuthError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query("DELETE FROM sessions WHERE user_id = ?")
        .bind(user_id)
        .execute(executor)
        .await?;
    Ok(result.rows_affected())
}

/// Spawn a background task that periodically deletes expired sessions
pub fn spawn_purge_task(sessions: SessionManager, verifications: VerificationStore, every: Duration) {
    tokio::spawn(async move {
        let mut ticker = interval(every);
        // The first tick completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match sessions.purge_expired().await {
                Ok(0) => tracing::debug!("Session sweep found nothing to remove"),
                Ok(removed) => tracing::info!(removed = removed, "Purged expired sessions"),
                Err(e) => tracing::warn!(error = %e, "Session sweep failed"),
            }
            match verifications.purge_expired().await {
                Ok(0) => {}
                Ok(removed) => tracing::info!(removed = removed, "Purged expired verification tokens"),
                Err(e) => tracing::warn!(error = %e, "Verification sweep failed"),
            }
        }
    });
}
