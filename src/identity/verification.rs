//! Single-use, expiring tokens bound to an identifier.

use chrono::Utc;
use std::time::Duration;

use super::error::bounded;
use super::secrets::{generate_token, hash_token};
use super::AuthError;
use crate::DbPool;

#[derive(Clone)]
pub struct VerificationStore {
    db: DbPool,
    timeout: Duration,
}

impl VerificationStore {
    pub fn new(db: DbPool, timeout: Duration) -> Self {
        Self { db, timeout }
    }

    /// Issue a token for `identifier`, replacing any earlier one.
    /// Only the hash is stored; the raw token is returned once.
    pub async fn issue(&self, identifier: &str, lifetime: chrono::Duration) -> Result<String, AuthError> {
        bounded(self.timeout, "issue_verification", async {
            let token = generate_token();
            let now = Utc::now();

            let mut tx = self.db.begin().await?;

            sqlx::query("DELETE FROM verifications WHERE identifier = ?")
                .bind(identifier)
                .execute(&mut *tx)
                .await?;

            sqlx::query(
                r#"
                INSERT INTO verifications (id, identifier, value_hash, expires_at, created_at, updated_at)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(uuid::Uuid::new_v4().to_string())
            .bind(identifier)
            .bind(hash_token(&token))
            .bind(now + lifetime)
            .bind(now)
            .bind(now)
            .execute(&mut *tx)
            .await?;

            tx.commit().await?;

            Ok(token)
        })
        .await
    }

    /// Consume a token. True only for the first caller presenting an
    /// unexpired token issued for `identifier`.
    pub async fn consume(&self, identifier: &str, token: &str) -> Result<bool, AuthError> {
        let value_hash = hash_token(token);
        bounded(self.timeout, "consume_verification", async {
            let result = sqlx::query(
                "DELETE FROM verifications WHERE identifier = ? AND value_hash = ? AND expires_at > ?",
            )
            .bind(identifier)
            .bind(&value_hash)
            .bind(Utc::now())
            .execute(&self.db)
            .await?;
            Ok(result.rows_affected() == 1)
        })
        .await
    }

    pub async fn purge_expired(&self) -> Result<u64, AuthError> {
        bounded(self.timeout, "purge_verifications", async {
            let result = sqlx::query("DELETE FROM verifications WHERE expires_at <= ?")
                .bind(Utc::now())
                .execute(&self.db)
                .await?;
            Ok(result.rows_affected())
        })
        .await
    }
}
