//! Credential store: user records and password verification.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;

use super::error::bounded;
use super::secrets::PasswordHasher;
use super::validation::{check_password, normalize_email, normalize_name, PASSWORD_FLOOR};
use super::AuthError;
use crate::db::{Role, User, CREDENTIAL_PROVIDER};
use crate::DbPool;

#[derive(Clone)]
pub struct CredentialStore {
    db: DbPool,
    hasher: PasswordHasher,
    min_password_length: usize,
    timeout: Duration,
    /// Verified against when the email is unknown, so both failure paths
    /// cost one Argon2 run.
    decoy_hash: Arc<OnceCell<String>>,
}

impl CredentialStore {
    pub fn new(
        db: DbPool,
        hasher: PasswordHasher,
        min_password_length: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            db,
            hasher,
            min_password_length: min_password_length.max(PASSWORD_FLOOR),
            timeout,
            decoy_hash: Arc::new(OnceCell::new()),
        }
    }

    pub fn min_password_length(&self) -> usize {
        self.min_password_length
    }

    /// Create a user with a hashed password and its credential account.
    pub async fn register(
        &self,
        email: &str,
        password: &str,
        name: Option<&str>,
    ) -> Result<User, AuthError> {
        let email = normalize_email(email)?;
        check_password(password, self.min_password_length)?;
        let name = normalize_name(name)?;

        bounded(self.timeout, "register", async {
            if self.find_by_email_inner(&email).await?.is_some() {
                return Err(AuthError::DuplicateEmail);
            }

            let password_hash = self.hasher.hash(password).await?;
            let id = uuid::Uuid::new_v4().to_string();
            let now = Utc::now();

            let mut tx = self.db.begin().await?;

            // A concurrent registration that slipped past the check above
            // trips the UNIQUE constraint and surfaces as DuplicateEmail.
            sqlx::query(
                r#"
                INSERT INTO users (id, email, password_hash, name, name_search, role, banned, email_verified, created_at, updated_at)
                VALUES (?, ?, ?, ?, ?, 'user', 0, 0, ?, ?)
                "#,
            )
            .bind(&id)
            .bind(&email)
            .bind(&password_hash)
            .bind(&name)
            .bind(name.as_deref().map(str::to_lowercase))
            .bind(now)
            .bind(now)
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                r#"
                INSERT INTO accounts (id, account_id, provider_id, user_id, created_at, updated_at)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(uuid::Uuid::new_v4().to_string())
            .bind(&id)
            .bind(CREDENTIAL_PROVIDER)
            .bind(&id)
            .bind(now)
            .bind(now)
            .execute(&mut *tx)
            .await?;

            let user: User = sqlx::query_as("SELECT * FROM users WHERE id = ?")
                .bind(&id)
                .fetch_one(&mut *tx)
                .await?;

            tx.commit().await?;

            tracing::info!(user_id = %user.id, "Registered user");
            Ok(user)
        })
        .await
    }

    /// Check an email/password pair. Every failure is `InvalidCredentials`.
    pub async fn verify(&self, email: &str, password: &str) -> Result<User, AuthError> {
        let Ok(email) = normalize_email(email) else {
            return Err(AuthError::InvalidCredentials);
        };

        let user = bounded(self.timeout, "verify", self.find_by_email_inner(&email)).await?;

        match user {
            Some(user) => {
                if self.hasher.verify(password, &user.password_hash).await? {
                    Ok(user)
                } else {
                    tracing::debug!(user_id = %user.id, "Password mismatch");
                    Err(AuthError::InvalidCredentials)
                }
            }
            None => {
                let decoy = self.decoy_hash().await?;
                let _ = self.hasher.verify(password, decoy).await?;
                Err(AuthError::InvalidCredentials)
            }
        }
    }

    /// Replace a user's password. Existing sessions are left alone.
    pub async fn reset_password(&self, email: &str, new_password: &str) -> Result<(), AuthError> {
        check_password(new_password, self.min_password_length)?;
        let email = normalize_email(email).map_err(|_| AuthError::UserNotFound)?;

        bounded(self.timeout, "reset_password", async {
            let user = self
                .find_by_email_inner(&email)
                .await?
                .ok_or(AuthError::UserNotFound)?;

            let password_hash = self.hasher.hash(new_password).await?;

            let result = sqlx::query("UPDATE users SET password_hash = ?, updated_at = ? WHERE id = ?")
                .bind(&password_hash)
                .bind(Utc::now())
                .bind(&user.id)
                .execute(&self.db)
                .await?;

            if result.rows_affected() == 0 {
                return Err(AuthError::UserNotFound);
            }

            tracing::info!(user_id = %user.id, "Password reset");
            Ok(())
        })
        .await
    }

    pub async fn find_by_id(&self, id: &str) -> Result<Option<User>, AuthError> {
        bounded(self.timeout, "find_user", async {
            Ok(sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.db)
                .await?)
        })
        .await
    }

    pub async fn find_by_email(&self, email: &str) -> Result<Option<User>, AuthError> {
        let Ok(email) = normalize_email(email) else {
            return Ok(None);
        };
        bounded(self.timeout, "find_user", self.find_by_email_inner(&email)).await
    }

    /// Set a role with no caller check. Operator tooling only: this is how
    /// the first administrator is created.
    pub async fn assign_role(&self, email: &str, role: &Role) -> Result<User, AuthError> {
        let email = normalize_email(email).map_err(|_| AuthError::UserNotFound)?;

        bounded(self.timeout, "assign_role", async {
            let result = sqlx::query("UPDATE users SET role = ?, updated_at = ? WHERE email = ?")
                .bind(role.as_str())
                .bind(Utc::now())
                .bind(&email)
                .execute(&self.db)
                .await?;

            if result.rows_affected() == 0 {
                return Err(AuthError::UserNotFound);
            }

            let user = self
                .find_by_email_inner(&email)
                .await?
                .ok_or(AuthError::UserNotFound)?;
            tracing::info!(user_id = %user.id, role = %role, "Assigned role");
            Ok(user)
        })
        .await
    }

    /// Clear a timed ban whose expiry has passed. Conditional on the row still
    /// carrying that lapsed ban, so a fresh ban placed meanwhile survives.
    /// Returns whether a correction was written.
    pub async fn clear_lapsed_ban(&self, user_id: &str) -> Result<bool, AuthError> {
        bounded(self.timeout, "clear_lapsed_ban", async {
            let now = Utc::now();
            let result = sqlx::query(
                r#"
                UPDATE users
                SET banned = 0, ban_reason = NULL, ban_expires_at = NULL, updated_at = ?
                WHERE id = ? AND banned = 1 AND ban_expires_at IS NOT NULL AND ban_expires_at <= ?
                "#,
            )
            .bind(now)
            .bind(user_id)
            .bind(now)
            .execute(&self.db)
            .await?;

            let cleared = result.rows_affected() > 0;
            if cleared {
                tracing::info!(user_id = %user_id, "Cleared expired ban");
            }
            Ok(cleared)
        })
        .await
    }

    async fn find_by_email_inner(&self, email: &str) -> Result<Option<User>, AuthError> {
        Ok(sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = ?")
            .bind(email)
            .fetch_optional(&self.db)
            .await?)
    }

    async fn decoy_hash(&self) -> Result<&String, AuthError> {
        self.decoy_hash
            .get_or_try_init(|| async {
                let hasher = self.hasher.clone();
                hasher.hash(&super::secrets::generate_token()).await
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Account;
    use crate::identity::testing::{credential_store, memory_pool};

    #[tokio::test]
    async fn test_register_normalizes_email() {
        let store = credential_store(memory_pool().await);
        let user = store
            .register("  Alice@Test.COM ", "secret1", Some("Alice"))
            .await
            .unwrap();

        assert_eq!(user.email, "alice@test.com");
        assert_eq!(user.role, "user");
        assert!(!user.banned);
        assert!(!user.email_verified);
        assert_eq!(user.name.as_deref(), Some("Alice"));
        assert_ne!(user.password_hash, "secret1");
    }

    #[tokio::test]
    async fn test_duplicate_email_is_case_insensitive() {
        let store = credential_store(memory_pool().await);
        store.register("User@X.com", "secret1", None).await.unwrap();

        let second = store.register("user@x.com", "secret2", None).await;
        assert!(matches!(second, Err(AuthError::DuplicateEmail)));
    }

    #[tokio::test]
    async fn test_weak_password_rejected_at_registration() {
        let pool = memory_pool().await;
        let store = credential_store(pool.clone());

        let result = store.register("bob@test.com", "12345", None).await;
        assert!(matches!(result, Err(AuthError::WeakPassword { min_length: 6 })));

        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count.0, 0);
    }

    #[tokio::test]
    async fn test_minimum_length_never_below_floor() {
        let hasher = PasswordHasher::new(64, 1, 1).unwrap();
        let store = CredentialStore::new(memory_pool().await, hasher, 1, Duration::from_secs(5));
        assert_eq!(store.min_password_length(), PASSWORD_FLOOR);

        let result = store.register("dave@test.com", "abc", None).await;
        assert!(matches!(result, Err(AuthError::WeakPassword { min_length: 6 })));
    }

    #[tokio::test]
    async fn test_register_links_credential_account() {
        let pool = memory_pool().await;
        let store = credential_store(pool.clone());
        let user = store.register("carol@test.com", "secret1", None).await.unwrap();

        let accounts: Vec<Account> = sqlx::query_as("SELECT * FROM accounts WHERE user_id = ?")
            .bind(&user.id)
            .fetch_all(&pool)
            .await
            .unwrap();
        assert_eq!(accounts.len(), 1);
        assert_eq!(accounts[0].provider_id, CREDENTIAL_PROVIDER);
        assert_eq!(accounts[0].account_id, user.id);
    }

    #[tokio::test]
    async fn test_verify_failures_are_indistinguishable() {
        let store = credential_store(memory_pool().await);
        store.register("dave@test.com", "secret1", None).await.unwrap();

        let ok = store.verify("DAVE@test.com", "secret1").await.unwrap();
        assert_eq!(ok.email, "dave@test.com");

        let wrong_password = store.verify("dave@test.com", "secret2").await.unwrap_err();
        let unknown_user = store.verify("nobody@test.com", "secret1").await.unwrap_err();
        let garbage = store.verify("not an email", "secret1").await.unwrap_err();

        assert!(matches!(wrong_password, AuthError::InvalidCredentials));
        assert!(matches!(unknown_user, AuthError::InvalidCredentials));
        assert!(matches!(garbage, AuthError::InvalidCredentials));
        assert_eq!(wrong_password.to_string(), unknown_user.to_string());
    }

    #[tokio::test]
    async fn test_reset_password() {
        let store = credential_store(memory_pool().await);
        let user = store.register("erin@test.com", "secret1", None).await.unwrap();

        assert!(matches!(
            store.reset_password("erin@test.com", "short").await,
            Err(AuthError::WeakPassword { .. })
        ));
        assert!(matches!(
            store.reset_password("ghost@test.com", "newsecret").await,
            Err(AuthError::UserNotFound)
        ));

        store.reset_password("Erin@Test.com", "newsecret").await.unwrap();
        assert!(store.verify("erin@test.com", "secret1").await.is_err());
        let verified = store.verify("erin@test.com", "newsecret").await.unwrap();
        assert!(verified.updated_at >= user.updated_at);
    }

    #[tokio::test]
    async fn test_assign_role() {
        let store = credential_store(memory_pool().await);
        store.register("gina@test.com", "secret1", None).await.unwrap();

        let user = store.assign_role("GINA@test.com", &Role::Admin).await.unwrap();
        assert_eq!(user.role, "admin");
        assert!(matches!(
            store.assign_role("nobody@test.com", &Role::Admin).await,
            Err(AuthError::UserNotFound)
        ));
    }

    #[tokio::test]
    async fn test_clear_lapsed_ban_only_touches_expired_bans() {
        let pool = memory_pool().await;
        let store = credential_store(pool.clone());
        let user = store.register("frank@test.com", "secret1", None).await.unwrap();

        // Ban still running: nothing to correct
        sqlx::query("UPDATE users SET banned = 1, ban_reason = 'spam', ban_expires_at = ? WHERE id = ?")
            .bind(Utc::now() + chrono::Duration::hours(1))
            .bind(&user.id)
            .execute(&pool)
            .await
            .unwrap();
        assert!(!store.clear_lapsed_ban(&user.id).await.unwrap());

        sqlx::query("UPDATE users SET ban_expires_at = ? WHERE id = ?")
            .bind(Utc::now() - chrono::Duration::seconds(1))
            .bind(&user.id)
            .execute(&pool)
            .await
            .unwrap();
        assert!(store.clear_lapsed_ban(&user.id).await.unwrap());

        let reloaded = store.find_by_id(&user.id).await.unwrap().unwrap();
        assert!(!reloaded.banned);
        assert!(reloaded.ban_reason.is_none());
        assert!(reloaded.ban_expires_at.is_none());
    }
}
