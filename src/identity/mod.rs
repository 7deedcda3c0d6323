//! Identity core: credentials, sessions, authorization and user administration.

pub mod admin;
pub mod authz;
pub mod credentials;
pub mod error;
pub mod routing;
pub mod secrets;
pub mod service;
pub mod sessions;
pub mod validation;
pub mod verification;

pub use admin::{AdminDirectory, PageRequest, UserFilter, UserPage};
pub use authz::{AuthorizationEngine, BanState, Capability, CapabilitySet};
pub use credentials::CredentialStore;
pub use error::AuthError;
pub use routing::{Destination, LoginRouter};
pub use secrets::PasswordHasher;
pub use service::{Acknowledgement, AuthService, LogDelivery, Login, ResetDelivery};
pub use sessions::{spawn_purge_task, Identity, IssuedSession, SessionManager, SessionPolicy};
pub use verification::VerificationStore;

#[cfg(test)]
pub(crate) mod testing {
    use std::time::Duration;

    use super::*;
    use crate::config::AuthConfig;
    use crate::db::{self, User};
    use crate::DbPool;

    const TIMEOUT: Duration = Duration::from_secs(5);

    pub async fn memory_pool() -> DbPool {
        db::connect("sqlite::memory:", 1, TIMEOUT).await.unwrap()
    }

    /// A WAL database file in `dir` behind several connections, for tests
    /// that need statements to actually interleave.
    pub async fn file_pool(dir: &tempfile::TempDir, max_connections: u32) -> DbPool {
        let url = format!("sqlite:{}", dir.path().join("gatehouse.db").display());
        db::connect(&url, max_connections, TIMEOUT).await.unwrap()
    }

    /// Auth settings with Argon2 costs low enough for tests.
    pub fn test_auth_config() -> AuthConfig {
        AuthConfig {
            argon2_memory_kib: 64,
            argon2_iterations: 1,
            argon2_parallelism: 1,
            ..Default::default()
        }
    }

    pub fn credential_store(pool: DbPool) -> CredentialStore {
        let hasher = PasswordHasher::new(64, 1, 1).unwrap();
        CredentialStore::new(pool, hasher, 6, TIMEOUT)
    }

    pub fn session_manager(pool: DbPool) -> SessionManager {
        SessionManager::new(pool, SessionPolicy::default(), TIMEOUT)
    }

    pub fn auth_service(pool: DbPool) -> AuthService {
        AuthService::new(pool, &test_auth_config(), TIMEOUT).unwrap()
    }

    /// Make `user_id` an administrator directly in storage.
    pub async fn promote(pool: &DbPool, user_id: &str) -> User {
        sqlx::query("UPDATE users SET role = 'admin' WHERE id = ?")
            .bind(user_id)
            .execute(pool)
            .await
            .unwrap();
        sqlx::query_as("SELECT * FROM users WHERE id = ?")
            .bind(user_id)
            .fetch_one(pool)
            .await
            .unwrap()
    }
}
