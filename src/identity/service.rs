//! `AuthService` bundles the identity components behind the operations the
//! HTTP layer and the CLI call.

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use super::admin::AdminDirectory;
use super::authz::{AuthorizationEngine, CapabilitySet};
use super::credentials::CredentialStore;
use super::routing::{Destination, LoginRouter};
use super::secrets::PasswordHasher;
use super::sessions::{Identity, SessionManager, SessionPolicy};
use super::validation::{check_password, normalize_email};
use super::verification::VerificationStore;
use super::AuthError;
use crate::config::AuthConfig;
use crate::db::{RequestContext, Session, User};
use crate::DbPool;

const RESET_IDENTIFIER_PREFIX: &str = "reset-password:";

/// Hands a freshly issued reset token to whatever delivers it to the user.
#[async_trait]
pub trait ResetDelivery: Send + Sync {
    async fn deliver(&self, user: &User, token: &str) -> Result<(), AuthError>;
}

/// Default sink: records that a link was issued and nothing else.
pub struct LogDelivery;

#[async_trait]
impl ResetDelivery for LogDelivery {
    async fn deliver(&self, user: &User, _token: &str) -> Result<(), AuthError> {
        tracing::debug!(user_id = %user.id, "Password reset link issued");
        Ok(())
    }
}

/// Result of a successful sign-in.
#[derive(Debug, Clone)]
pub struct Login {
    pub token: String,
    pub user: User,
    pub session: Session,
    pub destination: Destination,
}

#[derive(Debug, Clone, Serialize)]
pub struct Acknowledgement {
    pub message: &'static str,
}

impl Acknowledgement {
    pub const RESET_REQUESTED: Acknowledgement = Acknowledgement {
        message: "If an account exists for that email, a reset link has been sent",
    };
    pub const RESET_COMPLETED: Acknowledgement = Acknowledgement {
        message: "Password has been reset",
    };
}

#[derive(Clone)]
pub struct AuthService {
    pub credentials: CredentialStore,
    pub sessions: SessionManager,
    pub verifications: VerificationStore,
    pub admin: AdminDirectory,
    pub engine: AuthorizationEngine,
    pub router: LoginRouter,
    reset_lifetime: chrono::Duration,
    delivery: Arc<dyn ResetDelivery>,
}

impl AuthService {
    pub fn new(db: DbPool, config: &AuthConfig, timeout: Duration) -> Result<Self, AuthError> {
        let hasher = PasswordHasher::from_config(config)?;
        let engine = AuthorizationEngine::new();

        Ok(Self {
            credentials: CredentialStore::new(db.clone(), hasher, config.min_password_length, timeout),
            sessions: SessionManager::new(db.clone(), SessionPolicy::from_config(config), timeout),
            verifications: VerificationStore::new(db.clone(), timeout),
            admin: AdminDirectory::new(db, engine, timeout),
            engine,
            router: LoginRouter::new(engine),
            reset_lifetime: chrono::Duration::seconds(config.reset_token_lifetime_seconds),
            delivery: Arc::new(LogDelivery),
        })
    }

    pub fn with_delivery(mut self, delivery: Arc<dyn ResetDelivery>) -> Self {
        self.delivery = delivery;
        self
    }

    pub async fn register(&self, email: &str, password: &str, name: Option<&str>) -> Result<User, AuthError> {
        self.credentials.register(email, password, name).await
    }

    /// Verify credentials and open a session. A banned account still signs
    /// in; the ban shows up on every authorization check instead.
    pub async fn login(&self, email: &str, password: &str, context: &RequestContext) -> Result<Login, AuthError> {
        let user = self.credentials.verify(email, password).await?;
        let issued = self.sessions.issue(&user.id, context).await?;
        let destination = self.router.decide(&user);

        tracing::info!(
            user_id = %user.id,
            destination = destination.path(),
            "User signed in"
        );

        Ok(Login {
            token: issued.token,
            user,
            session: issued.session,
            destination,
        })
    }

    pub async fn check_session(&self, token: Option<&str>) -> Result<Identity, AuthError> {
        self.sessions.resolve(token).await
    }

    pub async fn logout(&self, token: &str) -> Result<(), AuthError> {
        self.sessions.revoke(token).await
    }

    /// Capabilities for a freshly loaded user. A timed ban that has run out
    /// is cleared in storage on the way through.
    pub async fn authorize(&self, user: &User) -> Result<CapabilitySet, AuthError> {
        let now = chrono::Utc::now();
        let capabilities = self.engine.authorize_at(user, now)?;

        if user.ban_lapsed_at(now) {
            self.credentials.clear_lapsed_ban(&user.id).await?;
        }
        Ok(capabilities)
    }

    /// Always answers with the same acknowledgement, whether or not the
    /// email belongs to anyone. Lookup, issuance and delivery run in a
    /// background task; their failures are only logged.
    pub fn request_password_reset(&self, email: &str) -> Acknowledgement {
        if let Ok(email) = normalize_email(email) {
            let service = self.clone();
            tokio::spawn(async move {
                if let Err(e) = service.send_reset_link(&email).await {
                    tracing::warn!(error = %e, "Password reset request failed");
                }
            });
        }
        Acknowledgement::RESET_REQUESTED
    }

    async fn send_reset_link(&self, email: &str) -> Result<(), AuthError> {
        let Some(user) = self.credentials.find_by_email(email).await? else {
            return Ok(());
        };
        let token = self
            .verifications
            .issue(&reset_identifier(email), self.reset_lifetime)
            .await?;
        self.delivery.deliver(&user, &token).await?;
        tracing::debug!(user_id = %user.id, "Reset link handed to delivery");
        Ok(())
    }

    /// Set a new password using a reset token. Password strength is checked
    /// before the token is consumed, so a weak attempt does not burn it.
    pub async fn complete_password_reset(
        &self,
        email: &str,
        new_password: &str,
        token: &str,
    ) -> Result<Acknowledgement, AuthError> {
        check_password(new_password, self.credentials.min_password_length())?;
        let email = normalize_email(email).map_err(|_| AuthError::UserNotFound)?;

        if !self.verifications.consume(&reset_identifier(&email), token).await? {
            return Err(AuthError::validation("token", "reset token is invalid or has expired"));
        }

        self.credentials.reset_password(&email, new_password).await?;
        Ok(Acknowledgement::RESET_COMPLETED)
    }
}

fn reset_identifier(email: &str) -> String {
    format!("{}{}", RESET_IDENTIFIER_PREFIX, email)
}
