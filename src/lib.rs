pub mod api;
pub mod cli;
pub mod config;
pub mod db;
pub mod identity;

pub use db::DbPool;

use config::Config;
use std::sync::Arc;
use std::time::Duration;

use crate::api::rate_limit::RateLimiter;
use crate::identity::{AuthError, AuthService};

pub struct AppState {
    pub config: Config,
    pub db: DbPool,
    pub auth: AuthService,
    pub rate_limiter: Arc<RateLimiter>,
}

impl AppState {
    pub fn new(config: Config, db: DbPool) -> Result<Self, AuthError> {
        let timeout = Duration::from_secs(config.database.timeout_seconds);
        let auth = AuthService::new(db.clone(), &config.auth, timeout)?;
        let rate_limiter = Arc::new(RateLimiter::new(config.rate_limit.clone()));
        Ok(Self {
            config,
            db,
            auth,
            rate_limiter,
        })
    }
}
