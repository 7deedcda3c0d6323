use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::identity::validation::PASSWORD_FLOOR;
use crate::identity::PasswordHasher;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            data_dir: default_data_dir(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite URL; defaults to `<data_dir>/gatehouse.db`
    pub url: Option<String>,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Upper bound for every storage call, in seconds
    #[serde(default = "default_db_timeout")]
    pub timeout_seconds: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: default_max_connections(),
            timeout_seconds: default_db_timeout(),
        }
    }
}

fn default_max_connections() -> u32 {
    5
}

fn default_db_timeout() -> u64 {
    5
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "default_min_password_length")]
    pub min_password_length: usize,
    /// How long a session lives without being used (default: 7 days)
    #[serde(default = "default_session_lifetime")]
    pub session_lifetime_seconds: i64,
    /// Minimum age of the last renewal before a session is extended again (default: 24 hours)
    #[serde(default = "default_session_renewal")]
    pub session_renewal_seconds: i64,
    #[serde(default = "default_reset_token_lifetime")]
    pub reset_token_lifetime_seconds: i64,
    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,
    /// Mark the session cookie `Secure` (enable behind TLS)
    #[serde(default)]
    pub secure_cookies: bool,
    /// Interval between expired-session sweeps
    #[serde(default = "default_session_gc_interval")]
    pub session_gc_interval_seconds: u64,
    #[serde(default = "default_argon2_memory")]
    pub argon2_memory_kib: u32,
    #[serde(default = "default_argon2_iterations")]
    pub argon2_iterations: u32,
    #[serde(default = "default_argon2_parallelism")]
    pub argon2_parallelism: u32,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            min_password_length: default_min_password_length(),
            session_lifetime_seconds: default_session_lifetime(),
            session_renewal_seconds: default_session_renewal(),
            reset_token_lifetime_seconds: default_reset_token_lifetime(),
            cookie_name: default_cookie_name(),
            secure_cookies: false,
            session_gc_interval_seconds: default_session_gc_interval(),
            argon2_memory_kib: default_argon2_memory(),
            argon2_iterations: default_argon2_iterations(),
            argon2_parallelism: default_argon2_parallelism(),
        }
    }
}

fn default_min_password_length() -> usize {
    PASSWORD_FLOOR
}

fn default_session_lifetime() -> i64 {
    60 * 60 * 24 * 7
}

fn default_session_renewal() -> i64 {
    60 * 60 * 24
}

fn default_reset_token_lifetime() -> i64 {
    60 * 60
}

fn default_cookie_name() -> String {
    "gatehouse_session".to_string()
}

fn default_session_gc_interval() -> u64 {
    60 * 60
}

// OWASP baseline for Argon2id: 19 MiB, 2 passes, 1 lane
fn default_argon2_memory() -> u32 {
    19 * 1024
}

fn default_argon2_iterations() -> u32 {
    2
}

fn default_argon2_parallelism() -> u32 {
    1
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_rate_limit_enabled")]
    pub enabled: bool,
    #[serde(default = "default_api_requests")]
    pub api_requests_per_window: u32,
    /// Sign-in, sign-up and password reset share this budget
    #[serde(default = "default_auth_requests")]
    pub auth_requests_per_window: u32,
    #[serde(default = "default_window_seconds")]
    pub window_seconds: u64,
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: default_rate_limit_enabled(),
            api_requests_per_window: default_api_requests(),
            auth_requests_per_window: default_auth_requests(),
            window_seconds: default_window_seconds(),
            cleanup_interval: default_cleanup_interval(),
        }
    }
}

fn default_rate_limit_enabled() -> bool {
    true
}

fn default_api_requests() -> u32 {
    100
}

fn default_auth_requests() -> u32 {
    20
}

fn default_window_seconds() -> u64 {
    60
}

fn default_cleanup_interval() -> u64 {
    300
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            info!("Loading configuration from {}", path.display());
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            Self::parse(&content)
        } else {
            info!("No config file found, using defaults");
            Ok(Config::default())
        }
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(content).with_context(|| "Failed to parse configuration file")?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would break session or hashing invariants.
    pub fn validate(&self) -> Result<()> {
        let auth = &self.auth;
        if auth.session_lifetime_seconds <= 0 {
            bail!("auth.session_lifetime_seconds must be positive");
        }
        if auth.session_renewal_seconds < 0 {
            bail!("auth.session_renewal_seconds must not be negative");
        }
        if auth.session_renewal_seconds >= auth.session_lifetime_seconds {
            bail!("auth.session_renewal_seconds must be shorter than auth.session_lifetime_seconds");
        }
        if auth.reset_token_lifetime_seconds <= 0 {
            bail!("auth.reset_token_lifetime_seconds must be positive");
        }
        if auth.min_password_length < PASSWORD_FLOOR {
            bail!("auth.min_password_length must be at least {}", PASSWORD_FLOOR);
        }
        if PasswordHasher::from_config(auth).is_err() {
            bail!(
                "auth.argon2_* parameters are not valid Argon2id settings ({} KiB, {} pass(es), {} lane(s))",
                auth.argon2_memory_kib,
                auth.argon2_iterations,
                auth.argon2_parallelism
            );
        }
        if auth.cookie_name.trim().is_empty() {
            bail!("auth.cookie_name must not be empty");
        }
        if self.database.timeout_seconds == 0 {
            bail!("database.timeout_seconds must be at least 1");
        }
        Ok(())
    }
}
