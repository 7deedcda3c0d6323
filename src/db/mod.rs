mod models;

pub use models::*;

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

use crate::config::DatabaseConfig;

pub type DbPool = SqlitePool;

/// Execute a SQL migration file, properly handling comments
async fn execute_sql(pool: &SqlitePool, sql: &str) -> Result<()> {
    for statement in sql.split(';') {
        // Strip SQL comment lines (lines starting with --)
        let cleaned: String = statement
            .lines()
            .filter(|line| !line.trim().starts_with("--"))
            .collect::<Vec<_>>()
            .join("\n");
        let trimmed = cleaned.trim();
        if !trimmed.is_empty() {
            sqlx::query(trimmed).execute(pool).await?;
        }
    }
    Ok(())
}

/// Open the configured database, creating `data_dir/gatehouse.db` when no URL is set.
pub async fn init(config: &DatabaseConfig, data_dir: &Path) -> Result<DbPool> {
    let url = match &config.url {
        Some(url) => url.clone(),
        None => {
            std::fs::create_dir_all(data_dir).with_context(|| {
                format!("Failed to create data directory: {}", data_dir.display())
            })?;
            format!("sqlite:{}", data_dir.join("gatehouse.db").display())
        }
    };

    info!("Initializing database at {}", url);

    connect(
        &url,
        config.max_connections,
        Duration::from_secs(config.timeout_seconds),
    )
    .await
}

/// Connect to `url` and bring the schema up to date.
///
/// In-memory databases live and die with their connection, so they get a
/// single connection that is never recycled.
pub async fn connect(url: &str, max_connections: u32, timeout: Duration) -> Result<DbPool> {
    let in_memory = url.contains(":memory:");

    let mut options = SqliteConnectOptions::from_str(url)
        .with_context(|| format!("Invalid database URL: {}", url))?
        .create_if_missing(true)
        .foreign_keys(true)
        .busy_timeout(timeout);
    if !in_memory {
        options = options
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);
    }

    let pool_options = SqlitePoolOptions::new().acquire_timeout(timeout);
    let pool_options = if in_memory {
        pool_options
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
    } else {
        pool_options.max_connections(max_connections.max(1))
    };

    let pool = pool_options
        .connect_with(options)
        .await
        .context("Failed to open database")?;

    run_migrations(&pool).await?;

    info!("Database initialized successfully");
    Ok(pool)
}

async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    info!("Running database migrations...");

    // Migration 001: users, sessions, accounts, verifications
    execute_sql(pool, include_str!("../../migrations/001_identity.sql"))
        .await
        .context("Migration 001_identity failed")?;

    info!("Migrations completed");
    Ok(())
}
