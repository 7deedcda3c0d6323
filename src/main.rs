use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gatehouse::api::rate_limit::spawn_cleanup_task;
use gatehouse::cli::{run_command, Cli};
use gatehouse::config::Config;
use gatehouse::identity::spawn_purge_task;
use gatehouse::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Subcommands print plain output; keep the log quiet unless asked
    let log_level = match (&cli.log_level, &cli.command) {
        (Some(level), _) => level.clone(),
        (None, Some(_)) => "warn".to_string(),
        (None, None) => Config::load(&cli.config)
            .map(|c| c.logging.level)
            .unwrap_or_else(|_| "info".to_string()),
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level)),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if cli.command.is_some() {
        return run_command(&cli).await;
    }

    let config = Config::load(&cli.config)?;

    tracing::info!("Starting Gatehouse v{}", env!("CARGO_PKG_VERSION"));

    let db = gatehouse::db::init(&config.database, &config.server.data_dir).await?;

    let state = Arc::new(
        AppState::new(config.clone(), db).context("Failed to initialize auth service")?,
    );

    spawn_purge_task(
        state.auth.sessions.clone(),
        state.auth.verifications.clone(),
        Duration::from_secs(config.auth.session_gc_interval_seconds.max(1)),
    );
    if config.rate_limit.enabled {
        spawn_cleanup_task(state.rate_limiter.clone(), config.rate_limit.cleanup_interval);
    }

    let app = gatehouse::api::create_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    tracing::info!("Listening on http://{}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
