//! CLI module for the Gatehouse command-line interface.
//!
//! With no subcommand the binary runs the server. Subcommands:
//! - `promote <email>` - Make an existing user an administrator
//! - `purge-sessions` - Delete expired sessions and verification tokens once
//! - `config check` - Validate configuration file

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use crate::config::Config;
use crate::db::{self, Role};
use crate::identity::AuthService;

#[derive(Parser, Debug)]
#[command(name = "gatehouse")]
#[command(author, version, about = "Identity service: accounts, sessions and user administration", long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, env = "GATEHOUSE_CONFIG", default_value = "gatehouse.toml")]
    pub config: PathBuf,

    /// Override log level
    #[arg(short, long)]
    pub log_level: Option<String>,

    /// Subcommand to run (if none, starts the server)
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Grant the admin role to an existing account
    Promote {
        /// Email address of the account
        email: String,
    },

    /// Delete expired sessions and verification tokens
    PurgeSessions,

    /// Configuration management commands
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Validate configuration file
    Check,
}

/// Run a subcommand. Returns Ok(()) without doing anything when none was given.
pub async fn run_command(cli: &Cli) -> Result<()> {
    match &cli.command {
        Some(Commands::Promote { email }) => {
            let config = Config::load(&cli.config)?;
            cmd_promote(&config, email).await
        }
        Some(Commands::PurgeSessions) => {
            let config = Config::load(&cli.config)?;
            cmd_purge_sessions(&config).await
        }
        Some(Commands::Config(ConfigCommands::Check)) => cmd_config_check(cli),
        None => Ok(()),
    }
}

async fn open_service(config: &Config) -> Result<AuthService> {
    let pool = db::init(&config.database, &config.server.data_dir).await?;
    AuthService::new(
        pool,
        &config.auth,
        Duration::from_secs(config.database.timeout_seconds),
    )
    .context("Failed to build auth service")
}

async fn cmd_promote(config: &Config, email: &str) -> Result<()> {
    let auth = open_service(config).await?;
    let user = auth
        .credentials
        .assign_role(email, &Role::Admin)
        .await
        .with_context(|| format!("Could not promote {}", email))?;

    println!("[OK] {} is now an administrator (id {})", user.email, user.id);
    Ok(())
}

async fn cmd_purge_sessions(config: &Config) -> Result<()> {
    let auth = open_service(config).await?;
    let sessions = auth
        .sessions
        .purge_expired()
        .await
        .context("Session sweep failed")?;
    let verifications = auth
        .verifications
        .purge_expired()
        .await
        .context("Verification sweep failed")?;

    println!(
        "[OK] Removed {} expired session(s) and {} expired verification token(s)",
        sessions, verifications
    );
    Ok(())
}

fn cmd_config_check(cli: &Cli) -> Result<()> {
    let config_path = &cli.config;

    println!("Checking configuration file: {}", config_path.display());
    println!();

    if !config_path.exists() {
        println!(
            "[!!] Configuration file not found: {}",
            config_path.display()
        );
        println!();
        println!("A default configuration will be used when starting the server.");
        return Ok(());
    }

    match Config::load(config_path) {
        Ok(config) => {
            println!("[OK] Configuration file is valid!");
            println!();
            println!("=== Configuration Summary ===");
            println!();
            println!("Server:");
            println!("  Host:         {}", config.server.host);
            println!("  Port:         {}", config.server.port);
            println!("  Data Dir:     {}", config.server.data_dir.display());
            println!();
            println!("Sessions:");
            println!("  Lifetime:     {}", format_duration(config.auth.session_lifetime_seconds));
            println!("  Renewal:      {}", format_duration(config.auth.session_renewal_seconds));
            println!("  Cookie:       {}", config.auth.cookie_name);
            println!();
            println!("Security:");
            println!(
                "  Rate Limiting: {}",
                if config.rate_limit.enabled {
                    "Enabled"
                } else {
                    "Disabled"
                }
            );
            println!(
                "  Argon2id:     {} KiB, {} pass(es), {} lane(s)",
                config.auth.argon2_memory_kib,
                config.auth.argon2_iterations,
                config.auth.argon2_parallelism
            );
            println!();

            let warnings = config_warnings(&config);
            if !warnings.is_empty() {
                println!("Warnings:");
                for warning in warnings {
                    println!("  [!] {}", warning);
                }
                println!();
            }

            Ok(())
        }
        Err(e) => {
            println!("[!!] Configuration file is invalid!");
            println!();
            println!("Error: {:#}", e);
            println!();
            println!("Please check the configuration file syntax and try again.");
            anyhow::bail!("Invalid configuration file");
        }
    }
}

fn config_warnings(config: &Config) -> Vec<&'static str> {
    let mut warnings = Vec::new();

    if !config.auth.secure_cookies {
        warnings.push("Session cookies are not marked Secure - enable auth.secure_cookies behind TLS");
    }
    if !config.rate_limit.enabled {
        warnings.push("Rate limiting is disabled - sign-in is open to brute force");
    }
    if config.auth.argon2_memory_kib < 19 * 1024 {
        warnings.push("Argon2 memory cost is below the recommended 19 MiB");
    }

    warnings
}

fn format_duration(seconds: i64) -> String {
    if seconds >= 86_400 && seconds % 86_400 == 0 {
        format!("{}d", seconds / 86_400)
    } else if seconds >= 3600 && seconds % 3600 == 0 {
        format!("{}h", seconds / 3600)
    } else if seconds >= 60 && seconds % 60 == 0 {
        format!("{}m", seconds / 60)
    } else {
        format!("{}s", seconds)
    }
}
