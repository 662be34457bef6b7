//! # bzauthd
//!
//! Entry point for the authentication daemon binary. Handles CLI parsing,
//! logging setup, and server startup.
//!
//! ## Usage
//! ```bash
//! bzauthd start -c /etc/bzauthd.toml   # run the daemon
//! bzauthd validate -c bzauthd.toml     # check a config file
//! bzauthd default-config > bzauthd.toml
//! ```
//!
//! `RUST_LOG` overrides the configured log level.

use std::path::PathBuf;
use std::process::ExitCode;

use bzauth::{AuthServerBuilder, AuthdConfig, AuthdError};
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

// ============================================
// CLI Definition
// ============================================

/// BZFlag callsign authentication daemon
#[derive(Parser, Debug)]
#[command(name = "bzauthd")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the daemon
    ///
    /// A missing config file means "all defaults".
    Start {
        /// Path to configuration file
        #[arg(short, long, default_value = "bzauthd.toml")]
        config: PathBuf,
    },

    /// Validate configuration file
    Validate {
        /// Path to configuration file
        #[arg(short, long, default_value = "bzauthd.toml")]
        config: PathBuf,
    },

    /// Print the default configuration as TOML
    DefaultConfig,
}

// ============================================
// Main
// ============================================

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Start { config } => cmd_start(config).await,
        Commands::Validate { config } => cmd_validate(config).await,
        Commands::DefaultConfig => {
            print!("{}", AuthdConfig::default().to_toml());
            Ok(())
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            // Logging may not be up yet if the config failed to load.
            init_logging("error");
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

// ============================================
// Commands
// ============================================

async fn cmd_start(config_path: PathBuf) -> Result<(), AuthdError> {
    let config = AuthdConfig::load_or_default(&config_path).await?;
    init_logging(&config.logging.level);
    info!(config = %config_path.display(), "starting bzauthd");

    let server = AuthServerBuilder::new()
        .config(config)
        .build_with_defaults()
        .await?;
    info!(addr = %server.local_addr()?, "accepting connections");

    tokio::select! {
        result = server.run() => result,
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
            Ok(())
        }
    }
}

async fn cmd_validate(config_path: PathBuf) -> Result<(), AuthdError> {
    if !config_path.exists() {
        println!("Config file not found: {}", config_path.display());
        println!("The daemon will use default values.");
        return Ok(());
    }

    let config = AuthdConfig::load(&config_path).await?;
    config.validate()?;

    let limits = config.credentials.limits();
    println!("Configuration is valid");
    println!();
    println!("Network:");
    println!("   Listen:             {}", config.network.listen_addr);
    println!("   Handshake timeout:  {}s", config.network.handshake_timeout_secs);
    println!("   Idle timeout:       {}s", config.network.idle_timeout_secs);
    println!();
    println!("Tokens:");
    println!("   Lifetime:           {}s", config.tokens.expiry_secs);
    println!();
    println!("Credentials:");
    println!("   Callsign:           {}..={}", limits.min_callsign, limits.max_callsign);
    println!("   Password:           {}..={}", limits.min_password, limits.max_password);
    println!("   Email:              ..={}", limits.max_email);
    println!();
    println!("Directory:");
    println!("   Suffix:             {}", config.directory.suffix);
    println!("   Seeded groups:      {}", config.directory.groups.len());
    println!();

    Ok(())
}

// ============================================
// Helpers
// ============================================

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .try_init()
        .ok();
}
