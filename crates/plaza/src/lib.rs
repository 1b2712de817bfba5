//! # Plaza - Presence Server Entry Point
//!
//! Realtime presence for virtual office spaces. This crate handles CLI
//! parsing, configuration loading, logging and the application lifecycle
//! around the `presence_server` core.
//!
//! ## Quick Start
//!
//! ```bash
//! # Run with default configuration
//! plaza
//!
//! # Specify custom configuration
//! plaza --config production.toml
//!
//! # Share presence across instances through Redis
//! plaza --presence-backend redis --redis-url redis://cache:6379
//!
//! # JSON logging for production
//! plaza --json-logs
//! ```
//!
//! ## Configuration
//!
//! The server loads configuration from a TOML file (default: `config.toml`).
//! If the file doesn't exist, a default configuration will be created.
//!
//! ## Signal Handling
//!
//! SIGINT and SIGTERM start a graceful shutdown; a second signal exits
//! immediately.

use tracing::error;

mod app;
mod cli;
mod config;
mod logging;
mod signals;

use app::{apply_overrides, Application};
use cli::CliArgs;
use config::AppConfig;

/// Parses arguments, sets up logging and runs the application.
///
/// # Exit Codes
///
/// * **0**: Successful execution and shutdown
/// * **1**: Error during startup, configuration, or runtime
pub async fn init() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    // Configuration is read once up front for the logging settings.
    let mut config = AppConfig::load_from_file(&args.config_path)
        .await
        .unwrap_or_default();
    apply_overrides(&mut config, &args);

    if let Err(e) = logging::setup_logging(&config.logging, args.json_logs) {
        eprintln!("❌ Failed to setup logging: {e}");
        std::process::exit(1);
    }

    match Application::new(args).await {
        Ok(app) => {
            if let Err(e) = app.run().await {
                error!("❌ Application error: {:?}", e);
                std::process::exit(1);
            }
        }
        Err(e) => {
            error!("❌ Failed to start application: {e:?}");
            std::process::exit(1);
        }
    }

    Ok(())
}

pub use config::{LoggingSettings, PresenceSettings, ServerSettings, SpaceSettings};
