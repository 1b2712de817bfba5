//! Main application logic and lifecycle management.
//!
//! [`Application`] wires configuration into a running presence server,
//! reports health periodically and drives the phased shutdown.

use crate::{
    cli::CliArgs,
    config::AppConfig,
    logging::display_banner,
    signals::{setup_signal_handlers, setup_signal_handlers_silent},
};
use presence_server::{create_server_with_config, PresenceServer, ShutdownState, StatsSnapshot};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Interval between periodic health reports.
const STATS_INTERVAL: Duration = Duration::from_secs(60);

/// Owns the loaded configuration and the presence server built from it.
pub struct Application {
    config: AppConfig,
    server: Arc<PresenceServer>,
}

impl Application {
    /// Creates a new application instance.
    ///
    /// # Process
    ///
    /// 1. Load configuration from file (creating default if missing)
    /// 2. Apply command-line argument overrides
    /// 3. Validate merged configuration
    /// 4. Display startup banner
    /// 5. Build the presence server and its user directory
    pub async fn new(args: CliArgs) -> Result<Self, Box<dyn std::error::Error>> {
        info!("🔧 Loading configuration from: {}", args.config_path.display());
        let mut config = AppConfig::load_from_file(&args.config_path).await?;
        apply_overrides(&mut config, &args);

        if let Err(e) = config.validate() {
            return Err(format!("Configuration validation failed: {e}").into());
        }
        info!("✅ Configuration loaded and validated successfully");

        display_banner();

        let server_config = config.to_server_config()?;
        let directory = config.build_directory();
        info!("👥 Directory loaded with {} users", directory.user_count());
        let server = create_server_with_config(server_config, directory).await?;

        info!(
            "📂 Config: {} | Presence backend: {:?}",
            args.config_path.display(),
            config.presence.backend
        );

        Ok(Self {
            config,
            server: Arc::new(server),
        })
    }

    /// Runs the server until a termination signal, then shuts down in
    /// phases.
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        info!("🌟 Starting Plaza presence server");
        self.log_configuration_summary();

        let shutdown_state = ShutdownState::new();

        let server_handle = {
            let server = self.server.clone();
            let shutdown_state = shutdown_state.clone();
            tokio::spawn(async move {
                match server.start_with_shutdown_state(shutdown_state).await {
                    Ok(()) => info!("✅ Server completed successfully"),
                    Err(e) => {
                        error!("❌ Server error: {:?}", e);
                        std::process::exit(1);
                    }
                }
            })
        };

        let monitoring_handle = {
            let server = self.server.clone();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(STATS_INTERVAL);
                interval.tick().await;
                let mut last_events = 0u64;

                loop {
                    interval.tick().await;
                    let stats = server.stats();
                    let events_this_period = stats.events_handled.saturating_sub(last_events);
                    last_events = stats.events_handled;

                    info!(
                        "📊 System Health - {} connections | {} events/min | {} dropped | {} chats delivered",
                        stats.active_connections, events_this_period, stats.events_dropped, stats.chat_delivered
                    );
                }
            })
        };

        info!("✅ Plaza is now running!");
        info!("🏢 Ready to accept connections on {}", self.config.server.bind_address);
        info!("🔍 Health monitoring active - stats every {} seconds", STATS_INTERVAL.as_secs());
        info!("🛑 Press Ctrl+C to gracefully shutdown");

        let signal_shutdown_state = setup_signal_handlers().await?;

        // A second signal while draining exits immediately.
        tokio::spawn(async move {
            if let Err(e) = setup_signal_handlers_silent().await {
                error!("Failed to set up forced shutdown signal handler: {e}");
                return;
            }
            warn!("Shutdown signal received again, exiting now");
            std::process::exit(1);
        });

        if signal_shutdown_state.is_shutdown_initiated() {
            shutdown_state.initiate_shutdown();
        }

        info!("📡 Phase 1: Stopping accept loop and closing connections...");
        monitoring_handle.abort();

        info!("⏳ Phase 2: Waiting for connection cleanup...");
        match tokio::time::timeout(Duration::from_secs(8), server_handle).await {
            Ok(_) => info!("✅ Server task completed gracefully"),
            Err(_) => warn!("⏰ Server task did not complete within timeout, proceeding with shutdown"),
        }
        shutdown_state.complete_shutdown();

        log_final_statistics(&self.server.stats());
        info!("✅ Plaza shutdown complete");

        Ok(())
    }

    fn log_configuration_summary(&self) {
        info!("📋 Configuration Summary:");
        info!("  🌐 Bind address: {}", self.config.server.bind_address);
        info!("  👥 Max connections: {}", self.config.server.max_connections);
        info!("  ⏱️ Connection timeout: {}s", self.config.server.connection_timeout);
        info!("  🗄️ Presence backend: {:?}", self.config.presence.backend);
        info!("  🏢 Spaces configured: {}", self.config.spaces.len());
        info!("  💬 Max chat length: {} chars", self.config.chat.max_content_chars);
    }
}

/// Applies command-line overrides on top of the file configuration.
pub fn apply_overrides(config: &mut AppConfig, args: &CliArgs) {
    if let Some(bind_address) = &args.bind_address {
        config.server.bind_address = bind_address.clone();
    }
    if let Some(log_level) = &args.log_level {
        config.logging.level = log_level.clone();
    }
    if args.json_logs {
        config.logging.json_format = true;
    }
    if let Some(backend) = args.presence_backend {
        config.presence.backend = backend;
    }
    if let Some(redis_url) = &args.redis_url {
        config.presence.redis_url = redis_url.clone();
    }
}

fn log_final_statistics(stats: &StatsSnapshot) {
    info!("📊 Final Statistics:");
    info!("  - Uptime: {}s", stats.uptime_seconds);
    info!("  - Connections opened: {}", stats.connections_opened);
    info!("  - Connections rejected: {}", stats.connections_rejected);
    info!("  - Authentication failures: {}", stats.auth_failures);
    info!("  - Events handled: {}", stats.events_handled);
    info!("  - Events dropped: {}", stats.events_dropped);
    info!("  - Chat messages delivered: {}", stats.chat_delivered);
}
