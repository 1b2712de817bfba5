//! Command-line interface handling for the Plaza presence server.
//!
//! Flags given here override the matching settings of the configuration
//! file.

use clap::{Arg, Command};
use presence_server::PresenceBackend;
use std::path::PathBuf;

/// Command line arguments parsed from user input.
#[derive(Debug, Clone)]
pub struct CliArgs {
    /// Path to the configuration file
    pub config_path: PathBuf,
    /// Optional override for bind address
    pub bind_address: Option<String>,
    /// Optional override for log level
    pub log_level: Option<String>,
    /// Whether to force JSON log output
    pub json_logs: bool,
    /// Optional override for the presence backend
    pub presence_backend: Option<PresenceBackend>,
    /// Optional override for the Redis connection URL
    pub redis_url: Option<String>,
}

impl CliArgs {
    /// Parses command line arguments using clap.
    ///
    /// Exits the process with a usage message on invalid input.
    pub fn parse() -> Self {
        Self::from_matches(Self::command().get_matches())
    }

    fn command() -> Command {
        Command::new("Plaza Presence Server")
            .version(env!("CARGO_PKG_VERSION"))
            .about("Realtime presence, movement and chat for virtual office spaces")
            .arg(
                Arg::new("config")
                    .short('c')
                    .long("config")
                    .value_name("FILE")
                    .help("Configuration file path")
                    .default_value("config.toml"),
            )
            .arg(
                Arg::new("bind")
                    .short('b')
                    .long("bind")
                    .value_name("ADDRESS")
                    .help("Bind address (e.g., 127.0.0.1:8080)"),
            )
            .arg(
                Arg::new("log-level")
                    .short('l')
                    .long("log-level")
                    .value_name("LEVEL")
                    .help("Log level (trace, debug, info, warn, error)"),
            )
            .arg(
                Arg::new("json-logs")
                    .long("json-logs")
                    .help("Output logs in JSON format")
                    .action(clap::ArgAction::SetTrue),
            )
            .arg(
                Arg::new("presence-backend")
                    .long("presence-backend")
                    .value_name("BACKEND")
                    .help("Presence store: memory or redis")
                    .value_parser(|s: &str| s.parse::<PresenceBackend>()),
            )
            .arg(
                Arg::new("redis-url")
                    .long("redis-url")
                    .value_name("URL")
                    .help("Redis URL for the shared presence backend"),
            )
    }

    fn from_matches(matches: clap::ArgMatches) -> Self {
        Self {
            config_path: matches
                .get_one::<String>("config")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("config.toml")),
            bind_address: matches.get_one::<String>("bind").cloned(),
            log_level: matches.get_one::<String>("log-level").cloned(),
            json_logs: matches.get_flag("json-logs"),
            presence_backend: matches.get_one::<PresenceBackend>("presence-backend").copied(),
            redis_url: matches.get_one::<String>("redis-url").cloned(),
        }
    }
}
