//! Configuration management for the Plaza presence server.
//!
//! This module handles loading, validation, and conversion of server
//! configuration from TOML files and command-line arguments.

use presence_server::auth::DirectoryUser;
use presence_server::config::{ChatConfig, PresenceConfig};
use presence_server::health::CircuitBreakerConfig;
use presence_server::security::SecurityConfig;
use presence_server::spatial::{FloorBounds, MeetingZone, ZoneRegion};
use presence_server::{PresenceBackend, ServerConfig, SpaceConfig, StaticDirectory};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// Application configuration loaded from TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Server configuration settings
    pub server: ServerSettings,
    /// Presence backend settings
    #[serde(default)]
    pub presence: PresenceSettings,
    #[serde(default)]
    pub chat: ChatSettings,
    /// Inbound frame limits
    #[serde(default)]
    pub security: SecuritySettings,
    /// Logging configuration settings
    pub logging: LoggingSettings,
    /// Bounds for spaces without their own
    #[serde(default)]
    pub default_bounds: BoundsSettings,
    /// Statically configured spaces
    #[serde(default)]
    pub spaces: Vec<SpaceSettings>,
    /// Development user directory
    #[serde(default)]
    pub directory: DirectorySettings,
}

/// Network binding and connection limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Network address to bind the server to (e.g., "127.0.0.1:8080")
    pub bind_address: String,
    /// Maximum number of concurrent client connections
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Idle timeout in seconds (0 to disable)
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout: u64,
}

/// Default for connection_timeout
pub fn default_connection_timeout() -> u64 {
    60
}

fn default_max_connections() -> usize {
    1000
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}
fn default_key_prefix() -> String {
    "plaza".to_string()
}
fn default_key_ttl_secs() -> u64 {
    3600
}
fn default_breaker_failure_threshold() -> u32 {
    5
}
fn default_breaker_open_secs() -> u64 {
    30
}
fn default_breaker_success_threshold() -> u32 {
    2
}

/// Presence store selection and Redis tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceSettings {
    /// `memory` or `redis`
    #[serde(default)]
    pub backend: PresenceBackend,
    #[serde(default = "default_redis_url")]
    pub redis_url: String,
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    /// Expiry of a space's presence hash after its last write
    #[serde(default = "default_key_ttl_secs")]
    pub key_ttl_secs: u64,
    /// Consecutive Redis failures before the breaker opens
    #[serde(default = "default_breaker_failure_threshold")]
    pub breaker_failure_threshold: u32,
    #[serde(default = "default_breaker_open_secs")]
    pub breaker_open_secs: u64,
    #[serde(default = "default_breaker_success_threshold")]
    pub breaker_success_threshold: u32,
}

impl Default for PresenceSettings {
    fn default() -> Self {
        Self {
            backend: PresenceBackend::Memory,
            redis_url: default_redis_url(),
            key_prefix: default_key_prefix(),
            key_ttl_secs: default_key_ttl_secs(),
            breaker_failure_threshold: default_breaker_failure_threshold(),
            breaker_open_secs: default_breaker_open_secs(),
            breaker_success_threshold: default_breaker_success_threshold(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatSettings {
    /// Longer messages are truncated, not rejected
    pub max_content_chars: usize,
    pub history_limit: usize,
}

impl Default for ChatSettings {
    fn default() -> Self {
        let chat = ChatConfig::default();
        Self {
            max_content_chars: chat.max_content_chars,
            history_limit: chat.history_limit,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecuritySettings {
    /// Largest inbound frame in bytes
    pub max_message_size: usize,
    /// Sustained events per second per connection (0 disables)
    pub max_events_per_second: u32,
    pub burst: u32,
}

impl Default for SecuritySettings {
    fn default() -> Self {
        let security = SecurityConfig::default();
        Self {
            max_message_size: security.max_message_size,
            max_events_per_second: security.max_events_per_second,
            burst: security.burst,
        }
    }
}

/// Logging system configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level filter (trace, debug, info, warn, error)
    pub level: String,
    /// Whether to output logs in JSON format
    pub json_format: bool,
}

/// Walkable volume of a space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundsSettings {
    pub min_x: f64,
    pub max_x: f64,
    pub min_y: f64,
    pub max_y: f64,
    pub min_z: f64,
    pub max_z: f64,
}

impl Default for BoundsSettings {
    fn default() -> Self {
        FloorBounds::default().into()
    }
}

impl From<FloorBounds> for BoundsSettings {
    fn from(b: FloorBounds) -> Self {
        Self {
            min_x: b.min_x,
            max_x: b.max_x,
            min_y: b.min_y,
            max_y: b.max_y,
            min_z: b.min_z,
            max_z: b.max_z,
        }
    }
}

impl From<BoundsSettings> for FloorBounds {
    fn from(b: BoundsSettings) -> Self {
        Self {
            min_x: b.min_x,
            max_x: b.max_x,
            min_y: b.min_y,
            max_y: b.max_y,
            min_z: b.min_z,
            max_z: b.max_z,
        }
    }
}

/// A rectangular meeting zone on the x/z floor plane.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZoneSettings {
    pub room_id: String,
    pub min_x: f64,
    pub max_x: f64,
    pub min_z: f64,
    pub max_z: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpaceSettings {
    pub id: String,
    /// Organization whose members may chat here
    #[serde(default)]
    pub organization: Option<String>,
    #[serde(default)]
    pub bounds: Option<BoundsSettings>,
    #[serde(default)]
    pub zones: Vec<ZoneSettings>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DirectorySettings {
    #[serde(default)]
    pub users: Vec<UserSettings>,
}

/// A user of the static development directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserSettings {
    pub user_id: String,
    pub token: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub organizations: Vec<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                bind_address: "127.0.0.1:8080".to_string(),
                max_connections: default_max_connections(),
                connection_timeout: default_connection_timeout(),
            },
            presence: PresenceSettings::default(),
            chat: ChatSettings::default(),
            security: SecuritySettings::default(),
            logging: LoggingSettings {
                level: "info".to_string(),
                json_format: false,
            },
            default_bounds: BoundsSettings::default(),
            spaces: vec![SpaceSettings {
                id: "lobby".to_string(),
                organization: Some("demo".to_string()),
                bounds: None,
                zones: vec![ZoneSettings {
                    room_id: "lobby-standup".to_string(),
                    min_x: 100.0,
                    max_x: 200.0,
                    min_z: 100.0,
                    max_z: 200.0,
                }],
            }],
            directory: DirectorySettings {
                users: vec![UserSettings {
                    user_id: "demo-user".to_string(),
                    token: "change-me-dev-token".to_string(),
                    display_name: Some("Demo User".to_string()),
                    organizations: vec!["demo".to_string()],
                }],
            },
        }
    }
}

impl AppConfig {
    /// Loads configuration from a TOML file.
    ///
    /// If the file doesn't exist, creates a default configuration file at the
    /// specified path and returns the default configuration.
    pub async fn load_from_file(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        if path.exists() {
            let content = tokio::fs::read_to_string(path).await?;
            let config: AppConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            let default_config = AppConfig::default();
            let toml_content = toml::to_string_pretty(&default_config)?;
            tokio::fs::write(path, toml_content).await?;
            info!("Created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    /// Converts the application configuration to a presence server
    /// configuration.
    pub fn to_server_config(&self) -> Result<ServerConfig, Box<dyn std::error::Error>> {
        let presence = &self.presence;
        let config = ServerConfig {
            bind_address: self.server.bind_address.parse()?,
            max_connections: self.server.max_connections,
            connection_timeout: self.server.connection_timeout,
            security: SecurityConfig {
                max_message_size: self.security.max_message_size,
                max_events_per_second: self.security.max_events_per_second,
                burst: self.security.burst,
            },
            presence: PresenceConfig {
                backend: presence.backend,
                redis_url: presence.redis_url.clone(),
                key_prefix: presence.key_prefix.clone(),
                key_ttl: Duration::from_secs(presence.key_ttl_secs),
                breaker: CircuitBreakerConfig {
                    failure_threshold: presence.breaker_failure_threshold,
                    open_duration: Duration::from_secs(presence.breaker_open_secs),
                    success_threshold: presence.breaker_success_threshold,
                },
            },
            chat: ChatConfig {
                max_content_chars: self.chat.max_content_chars,
                history_limit: self.chat.history_limit,
            },
            default_bounds: self.default_bounds.into(),
            spaces: self
                .spaces
                .iter()
                .map(|space| SpaceConfig {
                    id: space.id.as_str().into(),
                    organization: space.organization.clone(),
                    bounds: space.bounds.map(FloorBounds::from),
                    zones: space
                        .zones
                        .iter()
                        .map(|zone| MeetingZone {
                            room_id: zone.room_id.clone(),
                            region: ZoneRegion {
                                min_x: zone.min_x,
                                max_x: zone.max_x,
                                min_z: zone.min_z,
                                max_z: zone.max_z,
                            },
                        })
                        .collect(),
                })
                .collect(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Builds the static user directory, with every configured space owned
    /// by its organization.
    pub fn build_directory(&self) -> StaticDirectory {
        let users = self
            .directory
            .users
            .iter()
            .map(|user| DirectoryUser {
                user_id: user.user_id.as_str().into(),
                token: user.token.clone(),
                display_name: user.display_name.clone(),
                organizations: user.organizations.clone(),
            })
            .collect();
        self.spaces
            .iter()
            .fold(StaticDirectory::new(users), |directory, space| match &space.organization {
                Some(organization) => directory.with_space_owner(space.id.as_str().into(), organization.clone()),
                None => directory,
            })
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.server.bind_address.parse::<std::net::SocketAddr>().is_err() {
            return Err(format!(
                "Invalid bind address: {}",
                &self.server.bind_address
            ));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(format!(
                "Invalid log level: {}. Must be one of: {valid_levels:?}",
                &self.logging.level
            ));
        }

        if self.presence.backend == PresenceBackend::Redis && self.presence.redis_url.trim().is_empty() {
            return Err("presence.redis_url is required for the redis backend".to_string());
        }
        if self.presence.key_prefix.trim().is_empty() {
            return Err("presence.key_prefix cannot be empty".to_string());
        }
        if self.chat.max_content_chars == 0 {
            return Err("chat.max_content_chars must be greater than 0".to_string());
        }

        let mut tokens = HashSet::new();
        let mut user_ids = HashSet::new();
        for user in &self.directory.users {
            if user.user_id.trim().is_empty() || user.token.trim().is_empty() {
                return Err("directory users need a user_id and a token".to_string());
            }
            if !user_ids.insert(user.user_id.as_str()) {
                return Err(format!("duplicate directory user '{}'", user.user_id));
            }
            if !tokens.insert(user.token.as_str()) {
                return Err(format!("directory user '{}' reuses another user's token", user.user_id));
            }
        }

        for space in &self.spaces {
            if space.organization.is_none() {
                warn!("⚠️ Space '{}' has no organization; nobody may chat in it", space.id);
            }
        }

        self.to_server_config()
            .map(|_| ())
            .map_err(|e| e.to_string())
    }
}
