//! Server configuration types and defaults.
//!
//! This module contains the configuration the presence server is built
//! from. The application shell loads it from TOML and converts it here.

use crate::chat::DEFAULT_MAX_CONTENT_CHARS;
use crate::health::CircuitBreakerConfig;
use crate::security::SecurityConfig;
use crate::spatial::{FloorBounds, MeetingZone, SpaceCatalog, SpaceGeometry, ZoneMap};
use crate::types::SpaceId;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::time::Duration;

/// Configuration structure for the presence server.
///
/// Contains network settings, connection limits, backend selection and the
/// static geometry of every known space.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// The socket address to bind the server to
    pub bind_address: SocketAddr,

    /// Maximum number of concurrent connections allowed
    pub max_connections: usize,

    /// Idle timeout in seconds; the server pings at half this interval.
    /// 0 disables both.
    pub connection_timeout: u64,

    /// Security configuration settings
    pub security: SecurityConfig,

    pub presence: PresenceConfig,

    pub chat: ChatConfig,

    /// Bounds used by spaces without their own
    pub default_bounds: FloorBounds,

    pub spaces: Vec<SpaceConfig>,
}

/// Which presence backend to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceBackend {
    #[default]
    Memory,
    Redis,
}

impl std::str::FromStr for PresenceBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(PresenceBackend::Memory),
            "redis" => Ok(PresenceBackend::Redis),
            other => Err(format!("unknown presence backend '{other}' (expected memory or redis)")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceConfig {
    pub backend: PresenceBackend,
    pub redis_url: String,
    /// Prefix for presence keys and backplane channels
    pub key_prefix: String,
    /// Lifetime of a space hash after its last write
    pub key_ttl: Duration,
    pub breaker: CircuitBreakerConfig,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            backend: PresenceBackend::Memory,
            redis_url: "redis://127.0.0.1:6379".to_string(),
            key_prefix: "plaza".to_string(),
            key_ttl: Duration::from_secs(3600),
            breaker: CircuitBreakerConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    pub max_content_chars: usize,
    /// Messages kept per channel by the in-memory chat store
    pub history_limit: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            max_content_chars: DEFAULT_MAX_CONTENT_CHARS,
            history_limit: 500,
        }
    }
}

/// Static description of one space.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpaceConfig {
    pub id: SpaceId,
    /// Organization whose members may chat in the space
    pub organization: Option<String>,
    pub bounds: Option<FloorBounds>,
    pub zones: Vec<MeetingZone>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([127, 0, 0, 1], 8080)),
            max_connections: 1000,
            connection_timeout: 60,
            security: SecurityConfig::default(),
            presence: PresenceConfig::default(),
            chat: ChatConfig::default(),
            default_bounds: FloorBounds::default(),
            spaces: Vec::new(),
        }
    }
}

impl ServerConfig {
    /// Builds the geometry catalog from the configured spaces.
    pub fn catalog(&self) -> SpaceCatalog {
        self.spaces.iter().fold(SpaceCatalog::new(self.default_bounds), |catalog, space| {
            catalog.with_space(
                space.id.clone(),
                SpaceGeometry {
                    bounds: space.bounds.unwrap_or(self.default_bounds),
                    zones: ZoneMap::new(space.zones.clone()),
                },
            )
        })
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.connection_timeout > 0).then(|| Duration::from_secs(self.connection_timeout))
    }

    /// Checks limits, space ids and geometry.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_connections == 0 {
            return Err("max_connections must be greater than 0".to_string());
        }
        if self.security.max_message_size == 0 {
            return Err("max_message_size must be greater than 0".to_string());
        }
        if self.chat.max_content_chars == 0 {
            return Err("chat max_content_chars must be greater than 0".to_string());
        }
        let mut seen = HashSet::new();
        for space in &self.spaces {
            if space.id.as_str().trim().is_empty() {
                return Err("space id cannot be empty".to_string());
            }
            if !seen.insert(&space.id) {
                return Err(format!("duplicate space id '{}'", space.id));
            }
        }
        self.catalog().validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spatial::ZoneRegion;
    use crate::types::Position;

    fn space(id: &str) -> SpaceConfig {
        SpaceConfig {
            id: id.into(),
            organization: Some("acme".into()),
            bounds: None,
            zones: vec![MeetingZone {
                room_id: "room1".into(),
                region: ZoneRegion { min_x: 0.0, max_x: 10.0, min_z: 0.0, max_z: 10.0 },
            }],
        }
    }

    #[test]
    fn default_config_is_valid() {
        assert!(ServerConfig::default().validate().is_ok());
        assert_eq!(ServerConfig::default().idle_timeout(), Some(Duration::from_secs(60)));
    }

    #[test]
    fn duplicate_spaces_are_rejected() {
        let config = ServerConfig {
            spaces: vec![space("hq"), space("hq")],
            ..ServerConfig::default()
        };
        assert!(config.validate().unwrap_err().contains("duplicate"));
    }

    #[test]
    fn catalog_carries_zones_and_default_bounds() {
        let config = ServerConfig {
            spaces: vec![space("hq")],
            ..ServerConfig::default()
        };
        let catalog = config.catalog();
        let hq = SpaceId::from("hq");
        assert_eq!(catalog.bounds_for(&hq), &FloorBounds::default());
        assert_eq!(catalog.detect_zone(&hq, Position::new(5.0, 0.0, 5.0)), Some("room1"));
    }

    #[test]
    fn backend_parses_case_insensitively() {
        assert_eq!("Redis".parse::<PresenceBackend>(), Ok(PresenceBackend::Redis));
        assert!("etcd".parse::<PresenceBackend>().is_err());
    }
}
