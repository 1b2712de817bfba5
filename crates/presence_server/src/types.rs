//! Identity, geometry and presence types shared across the server.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a live connection.
///
/// Connection IDs are UUID v4 so they stay unique across every process in a
/// horizontally scaled deployment. A user holding two tabs has two of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    /// Creates a new random connection ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::str::FromStr for ConnectionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_id!(
    /// Stable user identifier produced by the credential verifier.
    UserId
);

string_id!(
    /// Identifier of a space (a shared room instance).
    SpaceId
);

/// A point in space coordinates. The floor plane is x/z, y is height.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Position {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

/// Discrete heading of an avatar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    #[default]
    Down,
    Left,
    Right,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Up => "up",
            Direction::Down => "down",
            Direction::Left => "left",
            Direction::Right => "right",
        }
    }
}

/// The mutable part of a presence record carried by a move event.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionUpdate {
    pub position: Position,
    pub direction: Direction,
}

/// Live presence of one connection inside one space.
///
/// Owned by the presence store. Only the owning connection's move events
/// change `position` and `direction`; everything else is fixed at join.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceRecord {
    pub connection_id: ConnectionId,
    pub user_id: UserId,
    pub display_name: String,
    pub position: Position,
    pub direction: Direction,
    /// Opaque avatar reference supplied by the client
    #[serde(default)]
    pub avatar: Option<serde_json::Value>,
    pub space_id: SpaceId,
}

impl PresenceRecord {
    pub fn apply(&mut self, update: PositionUpdate) {
        self.position = update.position;
        self.direction = update.direction;
    }
}

/// Audience kind of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChannelType {
    Space,
    Dm,
}

/// A persisted, immutable chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub channel_type: ChannelType,
    pub channel_id: String,
    pub sender_user_id: UserId,
    pub sender_display_name: String,
    pub content: String,
    /// Milliseconds since the Unix epoch
    pub created_at: u64,
}

const DM_PREFIX: &str = "dm:";

/// Canonical direct-message channel id for an unordered user pair.
///
/// Both participants compute the same value independently:
/// `dm_channel_id(a, b) == dm_channel_id(b, a)`.
pub fn dm_channel_id(a: &UserId, b: &UserId) -> String {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    format!("{DM_PREFIX}{lo}:{hi}")
}

/// Resolves the counterpart of `me` from a client-supplied DM channel reference.
///
/// The reference is either the other user's id or a canonical channel id. A
/// canonical id is only accepted when it recomputes to itself with `me` as one
/// side, so a client cannot address another pair's conversation.
pub fn dm_counterpart(me: &UserId, reference: &str) -> Option<UserId> {
    let other = match reference.strip_prefix(DM_PREFIX) {
        Some(pair) => {
            let mine = me.as_str();
            let candidate = pair
                .strip_prefix(mine)
                .and_then(|rest| rest.strip_prefix(':'))
                .or_else(|| pair.strip_suffix(mine).and_then(|rest| rest.strip_suffix(':')))?;
            let other = UserId::from(candidate);
            if dm_channel_id(me, &other) != reference {
                return None;
            }
            other
        }
        None => UserId::from(reference),
    };

    if other.as_str().is_empty() || &other == me {
        return None;
    }
    Some(other)
}

/// Milliseconds since the Unix epoch.
pub fn current_timestamp_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dm_channel_id_is_symmetric() {
        let pairs = [("alice", "bob"), ("bob", "alice"), ("zed", "amy"), ("u-1", "u-10")];
        for (a, b) in pairs {
            let (a, b) = (UserId::from(a), UserId::from(b));
            assert_eq!(dm_channel_id(&a, &b), dm_channel_id(&b, &a));
        }
        assert_eq!(dm_channel_id(&"bob".into(), &"alice".into()), "dm:alice:bob");
    }

    #[test]
    fn counterpart_from_plain_user_id() {
        let me = UserId::from("alice");
        assert_eq!(dm_counterpart(&me, "bob"), Some(UserId::from("bob")));
        assert_eq!(dm_counterpart(&me, "alice"), None);
        assert_eq!(dm_counterpart(&me, ""), None);
    }

    #[test]
    fn counterpart_from_canonical_id() {
        let me = UserId::from("bob");
        assert_eq!(dm_counterpart(&me, "dm:alice:bob"), Some(UserId::from("alice")));
        let me = UserId::from("alice");
        assert_eq!(dm_counterpart(&me, "dm:alice:bob"), Some(UserId::from("bob")));
    }

    #[test]
    fn canonical_id_of_another_pair_is_refused() {
        let me = UserId::from("mallory");
        assert_eq!(dm_counterpart(&me, "dm:alice:bob"), None);
        // Non-canonical ordering is not accepted either.
        let me = UserId::from("alice");
        assert_eq!(dm_counterpart(&me, "dm:bob:alice"), None);
    }

    #[test]
    fn presence_record_uses_camel_case_on_the_wire() {
        let record = PresenceRecord {
            connection_id: ConnectionId::new(),
            user_id: "alice".into(),
            display_name: "Alice".into(),
            position: Position::new(1.0, 0.0, 2.0),
            direction: Direction::Left,
            avatar: None,
            space_id: "hq".into(),
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["displayName"], "Alice");
        assert_eq!(json["direction"], "left");
        assert_eq!(json["spaceId"], "hq");
    }
}
