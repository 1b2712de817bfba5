//! Message type definitions for client-server communication.
//!
//! Every frame in either direction is a JSON object of the form
//! `{"event": "<name>", "data": {...}}` with camelCase payload fields.
//!
//! # Examples
//!
//! A move sent by a client:
//! ```json
//! {
//!   "event": "move",
//!   "data": { "spaceId": "hq", "x": 12.5, "y": 0.0, "z": 4.0, "direction": "left" }
//! }
//! ```

use crate::connection::Frame;
use crate::types::{
    ChannelType, ChatMessage, ConnectionId, Direction, Position, PresenceRecord, SpaceId, UserId,
};
use serde::{Deserialize, Serialize};

/// An event sent from a client to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientEvent {
    JoinSpace {
        space_id: SpaceId,
        #[serde(default)]
        display_name: Option<String>,
        x: f64,
        y: f64,
        z: f64,
        #[serde(default)]
        direction: Direction,
        #[serde(default)]
        avatar: Option<serde_json::Value>,
    },
    LeaveSpace {
        space_id: SpaceId,
    },
    Move {
        space_id: SpaceId,
        x: f64,
        y: f64,
        z: f64,
        direction: Direction,
    },
    JoinDm {
        other_user_id: UserId,
    },
    LeaveDm {
        other_user_id: UserId,
    },
    ChatMessage {
        channel_type: ChannelType,
        channel_id: String,
        content: String,
    },
}

impl ClientEvent {
    /// Wire name of the event, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::JoinSpace { .. } => "join_space",
            ClientEvent::LeaveSpace { .. } => "leave_space",
            ClientEvent::Move { .. } => "move",
            ClientEvent::JoinDm { .. } => "join_dm",
            ClientEvent::LeaveDm { .. } => "leave_dm",
            ClientEvent::ChatMessage { .. } => "chat_message",
        }
    }
}

/// Public view of a presence record as other clients see it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceView {
    pub user_id: UserId,
    pub connection_id: ConnectionId,
    pub display_name: String,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub direction: Direction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<serde_json::Value>,
}

impl From<&PresenceRecord> for PresenceView {
    fn from(record: &PresenceRecord) -> Self {
        let Position { x, y, z } = record.position;
        Self {
            user_id: record.user_id.clone(),
            connection_id: record.connection_id,
            display_name: record.display_name.clone(),
            x,
            y,
            z,
            direction: record.direction,
            avatar: record.avatar.clone(),
        }
    }
}

/// An event sent from the server to one or more clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    /// Full roster of a space, sent only to the joiner
    SpaceState {
        space_id: SpaceId,
        users: Vec<PresenceView>,
    },
    UserJoined(PresenceView),
    UserLeft {
        user_id: UserId,
        connection_id: ConnectionId,
    },
    UserMoved {
        user_id: UserId,
        connection_id: ConnectionId,
        x: f64,
        y: f64,
        z: f64,
        direction: Direction,
    },
    ChatMessage(ChatMessage),
    ZoneEntered {
        space_id: SpaceId,
        room_id: String,
    },
    ZoneExited {
        space_id: SpaceId,
        room_id: String,
    },
}

impl ServerEvent {
    pub fn user_left(user_id: &UserId, connection_id: ConnectionId) -> Self {
        ServerEvent::UserLeft {
            user_id: user_id.clone(),
            connection_id,
        }
    }

    pub fn user_moved(record: &PresenceRecord) -> Self {
        let Position { x, y, z } = record.position;
        ServerEvent::UserMoved {
            user_id: record.user_id.clone(),
            connection_id: record.connection_id,
            x,
            y,
            z,
            direction: record.direction,
        }
    }

    /// Serializes once into a shareable text frame.
    pub fn to_frame(&self) -> Result<Frame, serde_json::Error> {
        serde_json::to_string(self).map(Frame::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn client_events_parse_from_wire_shape() {
        let event: ClientEvent = serde_json::from_value(json!({
            "event": "move",
            "data": {"spaceId": "hq", "x": 1.0, "y": 0.0, "z": 2.5, "direction": "left"}
        }))
        .unwrap();
        assert_eq!(
            event,
            ClientEvent::Move {
                space_id: "hq".into(),
                x: 1.0,
                y: 0.0,
                z: 2.5,
                direction: Direction::Left,
            }
        );

        let event: ClientEvent = serde_json::from_value(json!({
            "event": "chat_message",
            "data": {"channelType": "DM", "channelId": "bob", "content": "hi"}
        }))
        .unwrap();
        assert_eq!(event.name(), "chat_message");
    }

    #[test]
    fn join_space_defaults_optional_fields() {
        let event: ClientEvent = serde_json::from_value(json!({
            "event": "join_space",
            "data": {"spaceId": "hq", "x": 0, "y": 0, "z": 0}
        }))
        .unwrap();
        match event {
            ClientEvent::JoinSpace { display_name, direction, avatar, .. } => {
                assert_eq!(display_name, None);
                assert_eq!(direction, Direction::Down);
                assert_eq!(avatar, None);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn server_events_serialize_with_event_envelope() {
        let event = ServerEvent::ZoneEntered {
            space_id: "hq".into(),
            room_id: "room1".into(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value, json!({"event": "zone_entered", "data": {"spaceId": "hq", "roomId": "room1"}}));

        let record = PresenceRecord {
            connection_id: ConnectionId::new(),
            user_id: "alice".into(),
            display_name: "Alice".into(),
            position: Position::new(1.0, 2.0, 3.0),
            direction: Direction::Up,
            avatar: None,
            space_id: "hq".into(),
        };
        let value = serde_json::to_value(ServerEvent::user_moved(&record)).unwrap();
        assert_eq!(value["event"], "user_moved");
        assert_eq!(value["data"]["userId"], "alice");
        assert_eq!(value["data"]["z"], 3.0);

        let value = serde_json::to_value(ServerEvent::UserJoined(PresenceView::from(&record))).unwrap();
        assert_eq!(value["data"]["displayName"], "Alice");
        assert!(value["data"].get("avatar").is_none());
    }
}
