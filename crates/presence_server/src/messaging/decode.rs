//! Boundary validation of inbound frames.

use super::types::ClientEvent;
use crate::types::{ChannelType, Position};

/// Longest accepted identifier in an inbound event.
pub const MAX_ID_CHARS: usize = 128;

/// Why an inbound frame was rejected. Rejections drop the frame only.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DecodeError {
    #[error("malformed event: {0}")]
    Malformed(String),

    #[error("invalid field '{field}': {reason}")]
    InvalidField {
        field: &'static str,
        reason: &'static str,
    },
}

fn check_id(field: &'static str, value: &str) -> Result<(), DecodeError> {
    if value.trim().is_empty() {
        return Err(DecodeError::InvalidField { field, reason: "must not be empty" });
    }
    if value.chars().count() > MAX_ID_CHARS {
        return Err(DecodeError::InvalidField { field, reason: "too long" });
    }
    Ok(())
}

fn check_position(x: f64, y: f64, z: f64) -> Result<(), DecodeError> {
    if Position::new(x, y, z).is_finite() {
        Ok(())
    } else {
        Err(DecodeError::InvalidField { field: "position", reason: "must be finite" })
    }
}

/// Parses and validates one text frame into a typed client event.
///
/// Only structural validation happens here. Clamping to floor bounds and
/// authorization are the handlers' business.
pub fn decode_client_event(text: &str) -> Result<ClientEvent, DecodeError> {
    let event: ClientEvent =
        serde_json::from_str(text).map_err(|e| DecodeError::Malformed(e.to_string()))?;

    match &event {
        ClientEvent::JoinSpace { space_id, x, y, z, .. } => {
            check_id("spaceId", space_id.as_str())?;
            check_position(*x, *y, *z)?;
        }
        ClientEvent::Move { space_id, x, y, z, .. } => {
            check_id("spaceId", space_id.as_str())?;
            check_position(*x, *y, *z)?;
        }
        ClientEvent::LeaveSpace { space_id } => check_id("spaceId", space_id.as_str())?,
        ClientEvent::JoinDm { other_user_id } | ClientEvent::LeaveDm { other_user_id } => {
            check_id("otherUserId", other_user_id.as_str())?
        }
        ClientEvent::ChatMessage { channel_type, channel_id, .. } => {
            let limit = match channel_type {
                ChannelType::Space => MAX_ID_CHARS,
                // Canonical DM ids carry two user ids
                ChannelType::Dm => MAX_ID_CHARS * 2 + 4,
            };
            if channel_id.trim().is_empty() {
                return Err(DecodeError::InvalidField { field: "channelId", reason: "must not be empty" });
            }
            if channel_id.chars().count() > limit {
                return Err(DecodeError::InvalidField { field: "channelId", reason: "too long" });
            }
        }
    }
    Ok(event)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_json_and_unknown_events() {
        assert!(matches!(decode_client_event("not json"), Err(DecodeError::Malformed(_))));
        assert!(matches!(
            decode_client_event(r#"{"event":"teleport","data":{}}"#),
            Err(DecodeError::Malformed(_))
        ));
        assert!(matches!(
            decode_client_event(r#"{"event":"move","data":{"spaceId":"hq","x":1,"y":0,"z":0,"direction":"north"}}"#),
            Err(DecodeError::Malformed(_))
        ));
    }

    #[test]
    fn rejects_empty_and_oversized_ids() {
        let empty = r#"{"event":"leave_space","data":{"spaceId":"  "}}"#;
        assert!(matches!(decode_client_event(empty), Err(DecodeError::InvalidField { field: "spaceId", .. })));

        let long = format!(
            r#"{{"event":"join_dm","data":{{"otherUserId":"{}"}}}}"#,
            "u".repeat(MAX_ID_CHARS + 1)
        );
        assert!(matches!(decode_client_event(&long), Err(DecodeError::InvalidField { .. })));
    }

    #[test]
    fn accepts_well_formed_events() {
        let join = r#"{"event":"join_space","data":{"spaceId":"hq","displayName":"Al","x":1,"y":0,"z":2,"direction":"up","avatar":{"sprite":"cat"}}}"#;
        assert_eq!(decode_client_event(join).unwrap().name(), "join_space");

        let chat = r#"{"event":"chat_message","data":{"channelType":"SPACE","channelId":"hq","content":"hello"}}"#;
        assert_eq!(decode_client_event(chat).unwrap().name(), "chat_message");
    }
}
