//! Message handling for client-server communication.
//!
//! This module provides the typed wire protocol and the boundary decoder that
//! turns raw text frames into validated client events or a rejection reason.

pub mod decode;
pub mod types;

pub use decode::{decode_client_event, DecodeError, MAX_ID_CHARS};
pub use types::{ClientEvent, PresenceView, ServerEvent};
