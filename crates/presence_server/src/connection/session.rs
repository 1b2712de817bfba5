//! Per-connection session state.

use crate::auth::VerifiedIdentity;
use crate::types::{ConnectionId, SpaceId, UserId};
use std::collections::HashSet;

/// Where a connection stands in its lifecycle.
///
/// `Authenticated` -> `InSpace` -> `Disconnected`; a connection may move
/// between spaces but only ever occupies one at a time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Authenticated,
    InSpace(SpaceId),
    Disconnected,
}

/// State owned by a single connection task.
///
/// Nothing here is shared: the connection's own task is the only reader
/// and writer, so no locking is needed.
#[derive(Debug, Clone)]
pub struct ConnectionSession {
    pub connection_id: ConnectionId,
    pub identity: VerifiedIdentity,
    pub state: SessionState,
    /// Name shown to others, chosen at join
    pub display_name: String,
    /// Direct-message channels this connection is subscribed to
    pub direct_channels: HashSet<String>,
    /// Meeting zone the connection currently stands in
    pub zone: Option<String>,
}

impl ConnectionSession {
    pub fn new(connection_id: ConnectionId, identity: VerifiedIdentity) -> Self {
        let display_name = identity
            .display_name
            .clone()
            .unwrap_or_else(|| identity.user_id.to_string());
        Self {
            connection_id,
            identity,
            state: SessionState::Authenticated,
            display_name,
            direct_channels: HashSet::new(),
            zone: None,
        }
    }

    pub fn user_id(&self) -> &UserId {
        &self.identity.user_id
    }

    pub fn current_space(&self) -> Option<&SpaceId> {
        match &self.state {
            SessionState::InSpace(space_id) => Some(space_id),
            _ => None,
        }
    }

    pub fn is_disconnected(&self) -> bool {
        self.state == SessionState::Disconnected
    }
}
