//! Broadcast groups over per-connection mailboxes.

use crate::connection::{ConnectionManager, Frame};
use crate::messaging::ServerEvent;
use crate::types::{ConnectionId, SpaceId};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tracing::{error, trace};

/// A logical audience.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum GroupKey {
    /// Every connection currently in a space
    Space(SpaceId),
    /// Both sides of a direct-message channel, by canonical channel id
    Direct(String),
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupKey::Space(id) => write!(f, "space:{id}"),
            GroupKey::Direct(id) => write!(f, "direct:{id}"),
        }
    }
}

/// Fan-out capability the router and chat relay depend on.
///
/// Membership changes are local and synchronous; only delivery may cross the
/// process boundary.
#[async_trait]
pub trait GroupBroadcaster: Send + Sync {
    fn join(&self, group: &GroupKey, connection_id: ConnectionId);

    fn leave(&self, group: &GroupKey, connection_id: ConnectionId);

    /// Delivers to a single connection on this node.
    fn send_to(&self, connection_id: ConnectionId, event: &ServerEvent) -> bool;

    /// Delivers to every member of `group` except `exclude`.
    ///
    /// # Returns
    ///
    /// The number of local connections the event was queued for.
    async fn broadcast(&self, group: &GroupKey, event: &ServerEvent, exclude: Option<ConnectionId>) -> usize;
}

/// Process-local groups.
pub struct LocalBroadcaster {
    connections: Arc<ConnectionManager>,
    groups: DashMap<GroupKey, HashSet<ConnectionId>>,
}

impl LocalBroadcaster {
    pub fn new(connections: Arc<ConnectionManager>) -> Self {
        Self {
            connections,
            groups: DashMap::new(),
        }
    }

    #[cfg(test)]
    pub(crate) fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// Queues an already serialized frame for the local members of `group`.
    pub fn deliver_frame(&self, group: &GroupKey, frame: &Frame, exclude: Option<ConnectionId>) -> usize {
        // Snapshot first so no shard lock is held while touching mailboxes.
        let recipients: Vec<ConnectionId> = match self.groups.get(group) {
            Some(members) => members
                .iter()
                .copied()
                .filter(|id| Some(*id) != exclude)
                .collect(),
            None => return 0,
        };
        let delivered = recipients
            .into_iter()
            .filter(|id| self.connections.deliver(*id, frame.clone()))
            .count();
        trace!("📤 {} -> {} recipients", group, delivered);
        delivered
    }
}

#[async_trait]
impl GroupBroadcaster for LocalBroadcaster {
    fn join(&self, group: &GroupKey, connection_id: ConnectionId) {
        self.groups.entry(group.clone()).or_default().insert(connection_id);
    }

    fn leave(&self, group: &GroupKey, connection_id: ConnectionId) {
        if let Some(mut members) = self.groups.get_mut(group) {
            members.remove(&connection_id);
        }
        self.groups.remove_if(group, |_, members| members.is_empty());
    }

    fn send_to(&self, connection_id: ConnectionId, event: &ServerEvent) -> bool {
        match event.to_frame() {
            Ok(frame) => self.connections.deliver(connection_id, frame),
            Err(e) => {
                error!("Failed to serialize event for {}: {}", connection_id, e);
                false
            }
        }
    }

    async fn broadcast(&self, group: &GroupKey, event: &ServerEvent, exclude: Option<ConnectionId>) -> usize {
        match event.to_frame() {
            Ok(frame) => self.deliver_frame(group, &frame, exclude),
            Err(e) => {
                error!("Failed to serialize event for {}: {}", group, e);
                0
            }
        }
    }
}
