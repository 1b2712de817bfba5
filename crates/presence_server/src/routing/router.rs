//! # Room Router
//!
//! Owns the mapping from connections to the one space each occupies and
//! turns membership intents into presence writes plus fan-out:
//!
//! | Intent | Joiner / mover | Others in the space |
//! |---|---|---|
//! | join | `space_state` roster | `user_joined` |
//! | move | nothing | `user_moved` |
//! | leave | nothing | `user_left` |
//!
//! Every broadcast excludes the connection that caused it.

use super::broadcaster::{GroupBroadcaster, GroupKey};
use crate::error::PresenceError;
use crate::messaging::{PresenceView, ServerEvent};
use crate::presence::PresenceStore;
use crate::spatial::SpaceCatalog;
use crate::types::{ConnectionId, Direction, Position, PositionUpdate, PresenceRecord, SpaceId, UserId};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, trace};

#[derive(Debug, Clone)]
struct Seat {
    space_id: SpaceId,
    user_id: UserId,
}

pub struct RoomRouter {
    presence: Arc<dyn PresenceStore>,
    broadcaster: Arc<dyn GroupBroadcaster>,
    catalog: Arc<SpaceCatalog>,
    seats: DashMap<ConnectionId, Seat>,
}

impl RoomRouter {
    pub fn new(
        presence: Arc<dyn PresenceStore>,
        broadcaster: Arc<dyn GroupBroadcaster>,
        catalog: Arc<SpaceCatalog>,
    ) -> Self {
        Self {
            presence,
            broadcaster,
            catalog,
            seats: DashMap::new(),
        }
    }

    pub fn catalog(&self) -> &SpaceCatalog {
        &self.catalog
    }

    pub fn broadcaster(&self) -> &Arc<dyn GroupBroadcaster> {
        &self.broadcaster
    }

    /// Space the connection currently occupies.
    pub fn space_of(&self, connection_id: ConnectionId) -> Option<SpaceId> {
        self.seats.get(&connection_id).map(|seat| seat.space_id.clone())
    }

    /// Places a connection into `space_id`, leaving any other space first.
    ///
    /// The record's position is clamped to the space's floor bounds before
    /// it is stored. Joining the space the connection is already in replaces
    /// its record and resends the roster without a `user_left`.
    ///
    /// # Returns
    ///
    /// The record as stored.
    pub async fn join_space(
        &self,
        connection_id: ConnectionId,
        space_id: &SpaceId,
        mut record: PresenceRecord,
    ) -> Result<PresenceRecord, PresenceError> {
        record.position = self.catalog.bounds_for(space_id).sanitize(record.position)?;
        record.connection_id = connection_id;
        record.space_id = space_id.clone();

        let rejoin = match self.space_of(connection_id) {
            Some(previous) if &previous == space_id => true,
            Some(previous) => {
                self.leave_space(connection_id, &previous).await?;
                false
            }
            None => false,
        };

        // Seat first: a disconnect landing mid-join must still find it
        self.seats.insert(
            connection_id,
            Seat {
                space_id: space_id.clone(),
                user_id: record.user_id.clone(),
            },
        );
        if let Err(e) = self
            .presence
            .upsert(space_id, connection_id, record.clone())
            .await
        {
            if !rejoin {
                self.seats
                    .remove_if(&connection_id, |_, seat| &seat.space_id == space_id);
            }
            return Err(e);
        }
        let group = GroupKey::Space(space_id.clone());
        self.broadcaster.join(&group, connection_id);

        let users: Vec<PresenceView> = self
            .presence
            .list_by_space(space_id)
            .await?
            .iter()
            .filter(|other| other.connection_id != connection_id)
            .map(PresenceView::from)
            .collect();
        debug!(
            "🚪 {} joined space {} with {} others present",
            connection_id,
            space_id,
            users.len()
        );
        self.broadcaster.send_to(
            connection_id,
            &ServerEvent::SpaceState {
                space_id: space_id.clone(),
                users,
            },
        );
        self.broadcaster
            .broadcast(&group, &ServerEvent::UserJoined(PresenceView::from(&record)), Some(connection_id))
            .await;
        Ok(record)
    }

    /// Removes a connection from `space_id`.
    ///
    /// A no-op when the connection is not in that space. Concurrent calls for
    /// the same connection announce `user_left` exactly once, and the removal
    /// finishes even if the caller is dropped after claiming the seat.
    ///
    /// # Returns
    ///
    /// The presence record that was removed, if the store still held one.
    pub async fn leave_space(
        &self,
        connection_id: ConnectionId,
        space_id: &SpaceId,
    ) -> Result<Option<PresenceRecord>, PresenceError> {
        let Some((_, seat)) = self
            .seats
            .remove_if(&connection_id, |_, seat| &seat.space_id == space_id)
        else {
            trace!("{} is not in space {}, nothing to leave", connection_id, space_id);
            return Ok(None);
        };

        let group = GroupKey::Space(seat.space_id.clone());
        self.broadcaster.leave(&group, connection_id);

        // Runs detached once the seat is claimed
        let presence = self.presence.clone();
        let broadcaster = self.broadcaster.clone();
        let space = space_id.clone();
        let farewell = tokio::spawn(async move {
            let removed = presence.remove(&space, connection_id).await;
            broadcaster
                .broadcast(
                    &group,
                    &ServerEvent::user_left(&seat.user_id, connection_id),
                    Some(connection_id),
                )
                .await;
            debug!("🚶 {} left space {}", connection_id, space);
            removed
        });
        farewell
            .await
            .map_err(|e| PresenceError::Dependency(format!("leave task failed: {e}")))?
    }

    /// Applies a move from a member of `space_id`.
    ///
    /// Moves for a space the connection is not in, and moves whose record has
    /// vanished from the store, are dropped and return `None`.
    pub async fn move_to(
        &self,
        connection_id: ConnectionId,
        space_id: &SpaceId,
        position: Position,
        direction: Direction,
    ) -> Result<Option<PresenceRecord>, PresenceError> {
        if self.space_of(connection_id).as_ref() != Some(space_id) {
            trace!("Dropping move from {} for foreign space {}", connection_id, space_id);
            return Ok(None);
        }
        let position = self.catalog.bounds_for(space_id).sanitize(position)?;

        let Some(record) = self
            .presence
            .update_position(space_id, connection_id, PositionUpdate { position, direction })
            .await?
        else {
            return Ok(None);
        };

        self.broadcaster
            .broadcast(
                &GroupKey::Space(space_id.clone()),
                &ServerEvent::user_moved(&record),
                Some(connection_id),
            )
            .await;
        Ok(Some(record))
    }

    pub fn join_direct(&self, connection_id: ConnectionId, channel_id: &str) {
        self.broadcaster
            .join(&GroupKey::Direct(channel_id.to_string()), connection_id);
    }

    pub fn leave_direct(&self, connection_id: ConnectionId, channel_id: &str) {
        self.broadcaster
            .leave(&GroupKey::Direct(channel_id.to_string()), connection_id);
    }
}
