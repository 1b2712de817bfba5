//! Process-local presence store.

use super::PresenceStore;
use crate::error::PresenceError;
use crate::types::{ConnectionId, PositionUpdate, PresenceRecord, SpaceId};
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;

/// Presence held in a concurrent map of space to connection records.
///
/// Empty spaces are dropped so the map only grows with occupied spaces.
#[derive(Debug, Default)]
pub struct MemoryPresenceStore {
    spaces: DashMap<SpaceId, HashMap<ConnectionId, PresenceRecord>>,
}

impl MemoryPresenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of spaces with at least one record.
    pub fn occupied_spaces(&self) -> usize {
        self.spaces.len()
    }

    pub(crate) fn upsert_sync(&self, space_id: &SpaceId, connection_id: ConnectionId, record: PresenceRecord) {
        self.spaces
            .entry(space_id.clone())
            .or_default()
            .insert(connection_id, record);
    }

    pub(crate) fn remove_sync(&self, space_id: &SpaceId, connection_id: ConnectionId) -> Option<PresenceRecord> {
        let removed = self
            .spaces
            .get_mut(space_id)
            .and_then(|mut members| members.remove(&connection_id));
        // Re-checked under the shard lock so a concurrent join is never lost.
        self.spaces.remove_if(space_id, |_, members| members.is_empty());
        removed
    }

    pub(crate) fn list_sync(&self, space_id: &SpaceId) -> Vec<PresenceRecord> {
        self.spaces
            .get(space_id)
            .map(|members| members.values().cloned().collect())
            .unwrap_or_default()
    }

    pub(crate) fn update_sync(
        &self,
        space_id: &SpaceId,
        connection_id: ConnectionId,
        update: PositionUpdate,
    ) -> Option<PresenceRecord> {
        let mut members = self.spaces.get_mut(space_id)?;
        let record = members.get_mut(&connection_id)?;
        record.apply(update);
        Some(record.clone())
    }
}

#[async_trait]
impl PresenceStore for MemoryPresenceStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn upsert(
        &self,
        space_id: &SpaceId,
        connection_id: ConnectionId,
        record: PresenceRecord,
    ) -> Result<(), PresenceError> {
        self.upsert_sync(space_id, connection_id, record);
        Ok(())
    }

    async fn remove(
        &self,
        space_id: &SpaceId,
        connection_id: ConnectionId,
    ) -> Result<Option<PresenceRecord>, PresenceError> {
        Ok(self.remove_sync(space_id, connection_id))
    }

    async fn list_by_space(&self, space_id: &SpaceId) -> Result<Vec<PresenceRecord>, PresenceError> {
        Ok(self.list_sync(space_id))
    }

    async fn update_position(
        &self,
        space_id: &SpaceId,
        connection_id: ConnectionId,
        update: PositionUpdate,
    ) -> Result<Option<PresenceRecord>, PresenceError> {
        Ok(self.update_sync(space_id, connection_id, update))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::types::{Direction, Position};

    pub(crate) fn record(space: &str, user: &str) -> PresenceRecord {
        PresenceRecord {
            connection_id: ConnectionId::new(),
            user_id: user.into(),
            display_name: user.to_uppercase(),
            position: Position::default(),
            direction: Direction::Down,
            avatar: None,
            space_id: space.into(),
        }
    }

    #[tokio::test]
    async fn upsert_list_and_remove() {
        let store = MemoryPresenceStore::new();
        let space = SpaceId::from("hq");
        let a = record("hq", "alice");
        let b = record("hq", "bob");
        store.upsert(&space, a.connection_id, a.clone()).await.unwrap();
        store.upsert(&space, b.connection_id, b.clone()).await.unwrap();

        let mut listed = store.list_by_space(&space).await.unwrap();
        listed.sort_by(|l, r| l.user_id.cmp(&r.user_id));
        assert_eq!(listed, vec![a.clone(), b.clone()]);

        assert_eq!(store.remove(&space, a.connection_id).await.unwrap(), Some(a.clone()));
        assert_eq!(store.remove(&space, a.connection_id).await.unwrap(), None);
        assert_eq!(store.list_by_space(&space).await.unwrap(), vec![b]);
    }

    #[tokio::test]
    async fn spaces_are_isolated_and_dropped_when_empty() {
        let store = MemoryPresenceStore::new();
        let a = record("hq", "alice");
        let c = record("annex", "carol");
        store.upsert(&"hq".into(), a.connection_id, a.clone()).await.unwrap();
        store.upsert(&"annex".into(), c.connection_id, c.clone()).await.unwrap();
        assert_eq!(store.occupied_spaces(), 2);
        assert_eq!(store.list_by_space(&"hq".into()).await.unwrap(), vec![a.clone()]);

        store.remove(&"hq".into(), a.connection_id).await.unwrap();
        assert_eq!(store.occupied_spaces(), 1);
        assert!(store.list_by_space(&"hq".into()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn update_position_only_touches_existing_records() {
        let store = MemoryPresenceStore::new();
        let space = SpaceId::from("hq");
        let a = record("hq", "alice");
        let update = PositionUpdate {
            position: Position::new(3.0, 0.0, 4.0),
            direction: Direction::Right,
        };

        assert_eq!(store.update_position(&space, a.connection_id, update).await.unwrap(), None);

        store.upsert(&space, a.connection_id, a.clone()).await.unwrap();
        let updated = store
            .update_position(&space, a.connection_id, update)
            .await
            .unwrap()
            .expect("record exists");
        assert_eq!(updated.position, Position::new(3.0, 0.0, 4.0));
        assert_eq!(updated.direction, Direction::Right);
        assert_eq!(updated.display_name, a.display_name);
    }
}
