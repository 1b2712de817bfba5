//! Degrading wrapper around a shared presence backend.

use super::{MemoryPresenceStore, PresenceStore};
use crate::error::PresenceError;
use crate::health::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError};
use crate::types::{ConnectionId, PositionUpdate, PresenceRecord, SpaceId};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Routes every call to `primary` while it is healthy and mirrors every
/// write of this node into process memory.
///
/// The mirror holds the records of this node's own connections. While the
/// primary is unreachable, reads and moves are answered from it, so local
/// users keep moving and stay in the roster of local joiners. Users of other
/// nodes drop out of view until the primary recovers.
pub struct FallbackPresenceStore {
    primary: Arc<dyn PresenceStore>,
    local: MemoryPresenceStore,
    breaker: CircuitBreaker,
}

impl FallbackPresenceStore {
    pub fn new(primary: Arc<dyn PresenceStore>, breaker_config: CircuitBreakerConfig) -> Self {
        let breaker = CircuitBreaker::new(format!("presence-{}", primary.backend_name()), breaker_config);
        Self {
            primary,
            local: MemoryPresenceStore::new(),
            breaker,
        }
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    fn degraded(&self, operation: &str, error: CircuitBreakerError<PresenceError>) {
        match error {
            CircuitBreakerError::Open(name) => {
                debug!("⚡ {} skipped, circuit '{}' open", operation, name)
            }
            CircuitBreakerError::Inner(err) => {
                warn!("⚠️ Presence backend {} failed, using local state: {}", operation, err)
            }
        }
    }
}

#[async_trait]
impl PresenceStore for FallbackPresenceStore {
    fn backend_name(&self) -> &'static str {
        self.primary.backend_name()
    }

    async fn upsert(
        &self,
        space_id: &SpaceId,
        connection_id: ConnectionId,
        record: PresenceRecord,
    ) -> Result<(), PresenceError> {
        self.local.upsert_sync(space_id, connection_id, record.clone());
        if let Err(error) = self
            .breaker
            .call(self.primary.upsert(space_id, connection_id, record))
            .await
        {
            self.degraded("upsert", error);
        }
        Ok(())
    }

    async fn remove(
        &self,
        space_id: &SpaceId,
        connection_id: ConnectionId,
    ) -> Result<Option<PresenceRecord>, PresenceError> {
        let local = self.local.remove_sync(space_id, connection_id);
        let shared = match self.breaker.call(self.primary.remove(space_id, connection_id)).await {
            Ok(record) => record,
            Err(error) => {
                self.degraded("remove", error);
                None
            }
        };
        Ok(shared.or(local))
    }

    async fn list_by_space(&self, space_id: &SpaceId) -> Result<Vec<PresenceRecord>, PresenceError> {
        let mut merged: HashMap<ConnectionId, PresenceRecord> = self
            .local
            .list_sync(space_id)
            .into_iter()
            .map(|r| (r.connection_id, r))
            .collect();
        match self.breaker.call(self.primary.list_by_space(space_id)).await {
            Ok(records) => {
                for record in records {
                    merged.insert(record.connection_id, record);
                }
            }
            Err(error) => self.degraded("list", error),
        }
        Ok(merged.into_values().collect())
    }

    async fn update_position(
        &self,
        space_id: &SpaceId,
        connection_id: ConnectionId,
        update: PositionUpdate,
    ) -> Result<Option<PresenceRecord>, PresenceError> {
        let mirrored = self.local.update_sync(space_id, connection_id, update);
        match self
            .breaker
            .call(self.primary.update_position(space_id, connection_id, update))
            .await
        {
            Ok(Some(record)) => Ok(Some(record)),
            Ok(None) => Ok(mirrored),
            Err(error) => {
                self.degraded("update", error);
                Ok(mirrored)
            }
        }
    }
}
