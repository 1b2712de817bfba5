//! # Presence Store
//!
//! Shared, space-scoped state of who is where. One record exists per
//! connection inside a space; writes for a connection come only from that
//! connection's own session, so concurrent writers never contend on a record.
//!
//! Backends:
//! - [`MemoryPresenceStore`] for single-process deployments and tests
//! - `RedisPresenceStore` (feature `redis-backend`) shared across nodes
//! - [`FallbackPresenceStore`] wrapping a shared backend with a circuit
//!   breaker and a local mirror so a backend outage degrades to
//!   process-local presence instead of failing joins and moves

pub mod fallback;
pub mod memory;
#[cfg(feature = "redis-backend")]
pub mod redis;

pub use fallback::FallbackPresenceStore;
pub use memory::MemoryPresenceStore;
#[cfg(feature = "redis-backend")]
pub use self::redis::RedisPresenceStore;

use crate::error::PresenceError;
use crate::types::{ConnectionId, PositionUpdate, PresenceRecord, SpaceId};
use async_trait::async_trait;

/// Storage contract for presence records.
///
/// Implementations never hold a lock across an await point visible to
/// callers and tolerate concurrent calls from every connection task.
#[async_trait]
pub trait PresenceStore: Send + Sync {
    /// Short name used in logs.
    fn backend_name(&self) -> &'static str;

    /// Inserts or replaces the record for `connection_id` in `space_id`.
    async fn upsert(
        &self,
        space_id: &SpaceId,
        connection_id: ConnectionId,
        record: PresenceRecord,
    ) -> Result<(), PresenceError>;

    /// Deletes the record, returning it if it existed. Removing an absent
    /// record is a no-op returning `None`.
    async fn remove(
        &self,
        space_id: &SpaceId,
        connection_id: ConnectionId,
    ) -> Result<Option<PresenceRecord>, PresenceError>;

    /// Every record currently in the space. Order is unspecified.
    async fn list_by_space(&self, space_id: &SpaceId) -> Result<Vec<PresenceRecord>, PresenceError>;

    /// Applies a position update to an existing record and returns the new
    /// record, or `None` when the record does not exist.
    async fn update_position(
        &self,
        space_id: &SpaceId,
        connection_id: ConnectionId,
        update: PositionUpdate,
    ) -> Result<Option<PresenceRecord>, PresenceError>;
}
