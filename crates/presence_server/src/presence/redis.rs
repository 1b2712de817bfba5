//! Presence shared across nodes through Redis.
//!
//! Each space is one hash at `{prefix}:space:{space_id}`. A connection owns
//! two fields: `{connection_id}` holds the JSON record written at join, and
//! `{connection_id}:pos` holds the latest position and direction once the
//! connection has moved. Moves only ever replace the second field, so the
//! record is never decoded or re-encoded server side. Every write refreshes
//! the key TTL so records orphaned by a crashed node age out.

use super::PresenceStore;
use crate::error::PresenceError;
use crate::types::{ConnectionId, Direction, Position, PositionUpdate, PresenceRecord, SpaceId};
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{Client, Script};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{info, warn};

const POSITION_SUFFIX: &str = ":pos";

/// Stores the position field only while the record field exists.
const UPDATE_POSITION_SCRIPT: &str = r#"
local raw = redis.call('HGET', KEYS[1], ARGV[1])
if not raw then
  return false
end
redis.call('HSET', KEYS[1], ARGV[1] .. ARGV[2], ARGV[3])
redis.call('EXPIRE', KEYS[1], ARGV[4])
return raw
"#;

#[derive(Debug, Serialize, Deserialize)]
struct StoredPosition {
    position: Position,
    direction: Direction,
}

pub struct RedisPresenceStore {
    connection: MultiplexedConnection,
    key_prefix: String,
    key_ttl: Duration,
    update_script: Script,
}

impl RedisPresenceStore {
    /// Opens a multiplexed connection to `url`.
    pub async fn connect(url: &str, key_prefix: &str, key_ttl: Duration) -> Result<Self, PresenceError> {
        let client = Client::open(url).map_err(|e| PresenceError::dependency("redis url", e))?;
        let connection = client
            .get_multiplexed_tokio_connection()
            .await
            .map_err(|e| PresenceError::dependency("redis connect", e))?;
        info!("🔗 Connected presence store to Redis at {}", url);
        Ok(Self {
            connection,
            key_prefix: key_prefix.to_string(),
            key_ttl,
            update_script: Script::new(UPDATE_POSITION_SCRIPT),
        })
    }

    fn space_key(&self, space_id: &SpaceId) -> String {
        format!("{}:space:{}", self.key_prefix, space_id)
    }

    fn ttl_secs(&self) -> u64 {
        self.key_ttl.as_secs().max(1)
    }
}

fn position_field(record_field: &str) -> String {
    format!("{record_field}{POSITION_SUFFIX}")
}

fn decode(raw: &str) -> Result<PresenceRecord, PresenceError> {
    serde_json::from_str(raw).map_err(|e| PresenceError::dependency("corrupt presence record", e))
}

/// Rebuilds a record from its two fields.
fn restore(raw: &str, position: Option<&str>) -> Result<PresenceRecord, PresenceError> {
    let mut record = decode(raw)?;
    if let Some(position) = position {
        let stored: StoredPosition = serde_json::from_str(position)
            .map_err(|e| PresenceError::dependency("corrupt presence position", e))?;
        record.apply(PositionUpdate {
            position: stored.position,
            direction: stored.direction,
        });
    }
    Ok(record)
}

/// Turns the raw fields of one space hash into records.
///
/// A position field without its record is a leftover of a racing removal
/// and is skipped.
fn assemble(fields: &HashMap<String, String>) -> Result<Vec<PresenceRecord>, PresenceError> {
    let mut records = Vec::with_capacity(fields.len());
    for (field, raw) in fields {
        if field.ends_with(POSITION_SUFFIX) {
            let owner = &field[..field.len() - POSITION_SUFFIX.len()];
            if !fields.contains_key(owner) {
                warn!("⚠️ Skipping orphaned position field {}", field);
            }
            continue;
        }
        let position = fields.get(&position_field(field)).map(String::as_str);
        records.push(restore(raw, position)?);
    }
    Ok(records)
}

#[async_trait]
impl PresenceStore for RedisPresenceStore {
    fn backend_name(&self) -> &'static str {
        "redis"
    }

    async fn upsert(
        &self,
        space_id: &SpaceId,
        connection_id: ConnectionId,
        record: PresenceRecord,
    ) -> Result<(), PresenceError> {
        let key = self.space_key(space_id);
        let field = connection_id.to_string();
        let value = serde_json::to_string(&record)
            .map_err(|e| PresenceError::dependency("encode presence record", e))?;
        let mut conn = self.connection.clone();
        let _: () = redis::pipe()
            .atomic()
            .cmd("HSET")
            .arg(&key)
            .arg(&field)
            .arg(value)
            .ignore()
            .cmd("HDEL")
            .arg(&key)
            .arg(position_field(&field))
            .ignore()
            .cmd("EXPIRE")
            .arg(&key)
            .arg(self.ttl_secs())
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(|e| PresenceError::dependency("redis upsert", e))?;
        Ok(())
    }

    async fn remove(
        &self,
        space_id: &SpaceId,
        connection_id: ConnectionId,
    ) -> Result<Option<PresenceRecord>, PresenceError> {
        let key = self.space_key(space_id);
        let field = connection_id.to_string();
        let pos_field = position_field(&field);
        let mut conn = self.connection.clone();
        let (raw, position, _removed): (Option<String>, Option<String>, i64) = redis::pipe()
            .atomic()
            .cmd("HGET")
            .arg(&key)
            .arg(&field)
            .cmd("HGET")
            .arg(&key)
            .arg(&pos_field)
            .cmd("HDEL")
            .arg(&key)
            .arg(&field)
            .arg(&pos_field)
            .query_async(&mut conn)
            .await
            .map_err(|e| PresenceError::dependency("redis remove", e))?;
        raw.as_deref()
            .map(|raw| restore(raw, position.as_deref()))
            .transpose()
    }

    async fn list_by_space(&self, space_id: &SpaceId) -> Result<Vec<PresenceRecord>, PresenceError> {
        let mut conn = self.connection.clone();
        let fields: HashMap<String, String> = redis::cmd("HGETALL")
            .arg(self.space_key(space_id))
            .query_async(&mut conn)
            .await
            .map_err(|e| PresenceError::dependency("redis list", e))?;
        assemble(&fields)
    }

    async fn update_position(
        &self,
        space_id: &SpaceId,
        connection_id: ConnectionId,
        update: PositionUpdate,
    ) -> Result<Option<PresenceRecord>, PresenceError> {
        let stored = serde_json::to_string(&StoredPosition {
            position: update.position,
            direction: update.direction,
        })
        .map_err(|e| PresenceError::dependency("encode position", e))?;
        let mut conn = self.connection.clone();
        let raw: Option<String> = self
            .update_script
            .key(self.space_key(space_id))
            .arg(connection_id.to_string())
            .arg(POSITION_SUFFIX)
            .arg(stored)
            .arg(self.ttl_secs())
            .invoke_async(&mut conn)
            .await
            .map_err(|e| PresenceError::dependency("redis update", e))?;
        let Some(raw) = raw else {
            return Ok(None);
        };
        let mut record = decode(&raw)?;
        record.apply(update);
        Ok(Some(record))
    }
}
