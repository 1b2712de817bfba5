//! Cross-node fan-out over Redis pub/sub.
//!
//! Each node delivers to its own members immediately, then publishes an
//! envelope on `{prefix}:group:{group}`. A pattern subscription on every node
//! picks up envelopes from the other nodes and delivers them to local
//! members. If publishing fails the event still reached this node's members.

use super::broadcaster::{GroupBroadcaster, GroupKey, LocalBroadcaster};
use crate::error::PresenceError;
use crate::messaging::ServerEvent;
use crate::shutdown::ShutdownState;
use crate::types::ConnectionId;
use async_trait::async_trait;
use futures_util::StreamExt;
use redis::aio::MultiplexedConnection;
use redis::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    origin: Uuid,
    group: GroupKey,
    exclude: Option<ConnectionId>,
    frame: String,
}

pub struct RedisBackplane {
    node_id: Uuid,
    local: Arc<LocalBroadcaster>,
    client: Client,
    publisher: MultiplexedConnection,
    channel_prefix: String,
}

impl RedisBackplane {
    /// Connects the publishing side. Call [`RedisBackplane::spawn_subscriber`]
    /// to start receiving from other nodes.
    pub async fn connect(
        url: &str,
        channel_prefix: &str,
        local: Arc<LocalBroadcaster>,
    ) -> Result<Self, PresenceError> {
        let client = Client::open(url).map_err(|e| PresenceError::dependency("redis url", e))?;
        let publisher = client
            .get_multiplexed_tokio_connection()
            .await
            .map_err(|e| PresenceError::dependency("redis connect", e))?;
        Ok(Self {
            node_id: Uuid::new_v4(),
            local,
            client,
            publisher,
            channel_prefix: channel_prefix.to_string(),
        })
    }

    fn channel(&self, group: &GroupKey) -> String {
        format!("{}:group:{}", self.channel_prefix, group)
    }

    /// Runs the pattern subscription until shutdown, reconnecting on failure.
    pub fn spawn_subscriber(&self, shutdown: ShutdownState) -> tokio::task::JoinHandle<()> {
        let client = self.client.clone();
        let local = self.local.clone();
        let node_id = self.node_id;
        let pattern = format!("{}:group:*", self.channel_prefix);

        tokio::spawn(async move {
            info!("📡 Backplane node {} subscribing to {}", node_id, pattern);
            while !shutdown.is_shutdown_initiated() {
                tokio::select! {
                    result = subscribe_loop(&client, &pattern, node_id, &local) => {
                        if let Err(e) = result {
                            warn!("⚠️ Backplane subscription lost: {}", e);
                        }
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                    _ = shutdown.wait_for_shutdown() => break,
                }
            }
            debug!("Backplane subscriber stopped");
        })
    }
}

async fn subscribe_loop(
    client: &Client,
    pattern: &str,
    node_id: Uuid,
    local: &LocalBroadcaster,
) -> Result<(), redis::RedisError> {
    let mut pubsub = client.get_async_pubsub().await?;
    pubsub.psubscribe(pattern).await?;
    let mut messages = pubsub.on_message();
    while let Some(message) = messages.next().await {
        let payload: String = match message.get_payload() {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Unreadable backplane payload: {}", e);
                continue;
            }
        };
        match serde_json::from_str::<Envelope>(&payload) {
            Ok(envelope) if envelope.origin == node_id => {}
            Ok(envelope) => {
                local.deliver_frame(&envelope.group, &envelope.frame.into(), envelope.exclude);
            }
            Err(e) => warn!("Malformed backplane envelope: {}", e),
        }
    }
    Ok(())
}

#[async_trait]
impl GroupBroadcaster for RedisBackplane {
    fn join(&self, group: &GroupKey, connection_id: ConnectionId) {
        self.local.join(group, connection_id);
    }

    fn leave(&self, group: &GroupKey, connection_id: ConnectionId) {
        self.local.leave(group, connection_id);
    }

    fn send_to(&self, connection_id: ConnectionId, event: &ServerEvent) -> bool {
        self.local.send_to(connection_id, event)
    }

    async fn broadcast(&self, group: &GroupKey, event: &ServerEvent, exclude: Option<ConnectionId>) -> usize {
        let frame = match event.to_frame() {
            Ok(frame) => frame,
            Err(e) => {
                error!("Failed to serialize event for {}: {}", group, e);
                return 0;
            }
        };
        let delivered = self.local.deliver_frame(group, &frame, exclude);

        let envelope = Envelope {
            origin: self.node_id,
            group: group.clone(),
            exclude,
            frame: frame.to_string(),
        };
        let payload = match serde_json::to_string(&envelope) {
            Ok(payload) => payload,
            Err(e) => {
                error!("Failed to encode backplane envelope: {}", e);
                return delivered;
            }
        };
        let mut conn = self.publisher.clone();
        let published: Result<i64, _> = redis::cmd("PUBLISH")
            .arg(self.channel(group))
            .arg(payload)
            .query_async(&mut conn)
            .await;
        if let Err(e) = published {
            warn!("⚠️ Backplane publish to {} failed, delivered locally only: {}", group, e);
        }
        delivered
    }
}
