//! Connection manager for tracking client connections on this node.
//!
//! This module provides the registry of every live connection and the only
//! path by which frames reach a socket: callers address a connection id and
//! the manager pushes into that connection's mailbox.

use super::client::{ClientConnection, Frame};
use crate::types::{ConnectionId, UserId};
use dashmap::DashMap;
use std::net::SocketAddr;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Central registry for all client connections on this node.
///
/// # Architecture
///
/// * Uses `DashMap` so every connection task can register, deliver and
///   deregister without a global lock
/// * Each connection owns an unbounded mailbox drained by its writer task,
///   so delivery never awaits a slow socket
#[derive(Debug, Default)]
pub struct ConnectionManager {
    /// Map of connection ID to client connection information
    connections: DashMap<ConnectionId, ClientConnection>,
}

impl ConnectionManager {
    /// Creates an empty connection manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an authenticated connection.
    ///
    /// # Arguments
    ///
    /// * `connection_id` - Identity assigned at the session gate
    /// * `user_id` - Authenticated user owning the connection
    /// * `remote_addr` - The network address of the connecting client
    /// * `mailbox` - Sending half of the connection's outbound queue
    pub fn add_connection(
        &self,
        connection_id: ConnectionId,
        user_id: UserId,
        remote_addr: SocketAddr,
        mailbox: mpsc::UnboundedSender<Frame>,
    ) {
        let connection = ClientConnection::new(connection_id, user_id.clone(), remote_addr, mailbox);
        self.connections.insert(connection_id, connection);
        info!("🔗 Connection {} from {} as user {}", connection_id, remote_addr, user_id);
    }

    /// Removes a connection from the manager.
    ///
    /// Dropping the entry drops the mailbox sender, which ends the
    /// connection's writer once its queue drains.
    ///
    /// # Returns
    ///
    /// The removed connection, or `None` if it was already gone.
    pub fn remove_connection(&self, connection_id: ConnectionId) -> Option<ClientConnection> {
        let removed = self.connections.remove(&connection_id).map(|(_, c)| c);
        if let Some(connection) = &removed {
            info!(
                "❌ Connection {} from {} disconnected",
                connection_id, connection.remote_addr
            );
        }
        removed
    }

    /// Queues a frame for a specific connection.
    ///
    /// # Returns
    ///
    /// `true` if the frame was queued, `false` if the connection is unknown
    /// or its writer has already stopped.
    pub fn deliver(&self, connection_id: ConnectionId, frame: Frame) -> bool {
        match self.connections.get(&connection_id) {
            Some(connection) => connection.send(frame),
            None => {
                debug!("Dropping frame for unknown connection {}", connection_id);
                false
            }
        }
    }

    pub fn contains(&self, connection_id: ConnectionId) -> bool {
        self.connections.contains_key(&connection_id)
    }

    /// Returns the number of currently active connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// All connections belonging to `user_id` on this node.
    pub fn connections_for_user(&self, user_id: &UserId) -> Vec<ConnectionId> {
        self.connections
            .iter()
            .filter(|entry| &entry.user_id == user_id)
            .map(|entry| *entry.key())
            .collect()
    }
}
