//! Client connection representation.

use crate::types::{ConnectionId, UserId};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::mpsc;

/// One serialized outbound text frame.
///
/// Broadcasts serialize once and share the same buffer across every
/// recipient mailbox.
pub type Frame = Arc<str>;

/// Represents an individual client connection to the server.
///
/// # Fields
///
/// * `connection_id` - Identity of this socket, unique across nodes
/// * `user_id` - The authenticated user; a user may hold several connections
/// * `remote_addr` - The network address of the connected client
/// * `connected_at` - Timestamp when the connection was established
/// * `mailbox` - Outbound queue drained by the connection's writer task
#[derive(Debug, Clone)]
pub struct ClientConnection {
    pub connection_id: ConnectionId,
    pub user_id: UserId,
    pub remote_addr: SocketAddr,
    pub connected_at: SystemTime,
    mailbox: mpsc::UnboundedSender<Frame>,
}

impl ClientConnection {
    /// Creates a connection record around the sending half of its mailbox.
    pub fn new(
        connection_id: ConnectionId,
        user_id: UserId,
        remote_addr: SocketAddr,
        mailbox: mpsc::UnboundedSender<Frame>,
    ) -> Self {
        Self {
            connection_id,
            user_id,
            remote_addr,
            connected_at: SystemTime::now(),
            mailbox,
        }
    }

    /// Queues a frame for delivery. Returns false when the writer has gone.
    pub fn send(&self, frame: Frame) -> bool {
        self.mailbox.send(frame).is_ok()
    }
}
