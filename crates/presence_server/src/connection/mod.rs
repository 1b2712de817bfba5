//! Connection management for client connections.
//!
//! This module handles the lifecycle bookkeeping of live WebSocket
//! connections: the registry of outbound mailboxes every broadcast is
//! delivered through, and the per-connection session state.

pub mod client;
pub mod manager;
pub mod session;

pub use client::{ClientConnection, Frame};
pub use manager::ConnectionManager;
pub use session::{ConnectionSession, SessionState};
