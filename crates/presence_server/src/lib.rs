//! # Presence Server - Realtime Presence for Shared Spaces
//!
//! The realtime core of a browser-based virtual office. Users join shared
//! spaces, see each other move, chat space-wide or privately, and get
//! prompted to join a call when they walk into a meeting zone.
//!
//! ## Responsibilities
//!
//! * **Session gate** - authenticates each WebSocket upgrade exactly once
//! * **Presence store** - who is where, per space, in memory or in Redis
//! * **Room router** - one space per connection, fan-out with sender exclusion
//! * **Zone detection** - enter/exit prompts for static meeting zones
//! * **Chat relay** - validated, persisted, then broadcast messages
//! * **Lifecycle** - ordered per-connection handling and exactly-once cleanup
//!
//! Authentication, organization membership and chat persistence are external
//! collaborators behind async traits; see [`Collaborators`].
//!
//! ### Message Flow
//!
//! 1. Client upgrades with a bearer token and is authenticated at the gate
//! 2. Each text frame `{event, data}` is decoded into a [`ClientEvent`] or dropped
//! 3. The lifecycle manager applies it through the router or the chat relay
//! 4. Resulting [`ServerEvent`]s are serialized once and queued on the
//!    mailboxes of every recipient
//!
//! ## Error Handling
//!
//! * [`ServerError`] - startup and transport failures
//! * [`PresenceError`] - per-event failures; an event is dropped, the
//!   connection stays up
//!
//! ## Thread Safety
//!
//! Shared maps are `DashMap`s; no lock is held across an await. Each
//! connection's session state is owned by its own task.

// Re-export core types and functions for easy access
pub use auth::{CredentialVerifier, MembershipAuthorizer, StaticDirectory, VerifiedIdentity};
pub use chat::{ChatStore, InMemoryChatStore};
pub use config::{PresenceBackend, ServerConfig, SpaceConfig};
pub use error::{AuthenticationError, PresenceError, ServerError};
pub use health::StatsSnapshot;
pub use messaging::{ClientEvent, ServerEvent};
pub use server::{Collaborators, PresenceServer};
pub use shutdown::ShutdownState;
pub use types::{dm_channel_id, ChannelType, ChatMessage, ConnectionId, Direction, Position, SpaceId, UserId};
pub use utils::{create_server_with_config, directory_collaborators};

// Public module declarations
pub mod auth;
pub mod chat;
pub mod config;
pub mod connection;
pub mod error;
pub mod health;
pub mod lifecycle;
pub mod messaging;
pub mod presence;
pub mod routing;
pub mod security;
pub mod server;
pub mod shutdown;
pub mod spatial;
pub mod types;
pub mod utils;

#[cfg(test)]
mod tests;
