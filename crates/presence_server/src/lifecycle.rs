//! # Connection Lifecycle
//!
//! Wires one authenticated connection to the router and chat relay.
//!
//! ```text
//! Connecting --gate--> Authenticated <--leave-- InSpace
//!                           |  \--join-->---------^  |
//!                           v                        v
//!                      Disconnected <----------------/
//! ```
//!
//! Events of one connection are handled strictly in arrival order by that
//! connection's task. A bad event is dropped on its own; only the gate can
//! end a connection. Disconnect from any state runs cleanup exactly once.

use crate::auth::VerifiedIdentity;
use crate::chat::{ChatRelay, ChatSender};
use crate::connection::{ConnectionManager, ConnectionSession, Frame, SessionState};
use crate::error::PresenceError;
use crate::health::ServerStats;
use crate::messaging::{decode_client_event, ClientEvent, ServerEvent};
use crate::routing::RoomRouter;
use crate::spatial::{zone_transitions, ZoneTransition};
use crate::types::{dm_channel_id, Direction, Position, PresenceRecord, SpaceId, UserId};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, trace, warn};

/// Longest display name kept, in Unicode scalar values.
pub const MAX_DISPLAY_NAME_CHARS: usize = 64;

pub struct LifecycleManager {
    connections: Arc<ConnectionManager>,
    router: Arc<RoomRouter>,
    chat: Arc<ChatRelay>,
    stats: Arc<ServerStats>,
}

impl LifecycleManager {
    pub fn new(
        connections: Arc<ConnectionManager>,
        router: Arc<RoomRouter>,
        chat: Arc<ChatRelay>,
        stats: Arc<ServerStats>,
    ) -> Self {
        Self {
            connections,
            router,
            chat,
            stats,
        }
    }

    pub fn connections(&self) -> &Arc<ConnectionManager> {
        &self.connections
    }

    pub fn router(&self) -> &Arc<RoomRouter> {
        &self.router
    }

    pub fn stats(&self) -> &Arc<ServerStats> {
        &self.stats
    }

    /// Registers an authenticated connection and returns its session.
    pub fn open_session(
        &self,
        identity: VerifiedIdentity,
        remote_addr: SocketAddr,
        mailbox: mpsc::UnboundedSender<Frame>,
    ) -> ConnectionSession {
        let session = ConnectionSession::new(crate::types::ConnectionId::new(), identity);
        self.connections.add_connection(
            session.connection_id,
            session.user_id().clone(),
            remote_addr,
            mailbox,
        );
        self.stats.connection_opened();
        session
    }

    /// Decodes and handles one inbound text frame.
    pub async fn handle_frame(&self, session: &mut ConnectionSession, text: &str) {
        match decode_client_event(text) {
            Ok(event) => self.dispatch(session, event).await,
            Err(e) => {
                self.stats.event_dropped();
                debug!("🗑️ Dropping frame from {}: {}", session.connection_id, e);
            }
        }
    }

    /// Handles one decoded event, logging a drop by its failure class.
    pub async fn dispatch(&self, session: &mut ConnectionSession, event: ClientEvent) {
        let name = event.name();
        match self.handle_event(session, event).await {
            Ok(()) => self.stats.event_handled(),
            Err(err) => {
                self.stats.event_dropped();
                match &err {
                    PresenceError::Authorization(_) => {
                        warn!("🚫 {} from {} refused: {}", name, session.connection_id, err)
                    }
                    PresenceError::Dependency(_) => {
                        error!("❌ {} from {} failed: {}", name, session.connection_id, err)
                    }
                    _ if err.is_expected() => {
                        debug!("{} from {} dropped: {}", name, session.connection_id, err)
                    }
                    _ => warn!("{} from {} dropped: {}", name, session.connection_id, err),
                }
            }
        }
    }

    /// Applies one client event to the session.
    pub async fn handle_event(
        &self,
        session: &mut ConnectionSession,
        event: ClientEvent,
    ) -> Result<(), PresenceError> {
        if session.is_disconnected() {
            return Err(PresenceError::NotFound(format!(
                "connection {} already closed",
                session.connection_id
            )));
        }
        trace!("📨 {} from {}", event.name(), session.connection_id);

        match event {
            ClientEvent::JoinSpace {
                space_id,
                display_name,
                x,
                y,
                z,
                direction,
                avatar,
            } => {
                self.join_space(session, space_id, display_name, Position::new(x, y, z), direction, avatar)
                    .await
            }
            ClientEvent::LeaveSpace { space_id } => self.leave_space(session, &space_id).await,
            ClientEvent::Move {
                space_id,
                x,
                y,
                z,
                direction,
            } => self.move_to(session, &space_id, Position::new(x, y, z), direction).await,
            ClientEvent::JoinDm { other_user_id } => self.join_dm(session, &other_user_id),
            ClientEvent::LeaveDm { other_user_id } => {
                let channel_id = dm_channel_id(session.user_id(), &other_user_id);
                if session.direct_channels.remove(&channel_id) {
                    self.router.leave_direct(session.connection_id, &channel_id);
                }
                Ok(())
            }
            ClientEvent::ChatMessage {
                channel_type,
                channel_id,
                content,
            } => {
                let sender = ChatSender {
                    user_id: session.user_id().clone(),
                    display_name: session.display_name.clone(),
                };
                match self.chat.send(&sender, channel_type, &channel_id, &content).await {
                    Ok(_) => {
                        self.stats.chat_delivered();
                        Ok(())
                    }
                    Err(err) => {
                        self.stats.chat_dropped();
                        Err(err.into())
                    }
                }
            }
        }
    }

    async fn join_space(
        &self,
        session: &mut ConnectionSession,
        space_id: SpaceId,
        display_name: Option<String>,
        position: Position,
        direction: Direction,
        avatar: Option<serde_json::Value>,
    ) -> Result<(), PresenceError> {
        // Re-joining the same space keeps the zone baseline; any other join
        // closes out the previous space's zone first.
        let same_space = session.current_space() == Some(&space_id);
        if !same_space {
            self.exit_zone(session);
        }

        let display_name = display_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(|name| name.chars().take(MAX_DISPLAY_NAME_CHARS).collect())
            .unwrap_or_else(|| session.display_name.clone());

        let record = PresenceRecord {
            connection_id: session.connection_id,
            user_id: session.user_id().clone(),
            display_name,
            position,
            direction,
            avatar,
            space_id: space_id.clone(),
        };
        let stored = match self.router.join_space(session.connection_id, &space_id, record).await {
            Ok(stored) => stored,
            Err(err) => {
                if self.router.space_of(session.connection_id).is_none() {
                    session.state = SessionState::Authenticated;
                }
                return Err(err);
            }
        };

        session.display_name = stored.display_name;
        let zone = self
            .router
            .catalog()
            .detect_zone(&space_id, stored.position)
            .map(str::to_string);
        if same_space {
            for transition in zone_transitions(session.zone.as_deref(), zone.as_deref()) {
                self.send_zone_event(session, &space_id, transition);
            }
        }
        session.zone = zone;
        session.state = SessionState::InSpace(space_id);
        Ok(())
    }

    async fn leave_space(&self, session: &mut ConnectionSession, space_id: &SpaceId) -> Result<(), PresenceError> {
        if session.current_space() != Some(space_id) {
            return Err(PresenceError::NotFound(format!(
                "{} is not in space {}",
                session.connection_id, space_id
            )));
        }
        self.exit_zone(session);
        session.state = SessionState::Authenticated;
        self.router.leave_space(session.connection_id, space_id).await?;
        Ok(())
    }

    async fn move_to(
        &self,
        session: &mut ConnectionSession,
        space_id: &SpaceId,
        position: Position,
        direction: Direction,
    ) -> Result<(), PresenceError> {
        let Some(record) = self
            .router
            .move_to(session.connection_id, space_id, position, direction)
            .await?
        else {
            return Err(PresenceError::NotFound(format!(
                "{} has no presence in {}",
                session.connection_id, space_id
            )));
        };

        let current = self
            .router
            .catalog()
            .detect_zone(space_id, record.position)
            .map(str::to_string);
        for transition in zone_transitions(session.zone.as_deref(), current.as_deref()) {
            self.send_zone_event(session, space_id, transition);
        }
        session.zone = current;
        Ok(())
    }

    fn join_dm(&self, session: &mut ConnectionSession, other: &UserId) -> Result<(), PresenceError> {
        if other == session.user_id() {
            return Err(PresenceError::Validation("cannot open a direct channel with oneself".into()));
        }
        let channel_id = dm_channel_id(session.user_id(), other);
        self.router.join_direct(session.connection_id, &channel_id);
        session.direct_channels.insert(channel_id);
        Ok(())
    }

    fn exit_zone(&self, session: &mut ConnectionSession) {
        let (Some(room_id), Some(space_id)) = (session.zone.take(), session.current_space().cloned()) else {
            return;
        };
        self.send_zone_event(session, &space_id, ZoneTransition::Exited(room_id));
    }

    fn send_zone_event(&self, session: &ConnectionSession, space_id: &SpaceId, transition: ZoneTransition) {
        let event = match transition {
            ZoneTransition::Entered(room_id) => ServerEvent::ZoneEntered {
                space_id: space_id.clone(),
                room_id,
            },
            ZoneTransition::Exited(room_id) => ServerEvent::ZoneExited {
                space_id: space_id.clone(),
                room_id,
            },
        };
        debug!("🎥 {} {:?}", session.connection_id, event);
        self.router.broadcaster().send_to(session.connection_id, &event);
    }

    /// Runs disconnect cleanup. Safe to call more than once.
    ///
    /// The router's seat decides which space is left, so a join or leave that
    /// was interrupted mid-flight is still cleaned up.
    pub async fn disconnect(&self, session: &mut ConnectionSession) {
        if session.is_disconnected() {
            return;
        }
        let previous = std::mem::replace(&mut session.state, SessionState::Disconnected);
        session.zone = None;

        let seated = self.router.space_of(session.connection_id).or(match previous {
            SessionState::InSpace(space_id) => Some(space_id),
            _ => None,
        });
        if let Some(space_id) = seated {
            if let Err(e) = self.router.leave_space(session.connection_id, &space_id).await {
                warn!("⚠️ Cleanup of {} in {} incomplete: {}", session.connection_id, space_id, e);
            }
        }
        for channel_id in session.direct_channels.drain() {
            self.router.leave_direct(session.connection_id, &channel_id);
        }
        self.connections.remove_connection(session.connection_id);
    }
}
