//! # Chat Relay
//!
//! Validates a chat message, persists it, then fans the persisted message out
//! to the channel's current members. Nothing is broadcast unless it was
//! persisted first, and the sender receives its own message back as the
//! acknowledgement carrying the server-assigned id.

use super::store::{ChatDraft, ChatStore};
use crate::auth::MembershipAuthorizer;
use crate::error::PresenceError;
use crate::messaging::ServerEvent;
use crate::routing::{GroupBroadcaster, GroupKey};
use crate::types::{dm_channel_id, dm_counterpart, ChannelType, ChatMessage, SpaceId, UserId};
use std::sync::Arc;
use tracing::debug;

/// Longest message body kept, in Unicode scalar values.
pub const DEFAULT_MAX_CONTENT_CHARS: usize = 2000;

/// Why a chat message was dropped.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ChatError {
    #[error("message content is empty")]
    EmptyContent,

    #[error("user {user_id} is not a member of space {space_id}")]
    NotAMember { user_id: UserId, space_id: SpaceId },

    #[error("invalid direct-message channel '{0}'")]
    InvalidDmChannel(String),

    #[error("membership check failed: {0}")]
    Authorizer(PresenceError),

    #[error("failed to persist message: {0}")]
    Persistence(PresenceError),
}

impl ChatError {
    /// Drops caused by the sender not being allowed to post.
    pub fn is_authorization(&self) -> bool {
        matches!(self, ChatError::NotAMember { .. } | ChatError::InvalidDmChannel(_))
    }
}

impl From<ChatError> for PresenceError {
    fn from(err: ChatError) -> Self {
        match err {
            ChatError::EmptyContent => PresenceError::Validation(err.to_string()),
            ChatError::NotAMember { .. } | ChatError::InvalidDmChannel(_) => {
                PresenceError::Authorization(err.to_string())
            }
            ChatError::Authorizer(inner) | ChatError::Persistence(inner) => inner,
        }
    }
}

/// Who is sending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatSender {
    pub user_id: UserId,
    pub display_name: String,
}

pub struct ChatRelay {
    authorizer: Arc<dyn MembershipAuthorizer>,
    store: Arc<dyn ChatStore>,
    broadcaster: Arc<dyn GroupBroadcaster>,
    max_content_chars: usize,
}

impl ChatRelay {
    pub fn new(
        authorizer: Arc<dyn MembershipAuthorizer>,
        store: Arc<dyn ChatStore>,
        broadcaster: Arc<dyn GroupBroadcaster>,
        max_content_chars: usize,
    ) -> Self {
        Self {
            authorizer,
            store,
            broadcaster,
            max_content_chars: max_content_chars.max(1),
        }
    }

    /// Trims and truncates message content; `None` when nothing is left.
    pub fn normalize_content(&self, content: &str) -> Option<String> {
        let trimmed = content.trim();
        if trimmed.is_empty() {
            return None;
        }
        Some(trimmed.chars().take(self.max_content_chars).collect())
    }

    /// Resolves the canonical channel id the message will be stored under.
    async fn resolve_channel(
        &self,
        sender: &ChatSender,
        channel_type: ChannelType,
        channel_id: &str,
    ) -> Result<String, ChatError> {
        match channel_type {
            ChannelType::Space => {
                let space_id = SpaceId::from(channel_id);
                let allowed = self
                    .authorizer
                    .is_member(&sender.user_id, &space_id)
                    .await
                    .map_err(ChatError::Authorizer)?;
                if !allowed {
                    return Err(ChatError::NotAMember {
                        user_id: sender.user_id.clone(),
                        space_id,
                    });
                }
                Ok(space_id.0)
            }
            ChannelType::Dm => {
                let other = dm_counterpart(&sender.user_id, channel_id)
                    .ok_or_else(|| ChatError::InvalidDmChannel(channel_id.to_string()))?;
                Ok(dm_channel_id(&sender.user_id, &other))
            }
        }
    }

    /// Validates, persists and fans out one message.
    ///
    /// # Returns
    ///
    /// The persisted message as it was broadcast.
    pub async fn send(
        &self,
        sender: &ChatSender,
        channel_type: ChannelType,
        channel_id: &str,
        content: &str,
    ) -> Result<ChatMessage, ChatError> {
        let content = self.normalize_content(content).ok_or(ChatError::EmptyContent)?;
        let channel_id = self.resolve_channel(sender, channel_type, channel_id).await?;

        let message = self
            .store
            .persist(ChatDraft {
                channel_type,
                channel_id: channel_id.clone(),
                sender_user_id: sender.user_id.clone(),
                sender_display_name: sender.display_name.clone(),
                content,
            })
            .await
            .map_err(ChatError::Persistence)?;

        let group = match channel_type {
            ChannelType::Space => GroupKey::Space(SpaceId::from(channel_id)),
            ChannelType::Dm => GroupKey::Direct(channel_id),
        };
        let delivered = self
            .broadcaster
            .broadcast(&group, &ServerEvent::ChatMessage(message.clone()), None)
            .await;
        debug!("💬 Message {} on {} delivered to {}", message.id, group, delivered);
        Ok(message)
    }
}
