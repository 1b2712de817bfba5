//! Chat persistence.

use crate::error::PresenceError;
use crate::types::{current_timestamp_millis, ChannelType, ChatMessage, UserId};
use async_trait::async_trait;
use dashmap::DashMap;
use uuid::Uuid;

/// A validated message not yet persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatDraft {
    pub channel_type: ChannelType,
    pub channel_id: String,
    pub sender_user_id: UserId,
    pub sender_display_name: String,
    pub content: String,
}

/// Durable storage for chat messages. The store assigns id and timestamp.
#[async_trait]
pub trait ChatStore: Send + Sync {
    async fn persist(&self, draft: ChatDraft) -> Result<ChatMessage, PresenceError>;
}

/// Keeps the most recent messages of each channel in memory.
#[derive(Debug)]
pub struct InMemoryChatStore {
    channels: DashMap<String, Vec<ChatMessage>>,
    history_limit: usize,
}

impl InMemoryChatStore {
    pub fn new(history_limit: usize) -> Self {
        Self {
            channels: DashMap::new(),
            history_limit: history_limit.max(1),
        }
    }

    /// Messages of `channel_id`, oldest first.
    pub fn history(&self, channel_id: &str) -> Vec<ChatMessage> {
        self.channels
            .get(channel_id)
            .map(|messages| messages.clone())
            .unwrap_or_default()
    }
}

impl Default for InMemoryChatStore {
    fn default() -> Self {
        Self::new(500)
    }
}

#[async_trait]
impl ChatStore for InMemoryChatStore {
    async fn persist(&self, draft: ChatDraft) -> Result<ChatMessage, PresenceError> {
        let message = ChatMessage {
            id: Uuid::new_v4().to_string(),
            channel_type: draft.channel_type,
            channel_id: draft.channel_id,
            sender_user_id: draft.sender_user_id,
            sender_display_name: draft.sender_display_name,
            content: draft.content,
            created_at: current_timestamp_millis(),
        };
        let mut messages = self.channels.entry(message.channel_id.clone()).or_default();
        messages.push(message.clone());
        if messages.len() > self.history_limit {
            let overflow = messages.len() - self.history_limit;
            messages.drain(..overflow);
        }
        Ok(message)
    }
}
