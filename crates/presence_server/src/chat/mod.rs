//! Chat over space-wide and direct-message channels.

pub mod relay;
pub mod store;

pub use relay::{ChatError, ChatRelay, ChatSender, DEFAULT_MAX_CONTENT_CHARS};
pub use store::{ChatDraft, ChatStore, InMemoryChatStore};
