//! Conversations: ordered, append-only message logs with a fixed owner.
//!
//! - `log` -- `ConversationLog` with atomic appends and restartable cursors
//! - `store` -- `ConversationStore` managing lifecycle and channel-key lookup

pub mod log;
pub mod store;

pub use log::{ConversationCursor, ConversationLog};
pub use store::{Conversation, ConversationStore};
