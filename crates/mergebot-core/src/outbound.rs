//! Broadcast feed of user-facing messages.
//!
//! Chat-platform adapters subscribe here to render messages addressed to
//! the human participant, wherever in a bot-to-bot chain they originated.
//! Built on `tokio::sync::broadcast`; publishing with no subscribers is a
//! no-op, and a slow subscriber may observe a `Lagged` error rather than
//! stalling the engine.

use std::sync::Arc;

use mergebot_types::message::Message;
use tokio::sync::broadcast;

/// Multi-consumer feed of outbound user-facing messages.
///
/// Cloning the feed clones the sender, allowing multiple producers and
/// consumers.
pub struct OutboundFeed {
    sender: broadcast::Sender<Arc<Message>>,
}

impl OutboundFeed {
    /// Create a feed with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to all future user-facing messages.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Message>> {
        self.sender.subscribe()
    }

    /// Publish a user-facing message to all current subscribers.
    ///
    /// With no subscribers the message is silently dropped (it remains in
    /// the conversation log either way).
    pub fn publish(&self, msg: Arc<Message>) {
        let _ = self.sender.send(msg);
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Clone for OutboundFeed {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl std::fmt::Debug for OutboundFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutboundFeed")
            .field("subscriber_count", &self.sender.receiver_count())
            .finish()
    }
}
