//! Invocation runtime: live invocation records, response streams, and the
//! context handed to bot handlers.
//!
//! - `invocation` -- `ActiveInvocation` (router-owned live record),
//!   `InvocationHandle`, `ResponseStream`
//! - `context` -- `BotContext`, the handler's window into the engine
//!
//! `RuntimeState` holds the runtime's shared maps: the per
//! `(bot, conversation)` serialization locks, the live invocation
//! directory, and the pending user-interposition reply channels.

pub mod context;
pub mod invocation;

use std::sync::Arc;

use dashmap::DashMap;
use mergebot_types::message::Message;
use tokio::sync::{Mutex, oneshot};
use uuid::Uuid;

use invocation::ActiveInvocation;

/// Shared mutable state of the invocation runtime.
pub(crate) struct RuntimeState {
    /// Serialization locks per `(bot, conversation)` pair: re-entrant calls
    /// to the same bot within one conversation queue up here.
    pair_locks: DashMap<(Uuid, Uuid), Arc<Mutex<()>>>,
    /// Live invocations by ID, owned by the router until terminal.
    active: DashMap<Uuid, Arc<ActiveInvocation>>,
    /// Interposition reply channels by invocation ID.
    pending_user_replies: DashMap<Uuid, oneshot::Sender<Arc<Message>>>,
}

impl RuntimeState {
    pub(crate) fn new() -> Self {
        Self {
            pair_locks: DashMap::new(),
            active: DashMap::new(),
            pending_user_replies: DashMap::new(),
        }
    }

    /// The serialization lock for a `(bot, conversation)` pair.
    pub(crate) fn pair_lock(&self, bot_id: Uuid, conversation_id: Uuid) -> Arc<Mutex<()>> {
        self.pair_locks
            .entry((bot_id, conversation_id))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    pub(crate) fn track(&self, invocation: Arc<ActiveInvocation>) {
        self.active.insert(invocation.id, invocation);
    }

    pub(crate) fn untrack(&self, invocation_id: &Uuid) {
        self.active.remove(invocation_id);
        // Drop any orphaned reply channel so a racing `post_inbound`
        // observes a closed channel instead of a stuck one.
        self.pending_user_replies.remove(invocation_id);
    }

    pub(crate) fn get(&self, invocation_id: &Uuid) -> Option<Arc<ActiveInvocation>> {
        self.active.get(invocation_id).map(|i| Arc::clone(&i))
    }

    /// Install an interposition reply channel for an invocation.
    pub(crate) fn expect_user_reply(&self, invocation_id: Uuid) -> oneshot::Receiver<Arc<Message>> {
        let (tx, rx) = oneshot::channel();
        self.pending_user_replies.insert(invocation_id, tx);
        rx
    }

    /// Deliver a correlated user reply. Returns `false` when no invocation
    /// is waiting on this correlation ID.
    pub(crate) fn deliver_user_reply(&self, invocation_id: &Uuid, reply: Arc<Message>) -> bool {
        match self.pending_user_replies.remove(invocation_id) {
            Some((_, tx)) => tx.send(reply).is_ok(),
            None => false,
        }
    }

    /// Abandon a pending reply channel (cancellation path).
    pub(crate) fn abandon_user_reply(&self, invocation_id: &Uuid) {
        self.pending_user_replies.remove(invocation_id);
    }

    /// Drop every pair lock scoped to a conversation. Called when the
    /// conversation closes; tasks already queued hold their own `Arc`
    /// clone, so this only stops the map from growing unboundedly.
    pub(crate) fn release_conversation(&self, conversation_id: &Uuid) {
        self.pair_locks
            .retain(|(_, conv), _| conv != conversation_id);
    }

    /// Number of live (non-terminal) invocations.
    pub(crate) fn active_count(&self) -> usize {
        self.active.len()
    }

    #[cfg(test)]
    pub(crate) fn pair_lock_count(&self) -> usize {
        self.pair_locks.len()
    }
}

impl std::fmt::Debug for RuntimeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeState")
            .field("active_invocations", &self.active.len())
            .field("pending_user_replies", &self.pending_user_replies.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn release_conversation_sweeps_only_its_pair_locks() {
        let runtime = RuntimeState::new();
        let bot = Uuid::now_v7();
        let conv_a = Uuid::now_v7();
        let conv_b = Uuid::now_v7();

        runtime.pair_lock(bot, conv_a);
        runtime.pair_lock(bot, conv_b);
        assert_eq!(runtime.pair_lock_count(), 2);

        runtime.release_conversation(&conv_a);
        assert_eq!(runtime.pair_lock_count(), 1);

        // A later request for the released pair gets a fresh lock.
        runtime.pair_lock(bot, conv_a);
        assert_eq!(runtime.pair_lock_count(), 2);
    }
}
