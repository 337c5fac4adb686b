//! Conversation lifecycle and lookup.
//!
//! A `Conversation` couples the append-only log with its participant set,
//! its human owner, and a conversation-scoped `CancellationToken`. Closing
//! a conversation closes the log and cancels the token; invocation tokens
//! are children of it, so all outstanding invocations receive the signal.
//!
//! `ConversationStore` additionally indexes conversations by an external
//! channel key (e.g. `"telegram:12345"`) so chat-platform adapters can
//! find the conversation that serves a platform-native channel.

use std::sync::Arc;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use mergebot_types::error::ConversationError;
use mergebot_types::participant::Participant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use super::log::ConversationLog;

/// A shared conversation: ordered log, participants, owner, lifecycle.
pub struct Conversation {
    /// UUIDv7 conversation ID.
    pub id: Uuid,
    /// The human participant this conversation serves.
    owner: Participant,
    /// Everyone who has taken part (owner first, bots as they join).
    participants: Mutex<Vec<Participant>>,
    log: Arc<ConversationLog>,
    /// Cancelled when the conversation closes; invocation tokens are
    /// children of this one.
    token: CancellationToken,
    /// When the conversation was opened.
    pub created_at: DateTime<Utc>,
}

impl Conversation {
    fn new(owner: Participant) -> Self {
        let id = Uuid::now_v7();
        Self {
            id,
            participants: Mutex::new(vec![owner.clone()]),
            owner,
            log: Arc::new(ConversationLog::new(id)),
            token: CancellationToken::new(),
            created_at: Utc::now(),
        }
    }

    /// The human owner of the conversation.
    pub fn owner(&self) -> &Participant {
        &self.owner
    }

    /// The conversation's message log.
    pub fn log(&self) -> &Arc<ConversationLog> {
        &self.log
    }

    /// The conversation-scoped cancellation token.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.token
    }

    /// Whether the conversation has been closed.
    pub fn is_closed(&self) -> bool {
        self.log.is_closed()
    }

    /// Snapshot of the current participant set.
    pub fn participants(&self) -> Vec<Participant> {
        self.participants
            .lock()
            .expect("participant lock poisoned")
            .clone()
    }

    /// Record a participant the first time it takes part.
    pub fn ensure_participant(&self, participant: &Participant) {
        let mut participants = self.participants.lock().expect("participant lock poisoned");
        if !participants.iter().any(|p| p.id == participant.id) {
            participants.push(participant.clone());
        }
    }
}

impl std::fmt::Debug for Conversation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Conversation")
            .field("id", &self.id)
            .field("owner", &self.owner.name)
            .field("len", &self.log.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Directory of live (and closed) conversations.
pub struct ConversationStore {
    conversations: DashMap<Uuid, Arc<Conversation>>,
    /// External channel key -> conversation ID, for adapter lookup.
    channel_index: DashMap<String, Uuid>,
}

impl ConversationStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            conversations: DashMap::new(),
            channel_index: DashMap::new(),
        }
    }

    /// Open a new conversation owned by the given human participant.
    pub fn open(&self, owner: Participant) -> Arc<Conversation> {
        let conversation = Arc::new(Conversation::new(owner));
        self.conversations
            .insert(conversation.id, Arc::clone(&conversation));
        info!(conversation_id = %conversation.id, owner = %conversation.owner.name, "opened conversation");
        conversation
    }

    /// Find the conversation bound to an external channel key, or open a
    /// fresh one owned by a new human participant with the given display
    /// name. The display name is ignored when the channel already exists.
    ///
    /// The lookup-or-create is atomic on the index entry, so concurrent
    /// adapters racing on a new channel key all get the same conversation.
    pub fn find_or_open_for_user(
        &self,
        channel_key: impl Into<String>,
        user_display_name: &str,
    ) -> Arc<Conversation> {
        match self.channel_index.entry(channel_key.into()) {
            Entry::Occupied(mut slot) => {
                if let Ok(existing) = self.get(slot.get()) {
                    return existing;
                }
                // The index entry outlived its conversation; rebind.
                let conversation = self.open(Participant::human(user_display_name));
                slot.insert(conversation.id);
                conversation
            }
            Entry::Vacant(slot) => {
                let conversation = self.open(Participant::human(user_display_name));
                slot.insert(conversation.id);
                conversation
            }
        }
    }

    /// Look up a conversation by ID.
    pub fn get(&self, id: &Uuid) -> Result<Arc<Conversation>, ConversationError> {
        self.conversations
            .get(id)
            .map(|c| Arc::clone(&c))
            .ok_or(ConversationError::NotFound(*id))
    }

    /// Close a conversation: the log stops accepting appends and the
    /// conversation token is cancelled, signalling every outstanding
    /// invocation scoped to it. Any channel key bound to it is released,
    /// so the next message on that channel opens a fresh conversation.
    /// Idempotent for an already-closed conversation.
    pub fn close(&self, id: &Uuid) -> Result<(), ConversationError> {
        let conversation = self.get(id)?;
        conversation.log.close();
        conversation.token.cancel();
        self.channel_index.retain(|_, bound| bound != id);
        debug!(conversation_id = %id, "closed conversation");
        Ok(())
    }

    /// Number of conversations the store knows about.
    pub fn len(&self) -> usize {
        self.conversations.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }
}

impl Default for ConversationStore {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use mergebot_types::message::MessageDraft;

    #[test]
    fn open_registers_owner_as_participant() {
        let store = ConversationStore::new();
        let conversation = store.open(Participant::human("alice"));
        let participants = conversation.participants();
        assert_eq!(participants.len(), 1);
        assert_eq!(participants[0].name, "alice");
    }

    #[test]
    fn find_or_open_reuses_channel_key() {
        let store = ConversationStore::new();
        let a = store.find_or_open_for_user("telegram:42", "alice");
        let b = store.find_or_open_for_user("telegram:42", "ignored");
        assert_eq!(a.id, b.id);
        assert_eq!(b.owner().name, "alice");
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn distinct_channel_keys_open_distinct_conversations() {
        let store = ConversationStore::new();
        let a = store.find_or_open_for_user("cli:1", "alice");
        let b = store.find_or_open_for_user("cli:2", "bob");
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn concurrent_find_or_open_binds_one_conversation() {
        let store = Arc::new(ConversationStore::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || store.find_or_open_for_user("telegram:7", "alice").id)
            })
            .collect();
        let ids: Vec<Uuid> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert!(ids.iter().all(|id| *id == ids[0]));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn close_unbinds_channel_key() {
        let store = ConversationStore::new();
        let a = store.find_or_open_for_user("telegram:9", "alice");
        store.close(&a.id).unwrap();

        let b = store.find_or_open_for_user("telegram:9", "alice");
        assert_ne!(a.id, b.id);
        assert!(!b.is_closed());
    }

    #[test]
    fn get_unknown_conversation_fails() {
        let store = ConversationStore::new();
        let result = store.get(&Uuid::now_v7());
        assert!(matches!(result, Err(ConversationError::NotFound(_))));
    }

    #[test]
    fn close_cancels_token_and_rejects_appends() {
        let store = ConversationStore::new();
        let conversation = store.open(Participant::human("alice"));
        let child = conversation.cancellation().child_token();

        store.close(&conversation.id).unwrap();

        assert!(child.is_cancelled());
        assert!(conversation.is_closed());
        let msg = MessageDraft::text("late")
            .build(conversation.id, conversation.owner().id, "alice")
            .unwrap();
        assert!(matches!(
            conversation.log().append(msg),
            Err(ConversationError::Closed(_))
        ));
    }

    #[test]
    fn close_twice_is_ok() {
        let store = ConversationStore::new();
        let conversation = store.open(Participant::human("alice"));
        store.close(&conversation.id).unwrap();
        store.close(&conversation.id).unwrap();
    }

    #[test]
    fn ensure_participant_deduplicates() {
        let store = ConversationStore::new();
        let conversation = store.open(Participant::human("alice"));
        let bot = Participant::bot(Uuid::now_v7(), "read-file");
        conversation.ensure_participant(&bot);
        conversation.ensure_participant(&bot);
        assert_eq!(conversation.participants().len(), 2);
    }
}
