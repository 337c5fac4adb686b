//! Append-only message log for a single conversation.
//!
//! Appends are serialized by a single-writer lock and assign the message's
//! sequence position. Readers use `ConversationCursor`, a lazy cursor that
//! replays the log from any offset and then follows live appends through a
//! `watch` sequence counter, so observers see every message in append order
//! with no gaps. A lossy `broadcast` channel cannot give that guarantee,
//! which is why the cursor reads back through the log itself.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use mergebot_types::error::ConversationError;
use mergebot_types::message::Message;
use tokio::sync::watch;
use tracing::debug;
use uuid::Uuid;

/// Ordered, append-only log of messages within one conversation.
pub struct ConversationLog {
    conversation_id: Uuid,
    entries: Mutex<Vec<Arc<Message>>>,
    closed: AtomicBool,
    /// Number of appended messages; bumped after every append so cursors
    /// waiting on the watch channel wake up. Also touched on close.
    seq_tx: watch::Sender<u64>,
}

impl ConversationLog {
    /// Create an empty log for the given conversation.
    pub fn new(conversation_id: Uuid) -> Self {
        let (seq_tx, _) = watch::channel(0);
        Self {
            conversation_id,
            entries: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            seq_tx,
        }
    }

    /// Append a message atomically and return it with its assigned
    /// sequence position.
    ///
    /// # Errors
    ///
    /// Fails with [`ConversationError::Closed`] once the conversation has
    /// been closed.
    pub fn append(&self, mut msg: Message) -> Result<Arc<Message>, ConversationError> {
        if self.is_closed() {
            return Err(ConversationError::Closed(self.conversation_id));
        }
        let stored = {
            let mut entries = self.entries.lock().expect("conversation log lock poisoned");
            // Re-check under the lock so an append racing with close never
            // lands after the closed marker.
            if self.is_closed() {
                return Err(ConversationError::Closed(self.conversation_id));
            }
            msg.seq = Some(entries.len() as u64);
            let stored = Arc::new(msg);
            entries.push(Arc::clone(&stored));
            stored
        };
        self.seq_tx.send_replace(stored.seq.unwrap_or(0) + 1);
        debug!(
            conversation_id = %self.conversation_id,
            seq = stored.seq,
            sender = %stored.sender_name,
            "appended message"
        );
        Ok(stored)
    }

    /// Fetch a message by sequence position.
    pub fn get(&self, seq: u64) -> Option<Arc<Message>> {
        let entries = self.entries.lock().expect("conversation log lock poisoned");
        entries.get(seq as usize).cloned()
    }

    /// Copy of the full log in append order.
    pub fn snapshot(&self) -> Vec<Arc<Message>> {
        self.entries
            .lock()
            .expect("conversation log lock poisoned")
            .clone()
    }

    /// Number of appended messages.
    pub fn len(&self) -> u64 {
        self.entries
            .lock()
            .expect("conversation log lock poisoned")
            .len() as u64
    }

    /// Whether the log is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the conversation has been closed.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Mark the log closed. Subsequent appends fail; cursors drain the
    /// remaining entries and then terminate. Idempotent.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        // Wake any cursor parked on the watch channel so it can observe
        // the closed flag.
        let len = self.len();
        self.seq_tx.send_replace(len);
        debug!(conversation_id = %self.conversation_id, "conversation log closed");
    }

    /// Subscribe to the log starting at `offset`.
    ///
    /// The cursor first replays already-appended messages, then follows
    /// live appends. Restartable: a new cursor at the same offset observes
    /// the same sequence again.
    pub fn subscribe_from(self: &Arc<Self>, offset: u64) -> ConversationCursor {
        ConversationCursor {
            log: Arc::clone(self),
            next_seq: offset,
            seq_rx: self.seq_tx.subscribe(),
        }
    }
}

impl std::fmt::Debug for ConversationLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationLog")
            .field("conversation_id", &self.conversation_id)
            .field("len", &self.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Lazy, restartable cursor over a conversation log.
///
/// Yields messages strictly in append order. Returns `None` once the
/// conversation is closed and the log is drained.
pub struct ConversationCursor {
    log: Arc<ConversationLog>,
    next_seq: u64,
    seq_rx: watch::Receiver<u64>,
}

impl ConversationCursor {
    /// The sequence position of the next message this cursor will yield.
    pub fn position(&self) -> u64 {
        self.next_seq
    }

    /// Wait for and return the next message in append order.
    pub async fn next(&mut self) -> Option<Arc<Message>> {
        loop {
            if let Some(msg) = self.log.get(self.next_seq) {
                self.next_seq += 1;
                return Some(msg);
            }
            if self.log.is_closed() {
                return None;
            }
            // Park until the next append (or close) touches the counter.
            if self.seq_rx.changed().await.is_err() {
                // Log dropped; drain whatever is still reachable.
                return None;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
