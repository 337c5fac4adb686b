//! Live invocation records and caller-side handles.
//!
//! `ActiveInvocation` is the router-owned mutable record of one running
//! bot invocation: a `watch`-published state machine, the cancellation
//! token (child of the conversation token), and the sending half of the
//! response stream. `InvocationHandle` is what the dispatcher returns to
//! the caller: state observation plus the receiving half of the stream.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use chrono::{DateTime, Utc};
use mergebot_types::error::InvocationError;
use mergebot_types::invocation::{Invocation, InvocationState};
use mergebot_types::message::Message;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::warn;
use uuid::Uuid;

/// Item on an invocation's response stream: an emitted message, or the
/// error that terminated the invocation.
pub type ResponseItem = Result<Arc<Message>, InvocationError>;

/// Router-owned live record of a single invocation.
pub(crate) struct ActiveInvocation {
    pub(crate) id: Uuid,
    pub(crate) bot_id: Uuid,
    pub(crate) conversation_id: Uuid,
    pub(crate) request_id: Uuid,
    state_tx: watch::Sender<InvocationState>,
    pub(crate) token: CancellationToken,
    pub(crate) response_tx: mpsc::Sender<ResponseItem>,
    attempts: AtomicU32,
    created_at: DateTime<Utc>,
}

impl ActiveInvocation {
    /// Create a pending invocation and the caller's handle for it.
    pub(crate) fn new(
        bot_id: Uuid,
        conversation_id: Uuid,
        request_id: Uuid,
        token: CancellationToken,
        response_buffer: usize,
    ) -> (Arc<Self>, InvocationHandle) {
        let id = Uuid::now_v7();
        let (state_tx, state_rx) = watch::channel(InvocationState::Pending);
        let (response_tx, response_rx) = mpsc::channel(response_buffer.max(1));
        let active = Arc::new(Self {
            id,
            bot_id,
            conversation_id,
            request_id,
            state_tx,
            token,
            response_tx,
            attempts: AtomicU32::new(0),
            created_at: Utc::now(),
        });
        let handle = InvocationHandle {
            invocation_id: id,
            bot_id,
            conversation_id,
            state: state_rx,
            responses: ResponseStream { rx: response_rx },
        };
        (active, handle)
    }

    /// Current state.
    pub(crate) fn state(&self) -> InvocationState {
        *self.state_tx.borrow()
    }

    /// Transition the state machine, enforcing validity. Invalid
    /// transitions are logged and dropped; returns whether the transition
    /// was applied.
    pub(crate) fn transition(&self, next: InvocationState) -> bool {
        let mut applied = false;
        self.state_tx.send_if_modified(|state| {
            if state.can_transition_to(next) {
                *state = next;
                applied = true;
                true
            } else {
                false
            }
        });
        if !applied {
            warn!(
                invocation_id = %self.id,
                from = ?self.state(),
                to = ?next,
                "dropped invalid invocation state transition"
            );
        }
        applied
    }

    /// Bump and return the 1-based attempt counter.
    pub(crate) fn next_attempt(&self) -> u32 {
        self.attempts.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Emit a message onto the response stream. Ignores a dropped caller.
    pub(crate) async fn emit(&self, msg: Arc<Message>) {
        let _ = self.response_tx.send(Ok(msg)).await;
    }

    /// Terminate the response stream with an error.
    pub(crate) async fn emit_error(&self, err: InvocationError) {
        let _ = self.response_tx.send(Err(err)).await;
    }

    /// Snapshot the record as a plain `Invocation`.
    pub(crate) fn snapshot(&self, error: Option<String>) -> Invocation {
        Invocation {
            id: self.id,
            bot_id: self.bot_id,
            conversation_id: self.conversation_id,
            request_id: self.request_id,
            state: self.state(),
            attempts: self.attempts.load(Ordering::SeqCst),
            error,
            created_at: self.created_at,
        }
    }
}

impl std::fmt::Debug for ActiveInvocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveInvocation")
            .field("id", &self.id)
            .field("bot_id", &self.bot_id)
            .field("state", &self.state())
            .finish()
    }
}

/// Stream of messages emitted by one invocation.
///
/// Ends when the invocation reaches a terminal state; a failing invocation
/// surfaces its error as the final item.
pub struct ResponseStream {
    rx: mpsc::Receiver<ResponseItem>,
}

impl ResponseStream {
    /// Wait for the next emitted message. `None` once the invocation has
    /// terminated and the stream is drained.
    pub async fn recv(&mut self) -> Option<ResponseItem> {
        self.rx.recv().await
    }

    /// Drain the stream, collecting every emitted message.
    ///
    /// # Errors
    ///
    /// Returns the invocation's terminating error, if it failed.
    pub async fn collect_all(&mut self) -> Result<Vec<Arc<Message>>, InvocationError> {
        let mut messages = Vec::new();
        while let Some(item) = self.rx.recv().await {
            messages.push(item?);
        }
        Ok(messages)
    }

    /// Drain the stream and return the last emitted message, if any.
    pub async fn final_response(&mut self) -> Result<Option<Arc<Message>>, InvocationError> {
        Ok(self.collect_all().await?.pop())
    }
}

impl std::fmt::Debug for ResponseStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseStream").finish_non_exhaustive()
    }
}

/// Caller-side handle to a dispatched invocation.
///
/// Dispatch never blocks on invocation completion; the handle is how the
/// caller observes state and consumes responses afterwards.
#[derive(Debug)]
pub struct InvocationHandle {
    /// The invocation's ID (doubles as the interposition correlation ID).
    pub invocation_id: Uuid,
    /// The invoked bot.
    pub bot_id: Uuid,
    /// The conversation the invocation is scoped to.
    pub conversation_id: Uuid,
    state: watch::Receiver<InvocationState>,
    responses: ResponseStream,
}

impl InvocationHandle {
    /// Current invocation state.
    pub fn state(&self) -> InvocationState {
        *self.state.borrow()
    }

    /// Wait until the invocation reaches the given state. Returns `false`
    /// if it terminates first without passing through it.
    pub async fn await_state(&mut self, target: InvocationState) -> bool {
        loop {
            let current = *self.state.borrow_and_update();
            if current == target {
                return true;
            }
            if current.is_terminal() {
                return false;
            }
            if self.state.changed().await.is_err() {
                return *self.state.borrow() == target;
            }
        }
    }

    /// Wait for a terminal state and return it.
    pub async fn await_terminal(&mut self) -> InvocationState {
        loop {
            let current = *self.state.borrow_and_update();
            if current.is_terminal() {
                return current;
            }
            if self.state.changed().await.is_err() {
                return *self.state.borrow();
            }
        }
    }

    /// The invocation's response stream.
    pub fn responses(&mut self) -> &mut ResponseStream {
        &mut self.responses
    }

    /// Drain the responses and return the last one (the original
    /// "final response" contract).
    pub async fn final_response(mut self) -> Result<Option<Arc<Message>>, InvocationError> {
        self.responses.final_response().await
    }

    /// Drain the responses into a vector.
    pub async fn collect_responses(mut self) -> Result<Vec<Arc<Message>>, InvocationError> {
        self.responses.collect_all().await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use mergebot_types::message::MessageDraft;

    fn make_invocation() -> (Arc<ActiveInvocation>, InvocationHandle) {
        ActiveInvocation::new(
            Uuid::now_v7(),
            Uuid::now_v7(),
            Uuid::now_v7(),
            CancellationToken::new(),
            8,
        )
    }

    fn sample_msg(conversation_id: Uuid) -> Arc<Message> {
        Arc::new(
            MessageDraft::text("response")
                .build(conversation_id, Uuid::now_v7(), "bot")
                .unwrap(),
        )
    }

    #[test]
    fn starts_pending() {
        let (active, handle) = make_invocation();
        assert_eq!(active.state(), InvocationState::Pending);
        assert_eq!(handle.state(), InvocationState::Pending);
    }

    #[test]
    fn valid_transition_applies_and_publishes() {
        let (active, handle) = make_invocation();
        assert!(active.transition(InvocationState::Running));
        assert_eq!(handle.state(), InvocationState::Running);
    }

    #[test]
    fn invalid_transition_is_dropped() {
        let (active, handle) = make_invocation();
        assert!(!active.transition(InvocationState::Completed));
        assert_eq!(handle.state(), InvocationState::Pending);
    }

    #[test]
    fn attempts_are_one_based() {
        let (active, _handle) = make_invocation();
        assert_eq!(active.next_attempt(), 1);
        assert_eq!(active.next_attempt(), 2);
        assert_eq!(active.snapshot(None).attempts, 2);
    }

    #[tokio::test]
    async fn responses_stream_until_sender_drops() {
        let (active, mut handle) = make_invocation();
        let conv = active.conversation_id;

        active.emit(sample_msg(conv)).await;
        active.emit(sample_msg(conv)).await;
        drop(active);

        let collected = handle.responses().collect_all().await.unwrap();
        assert_eq!(collected.len(), 2);
        assert!(handle.responses().recv().await.is_none());
    }

    #[tokio::test]
    async fn final_response_is_last_message() {
        let (active, handle) = make_invocation();
        let conv = active.conversation_id;

        active.emit(sample_msg(conv)).await;
        let last = sample_msg(conv);
        active.emit(Arc::clone(&last)).await;
        drop(active);

        let final_msg = handle.final_response().await.unwrap().unwrap();
        assert_eq!(final_msg.id, last.id);
    }

    #[tokio::test]
    async fn stream_error_surfaces_from_collect() {
        let (active, handle) = make_invocation();
        active.emit(sample_msg(active.conversation_id)).await;
        active
            .emit_error(InvocationError::Failed {
                message: "boom".into(),
                retryable: false,
            })
            .await;
        drop(active);

        let result = handle.collect_responses().await;
        assert!(matches!(result, Err(InvocationError::Failed { .. })));
    }

    #[tokio::test]
    async fn await_terminal_sees_completion() {
        let (active, mut handle) = make_invocation();
        let waiter = tokio::spawn(async move { handle.await_terminal().await });

        active.transition(InvocationState::Running);
        active.transition(InvocationState::Completed);

        assert_eq!(waiter.await.unwrap(), InvocationState::Completed);
    }

    #[tokio::test]
    async fn await_state_false_when_skipped() {
        let (active, mut handle) = make_invocation();
        let waiter =
            tokio::spawn(async move { handle.await_state(InvocationState::AwaitingUserInput).await });

        active.transition(InvocationState::Running);
        active.transition(InvocationState::Completed);

        assert!(!waiter.await.unwrap());
    }
}
