//! Invocation lifecycle types.
//!
//! An invocation is one execution of a bot within a conversation. The state
//! machine is: Pending -> Running -> Completed | Failed, with Running <->
//! AwaitingUserInput while the bot is interposed in front of the user.
//! `Completed` and `Failed` are terminal.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle state of an invocation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InvocationState {
    /// Created, not yet running (queued behind the per-pair lock).
    Pending,
    /// The bot handler is executing.
    Running,
    /// Suspended pending a correlated user reply.
    AwaitingUserInput,
    /// The handler finished without error.
    Completed,
    /// The handler failed, was cancelled, or timed out during cancellation.
    Failed,
}

impl InvocationState {
    /// Whether a transition from `self` to `next` is valid.
    pub fn can_transition_to(self, next: InvocationState) -> bool {
        use InvocationState::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Failed)
                | (Running, AwaitingUserInput)
                | (Running, Completed)
                | (Running, Failed)
                | (AwaitingUserInput, Running)
                | (AwaitingUserInput, Failed)
        )
    }

    /// Whether this state is terminal.
    pub fn is_terminal(self) -> bool {
        matches!(self, InvocationState::Completed | InvocationState::Failed)
    }
}

/// Record of a single bot invocation within a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invocation {
    /// UUIDv7 invocation ID, also the correlation ID for user interposition.
    pub id: Uuid,
    /// The invoked bot.
    pub bot_id: Uuid,
    /// The conversation the invocation is scoped to.
    pub conversation_id: Uuid,
    /// The message that triggered the invocation.
    pub request_id: Uuid,
    /// Current lifecycle state.
    pub state: InvocationState,
    /// How many times the handler has been attempted (1-based once running).
    pub attempts: u32,
    /// Captured error message, set when `state` is `Failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// When the invocation was created.
    pub created_at: DateTime<Utc>,
}

impl Invocation {
    /// Create a pending invocation record.
    pub fn new(bot_id: Uuid, conversation_id: Uuid, request_id: Uuid) -> Self {
        Self {
            id: Uuid::now_v7(),
            bot_id,
            conversation_id,
            request_id,
            state: InvocationState::Pending,
            attempts: 0,
            error: None,
            created_at: Utc::now(),
        }
    }
}
