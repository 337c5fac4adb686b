//! The context a bot handler executes within.
//!
//! `BotContext` is the handler's only window into the engine: it reads the
//! scoped conversation, emits response messages, delegates to other bots,
//! and interposes itself directly in front of the human user. Everything
//! is passed explicitly; there is no ambient "current conversation" state.

use std::sync::Arc;

use mergebot_types::error::{DispatchError, InvocationError};
use mergebot_types::message::{Message, MessageDraft};
use mergebot_types::participant::Participant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::conversation::log::ConversationCursor;
use crate::conversation::store::Conversation;
use crate::coordinator::Coordinator;
use crate::registry::RegisteredBot;
use crate::route::addressing::InputMode;

use super::invocation::{ActiveInvocation, InvocationHandle};

/// Execution context for one bot invocation.
///
/// Cheap to clone; handlers may move clones into tasks they spawn.
#[derive(Clone)]
pub struct BotContext {
    pub(crate) coordinator: Arc<Coordinator>,
    pub(crate) conversation: Arc<Conversation>,
    pub(crate) bot: Arc<RegisteredBot>,
    pub(crate) invocation: Arc<ActiveInvocation>,
    pub(crate) request: Arc<Message>,
    pub(crate) mode: InputMode,
    /// Ancestor bot IDs of the delegation chain that led here (empty for
    /// a user-triggered invocation). The dispatcher refuses delegations
    /// back into this chain.
    pub(crate) lineage: Arc<Vec<Uuid>>,
}

impl BotContext {
    /// The message that triggered this invocation.
    pub fn request(&self) -> &Arc<Message> {
        &self.request
    }

    /// How the dispatcher resolved the input: structured consumption of a
    /// declared schema, or natural-language fallback.
    pub fn input_mode(&self) -> InputMode {
        self.mode
    }

    /// This bot's identity alias.
    pub fn identity(&self) -> &str {
        &self.bot.descriptor.identity
    }

    /// The conversation this invocation is scoped to.
    pub fn conversation_id(&self) -> Uuid {
        self.conversation.id
    }

    /// This invocation's ID (the correlation ID for user replies).
    pub fn invocation_id(&self) -> Uuid {
        self.invocation.id
    }

    /// Current delegation depth (0 for a user-triggered invocation).
    pub fn depth(&self) -> u32 {
        self.lineage.len() as u32
    }

    /// Cooperative cancellation signal. Cancelled when the conversation
    /// closes; handlers doing long external work should select on it.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.invocation.token
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.invocation.token.is_cancelled()
    }

    /// Cursor over the shared conversation, starting at the beginning.
    pub fn conversation_view(&self) -> ConversationCursor {
        self.conversation.log().subscribe_from(0)
    }

    /// Cursor positioned at this invocation's triggering message.
    pub fn conversation_view_from_request(&self) -> ConversationCursor {
        let offset = self.request.seq.unwrap_or(0);
        self.conversation.log().subscribe_from(offset)
    }

    /// Emit a response message into the conversation and onto this
    /// invocation's response stream.
    ///
    /// The message is attributed to this bot and references the request
    /// unless the draft sets its own reply target. A draft marked
    /// user-facing is also delivered to the outbound feed.
    pub async fn respond(&self, draft: MessageDraft) -> Result<Arc<Message>, InvocationError> {
        let draft = if draft.reply_to().is_none() {
            draft.in_reply_to(self.request.id)
        } else {
            draft
        };
        let msg = draft
            .build(
                self.conversation.id,
                self.bot.descriptor.id,
                self.bot.descriptor.name.clone(),
            )
            .map_err(|e| InvocationError::Failed {
                message: e.to_string(),
                retryable: false,
            })?;
        let stored = self
            .coordinator
            .post_from_bot(&self.conversation, &self.bot_participant(), msg)
            .map_err(|_| InvocationError::ConversationClosed(self.conversation.id))?;
        self.invocation.emit(Arc::clone(&stored)).await;
        Ok(stored)
    }

    /// Emit a plain-text response.
    pub async fn respond_text(
        &self,
        text: impl Into<String>,
    ) -> Result<Arc<Message>, InvocationError> {
        self.respond(MessageDraft::text(text)).await
    }

    /// Emit a user-facing plain-text response (routed to the human owner
    /// of the top-level conversation).
    pub async fn respond_to_user(
        &self,
        text: impl Into<String>,
    ) -> Result<Arc<Message>, InvocationError> {
        self.respond(MessageDraft::text(text).user_facing()).await
    }

    /// Interpose directly in front of the human user: post a user-facing
    /// question correlated with this invocation, suspend in
    /// `AwaitingUserInput`, and resume with the correlated reply.
    ///
    /// Works at any bot-to-bot nesting depth.
    pub async fn ask_user(&self, text: impl Into<String>) -> Result<Arc<Message>, InvocationError> {
        self.coordinator
            .interpose(&self.conversation, &self.bot, &self.invocation, text.into())
            .await
    }

    /// Delegate to another bot within this conversation. Returns the new
    /// invocation's handle without waiting for it.
    pub async fn invoke_bot(
        &self,
        identity: &str,
        draft: MessageDraft,
    ) -> Result<InvocationHandle, DispatchError> {
        let msg = draft
            .to(identity)
            .build(
                self.conversation.id,
                self.bot.descriptor.id,
                self.bot.descriptor.name.clone(),
            )
            .map_err(mergebot_types::error::ConversationError::from)?;
        let stored = self
            .coordinator
            .post_from_bot(&self.conversation, &self.bot_participant(), msg)?;
        let mut lineage = Vec::with_capacity(self.lineage.len() + 1);
        lineage.extend_from_slice(&self.lineage);
        lineage.push(self.bot.descriptor.id);
        self.coordinator
            .dispatch(&self.conversation, stored, Arc::new(lineage))
            .await
    }

    /// Delegate to another bot and wait for its final response.
    pub async fn invoke_and_wait(
        &self,
        identity: &str,
        draft: MessageDraft,
    ) -> Result<Option<Arc<Message>>, InvocationError> {
        let handle = self
            .invoke_bot(identity, draft)
            .await
            .map_err(|e| InvocationError::Failed {
                message: e.to_string(),
                retryable: false,
            })?;
        handle.final_response().await
    }

    fn bot_participant(&self) -> Participant {
        Participant::bot(self.bot.descriptor.id, self.bot.descriptor.name.clone())
    }
}

impl std::fmt::Debug for BotContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BotContext")
            .field("bot", &self.bot.descriptor.identity)
            .field("conversation_id", &self.conversation.id)
            .field("invocation_id", &self.invocation.id)
            .field("mode", &self.mode)
            .field("depth", &self.depth())
            .finish()
    }
}
