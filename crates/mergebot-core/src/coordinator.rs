//! The coordination facade.
//!
//! `Coordinator` owns the bot registry, the conversation store, the
//! addressee router, and the invocation runtime, and exposes the external
//! surface adapters talk to: `post_inbound` for messages arriving from a
//! chat platform, `subscribe_outbound` for user-facing messages leaving the
//! engine, and the conversation lifecycle operations.
//!
//! Dispatch never blocks the caller: an inbound message is appended,
//! resolved to a bot, and handed to a spawned invocation task; the caller
//! gets an `InvocationHandle` back. The invocation task serializes on the
//! `(bot, conversation)` pair lock, drives bounded retries for transient
//! handler failures, and honors conversation-close cancellation with a
//! configurable grace period.

use std::sync::Arc;

use mergebot_types::bot::BotDescriptor;
use mergebot_types::config::CoordinatorConfig;
use mergebot_types::error::{ConversationError, DispatchError, InvocationError, RegistryError};
use mergebot_types::invocation::{Invocation, InvocationState};
use mergebot_types::message::{Message, MessageDraft};
use mergebot_types::participant::Participant;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::conversation::store::{Conversation, ConversationStore};
use crate::handler::BotHandler;
use crate::handler::boxed::BoxBotHandler;
use crate::outbound::OutboundFeed;
use crate::registry::{BotRegistry, RegisteredBot};
use crate::route::addressing::{self, InputMode};
use crate::route::classifier::{BoxIntentClassifier, IntentClassifier, NullClassifier};
use crate::route::recency::RecencyTracker;
use crate::runtime::RuntimeState;
use crate::runtime::context::BotContext;
use crate::runtime::invocation::{ActiveInvocation, InvocationHandle};

/// What became of an inbound message.
#[derive(Debug)]
pub enum InboundOutcome {
    /// The message was routed to a bot; the handle observes the invocation.
    Dispatched(InvocationHandle),
    /// The message was a correlated reply and resumed a suspended
    /// invocation instead of starting a new one.
    ReplyDelivered {
        /// The invocation that was waiting on this reply.
        invocation_id: Uuid,
    },
}

/// Builder for a [`Coordinator`].
pub struct CoordinatorBuilder {
    config: CoordinatorConfig,
    classifier: BoxIntentClassifier,
}

impl CoordinatorBuilder {
    /// Override the default configuration.
    pub fn config(mut self, config: CoordinatorConfig) -> Self {
        self.config = config;
        self
    }

    /// Install the intent classifier used for natural-language addressing.
    /// Without one, only explicit and schema addressing resolve.
    pub fn classifier(mut self, classifier: impl IntentClassifier + 'static) -> Self {
        self.classifier = BoxIntentClassifier::new(classifier);
        self
    }

    /// Assemble the coordinator.
    pub fn build(self) -> Arc<Coordinator> {
        let outbound = OutboundFeed::new(self.config.outbound_buffer);
        Arc::new(Coordinator {
            registry: BotRegistry::new(),
            conversations: ConversationStore::new(),
            classifier: self.classifier,
            recency: RecencyTracker::new(),
            runtime: RuntimeState::new(),
            outbound,
            escalation_sender: Participant::bot(Uuid::now_v7(), "coordinator"),
            config: self.config,
        })
    }
}

/// The bot-coordination engine.
pub struct Coordinator {
    registry: BotRegistry,
    conversations: ConversationStore,
    classifier: BoxIntentClassifier,
    recency: RecencyTracker,
    runtime: RuntimeState,
    outbound: OutboundFeed,
    /// Sender identity for escalation messages the engine itself posts.
    escalation_sender: Participant,
    config: CoordinatorConfig,
}

impl Coordinator {
    /// Start building a coordinator.
    pub fn builder() -> CoordinatorBuilder {
        CoordinatorBuilder {
            config: CoordinatorConfig::default(),
            classifier: BoxIntentClassifier::new(NullClassifier),
        }
    }

    /// The active configuration.
    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// The bot registry.
    pub fn registry(&self) -> &BotRegistry {
        &self.registry
    }

    /// Register a bot under its identity alias.
    ///
    /// # Errors
    ///
    /// Fails with [`RegistryError::DuplicateIdentity`] when the alias is
    /// already taken.
    pub fn register_bot(
        &self,
        descriptor: BotDescriptor,
        handler: impl BotHandler + 'static,
    ) -> Result<(), RegistryError> {
        self.registry.register(descriptor, BoxBotHandler::new(handler))
    }

    /// Remove a bot, freeing its identity alias. Running invocations are
    /// unaffected. Returns `true` if the bot was registered.
    pub fn deregister_bot(&self, identity: &str) -> bool {
        self.registry.deregister(identity)
    }

    /// Open a new conversation owned by the given human participant.
    pub fn open_conversation(&self, owner: Participant) -> Arc<Conversation> {
        self.conversations.open(owner)
    }

    /// Find the conversation serving an external channel, opening one if
    /// the channel is new.
    pub fn find_or_open_for_user(
        &self,
        channel_key: impl Into<String>,
        user_display_name: &str,
    ) -> Arc<Conversation> {
        self.conversations
            .find_or_open_for_user(channel_key, user_display_name)
    }

    /// Look up a conversation by ID.
    pub fn conversation(&self, id: &Uuid) -> Result<Arc<Conversation>, ConversationError> {
        self.conversations.get(id)
    }

    /// Close a conversation: new messages are rejected, every outstanding
    /// invocation scoped to it is cancelled, and its runtime state (pair
    /// locks, channel binding) is reclaimed.
    pub fn close_conversation(&self, id: &Uuid) -> Result<(), ConversationError> {
        self.conversations.close(id)?;
        self.runtime.release_conversation(id);
        Ok(())
    }

    /// Subscribe to user-facing messages leaving the engine.
    pub fn subscribe_outbound(&self) -> broadcast::Receiver<Arc<Message>> {
        self.outbound.subscribe()
    }

    /// Number of live (non-terminal) invocations.
    pub fn active_invocations(&self) -> usize {
        self.runtime.active_count()
    }

    /// Snapshot of a live invocation's record, or `None` once it has
    /// reached a terminal state and been released.
    pub fn invocation(&self, id: &Uuid) -> Option<Invocation> {
        self.runtime.get(id).map(|active| active.snapshot(None))
    }

    /// Accept a message from an external participant.
    ///
    /// The message is appended to the conversation first, so it is part of
    /// the shared record even if routing fails. A reply correlated with a
    /// suspended invocation resumes that invocation; anything else is
    /// dispatched to the resolved bot.
    ///
    /// # Errors
    ///
    /// Routing failures are returned *and* surfaced into the conversation
    /// as a user-facing escalation message, so the user learns about them
    /// even when the adapter ignores the error.
    pub async fn post_inbound(
        self: &Arc<Self>,
        conversation_id: Uuid,
        sender: &Participant,
        draft: MessageDraft,
    ) -> Result<InboundOutcome, DispatchError> {
        let conversation = self.conversations.get(&conversation_id)?;
        conversation.ensure_participant(sender);
        let msg = draft
            .build(conversation_id, sender.id, sender.name.clone())
            .map_err(ConversationError::from)?;
        let stored = conversation.log().append(msg)?;

        if stored.is_interposition_reply()
            && let Some(correlation_id) = stored.correlation_id
        {
            if self
                .runtime
                .deliver_user_reply(&correlation_id, Arc::clone(&stored))
            {
                debug!(
                    conversation_id = %conversation_id,
                    invocation_id = %correlation_id,
                    "delivered correlated user reply"
                );
                return Ok(InboundOutcome::ReplyDelivered {
                    invocation_id: correlation_id,
                });
            }
            warn!(
                conversation_id = %conversation_id,
                invocation_id = %correlation_id,
                "no invocation awaiting this correlation id; dispatching normally"
            );
        }

        match self.dispatch(&conversation, stored, Arc::new(Vec::new())).await {
            Ok(handle) => Ok(InboundOutcome::Dispatched(handle)),
            Err(err) => {
                self.escalate(&conversation, &err);
                Err(err)
            }
        }
    }

    /// Resolve the addressee for a message and start its invocation.
    ///
    /// Returns immediately with the invocation handle; the handler runs on
    /// a spawned task serialized on the `(bot, conversation)` pair.
    ///
    /// `lineage` is the chain of ancestor bot IDs that delegated here
    /// (empty for a user-triggered dispatch). Its length is the delegation
    /// depth, and a resolved bot already present in it is rejected up
    /// front: that bot holds the pair lock somewhere up the chain, so
    /// queuing behind it could never complete.
    pub(crate) async fn dispatch(
        self: &Arc<Self>,
        conversation: &Arc<Conversation>,
        msg: Arc<Message>,
        lineage: Arc<Vec<Uuid>>,
    ) -> Result<InvocationHandle, DispatchError> {
        let depth = lineage.len() as u32;
        if depth > self.config.max_delegation_depth {
            return Err(DispatchError::DelegationDepthExceeded {
                depth,
                max: self.config.max_delegation_depth,
            });
        }
        if conversation.is_closed() {
            return Err(ConversationError::Closed(conversation.id).into());
        }

        let resolution = addressing::resolve(
            &self.registry,
            &self.recency,
            &self.classifier,
            &self.config,
            &msg,
        )
        .await?;
        let bot = resolution.bot;
        if lineage.contains(&bot.descriptor.id) {
            return Err(DispatchError::DelegationCycle {
                identity: bot.descriptor.identity.clone(),
            });
        }
        conversation.ensure_participant(&Participant::bot(
            bot.descriptor.id,
            bot.descriptor.name.clone(),
        ));

        let (active, handle) = ActiveInvocation::new(
            bot.descriptor.id,
            conversation.id,
            msg.id,
            conversation.cancellation().child_token(),
            self.config.response_buffer,
        );
        self.runtime.track(Arc::clone(&active));
        info!(
            conversation_id = %conversation.id,
            bot = %bot.descriptor.identity,
            invocation_id = %active.id,
            depth,
            mode = ?resolution.mode,
            "dispatching invocation"
        );
        tokio::spawn(Arc::clone(self).run_invocation(
            Arc::clone(conversation),
            bot,
            active,
            msg,
            resolution.mode,
            lineage,
        ));
        Ok(handle)
    }

    /// Drive one invocation to a terminal state.
    async fn run_invocation(
        self: Arc<Self>,
        conversation: Arc<Conversation>,
        bot: Arc<RegisteredBot>,
        active: Arc<ActiveInvocation>,
        request: Arc<Message>,
        mode: InputMode,
        lineage: Arc<Vec<Uuid>>,
    ) {
        // Serialize on the (bot, conversation) pair. A conversation close
        // while queued abandons the invocation without running it.
        let pair_lock = self.runtime.pair_lock(bot.descriptor.id, conversation.id);
        let _guard = tokio::select! {
            guard = pair_lock.lock() => guard,
            _ = active.token.cancelled() => {
                active.transition(InvocationState::Failed);
                active
                    .emit_error(InvocationError::ConversationClosed(conversation.id))
                    .await;
                self.runtime.untrack(&active.id);
                // The close sweep may have run before this task re-created
                // its pair lock entry; sweep again.
                self.runtime.release_conversation(&conversation.id);
                return;
            }
        };

        active.transition(InvocationState::Running);
        let ctx = BotContext {
            coordinator: Arc::clone(&self),
            conversation: Arc::clone(&conversation),
            bot: Arc::clone(&bot),
            invocation: Arc::clone(&active),
            request,
            mode,
            lineage,
        };

        let outcome = loop {
            let attempt = active.next_attempt();
            let fut = bot.handler.handle(ctx.clone());
            tokio::pin!(fut);

            let finished = tokio::select! {
                result = &mut fut => Some(result),
                _ = active.token.cancelled() => None,
            };
            match finished {
                Some(Ok(())) => break Ok(()),
                Some(Err(err)) => {
                    if err.is_retryable() && attempt <= self.config.max_retry_attempts {
                        warn!(
                            invocation_id = %active.id,
                            bot = %bot.descriptor.identity,
                            attempt,
                            error = %err,
                            "transient handler failure; retrying"
                        );
                        continue;
                    }
                    break Err(InvocationError::Failed {
                        message: err.to_string(),
                        retryable: err.is_retryable(),
                    });
                }
                None => {
                    // Cancellation requested: let the handler finish
                    // cooperatively within the grace period.
                    debug!(
                        invocation_id = %active.id,
                        grace_ms = self.config.cancel_grace_ms,
                        "cancellation requested; entering grace period"
                    );
                    let grace = tokio::time::sleep(self.config.cancel_grace());
                    tokio::pin!(grace);
                    break tokio::select! {
                        result = &mut fut => match result {
                            Ok(()) => Ok(()),
                            Err(err) => Err(InvocationError::Failed {
                                message: err.to_string(),
                                retryable: false,
                            }),
                        },
                        _ = &mut grace => Err(InvocationError::CancelledTimeout),
                    };
                }
            }
        };

        match outcome {
            Ok(()) => {
                active.transition(InvocationState::Completed);
                for tag in &bot.descriptor.capabilities {
                    self.recency.record_success(tag, bot.descriptor.id);
                }
                debug!(
                    invocation_id = %active.id,
                    bot = %bot.descriptor.identity,
                    "invocation completed"
                );
            }
            Err(err) => {
                warn!(
                    invocation_id = %active.id,
                    bot = %bot.descriptor.identity,
                    error = %err,
                    "invocation failed"
                );
                active.transition(InvocationState::Failed);
                self.surface_failure(&conversation, &bot, &err);
                active.emit_error(err).await;
            }
        }
        self.runtime.untrack(&active.id);
    }

    /// Suspend an invocation in front of the human user: post the question
    /// user-facing and correlated, wait for the matching reply.
    pub(crate) async fn interpose(
        &self,
        conversation: &Arc<Conversation>,
        bot: &Arc<RegisteredBot>,
        active: &Arc<ActiveInvocation>,
        text: String,
    ) -> Result<Arc<Message>, InvocationError> {
        // Install the reply channel before the question becomes visible so
        // an immediate reply cannot race past it.
        let reply_rx = self.runtime.expect_user_reply(active.id);
        let question = MessageDraft::text(text)
            .user_facing()
            .correlated_with(active.id)
            .in_reply_to(active.request_id)
            .build(
                conversation.id,
                bot.descriptor.id,
                bot.descriptor.name.clone(),
            )
            .map_err(|e| InvocationError::Failed {
                message: e.to_string(),
                retryable: false,
            })?;
        let stored = match conversation.log().append(question) {
            Ok(stored) => stored,
            Err(_) => {
                self.runtime.abandon_user_reply(&active.id);
                return Err(InvocationError::ConversationClosed(conversation.id));
            }
        };
        self.outbound.publish(stored);
        active.transition(InvocationState::AwaitingUserInput);
        debug!(
            invocation_id = %active.id,
            bot = %bot.descriptor.identity,
            "awaiting user input"
        );

        tokio::select! {
            reply = reply_rx => match reply {
                Ok(reply) => {
                    active.transition(InvocationState::Running);
                    Ok(reply)
                }
                Err(_) => Err(InvocationError::ReplyChannelClosed),
            },
            _ = active.token.cancelled() => {
                self.runtime.abandon_user_reply(&active.id);
                Err(InvocationError::ConversationClosed(conversation.id))
            }
        }
    }

    /// Append a bot-authored message, publishing it outbound when it is
    /// user-facing.
    pub(crate) fn post_from_bot(
        &self,
        conversation: &Arc<Conversation>,
        sender: &Participant,
        msg: Message,
    ) -> Result<Arc<Message>, DispatchError> {
        conversation.ensure_participant(sender);
        let stored = conversation.log().append(msg)?;
        if stored.user_facing {
            self.outbound.publish(Arc::clone(&stored));
        }
        Ok(stored)
    }

    /// Surface a routing failure into the conversation as a user-facing
    /// escalation message. Best effort: a closed conversation drops it.
    fn escalate(&self, conversation: &Arc<Conversation>, err: &DispatchError) {
        let text = match err {
            DispatchError::AmbiguousAddressee {
                capability,
                candidates,
            } => format!(
                "I can't decide who should handle this '{capability}' request. \
                 Please address one of: {}.",
                candidates.join(", ")
            ),
            other => format!("I couldn't route your message: {other}"),
        };
        self.post_engine_message(conversation, text);
    }

    /// Surface an invocation failure into the conversation.
    fn surface_failure(
        &self,
        conversation: &Arc<Conversation>,
        bot: &Arc<RegisteredBot>,
        err: &InvocationError,
    ) {
        self.post_engine_message(
            conversation,
            format!(
                "'{}' could not complete the request: {err}",
                bot.descriptor.identity
            ),
        );
    }

    fn post_engine_message(&self, conversation: &Arc<Conversation>, text: String) {
        let draft = MessageDraft::text(text).user_facing();
        match draft.build(
            conversation.id,
            self.escalation_sender.id,
            self.escalation_sender.name.clone(),
        ) {
            Ok(msg) => match conversation.log().append(msg) {
                Ok(stored) => self.outbound.publish(stored),
                Err(_) => {
                    debug!(conversation_id = %conversation.id, "dropped escalation: conversation closed");
                }
            },
            Err(e) => {
                warn!(error = %e, "failed to build escalation message");
            }
        }
    }
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("registered_bots", &self.registry.len())
            .field("conversations", &self.conversations.len())
            .field("active_invocations", &self.runtime.active_count())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
