//! Message routing and bot-coordination engine.
//!
//! mergebot lets independent narrow-skill bots share ordered conversations.
//! The engine accepts messages from any participant, resolves which
//! registered bot must handle them (explicit identity, declared payload
//! schema, or natural-language intent classification), runs bot handlers
//! as concurrent invocations, and lets any bot interpose itself directly
//! in front of the human user mid-invocation.
//!
//! Layout:
//! - `conversation` -- append-only per-conversation message logs and the
//!   conversation store
//! - `registry` -- the process-wide bot directory
//! - `handler` -- the `BotHandler` contract bots implement
//! - `route` -- addressee resolution: classifier contract, recency
//!   tie-breaking, pure resolution logic
//! - `runtime` -- live invocations, response streams, and the `BotContext`
//!   handed to handlers
//! - `outbound` -- broadcast feed of user-facing messages for adapters
//! - `coordinator` -- the facade tying everything together

pub mod conversation;
pub mod coordinator;
pub mod handler;
pub mod outbound;
pub mod registry;
pub mod route;
pub mod runtime;

pub use coordinator::{Coordinator, CoordinatorBuilder, InboundOutcome};
pub use handler::{BotHandler, HandlerError, handler_fn};
pub use route::classifier::{ClassifierError, IntentClassifier, RankedIntent};
pub use runtime::context::BotContext;
pub use runtime::invocation::{InvocationHandle, ResponseStream};
