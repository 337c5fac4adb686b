//! The invocation contract bots implement.
//!
//! A bot handler receives a [`BotContext`] scoped to one invocation and may
//! emit zero or more messages (to other bots, to the user, or back to the
//! caller) before terminating. Uses native async fn in traits (RPITIT,
//! Rust 2024 edition); `boxed` provides the object-safe wrapper the
//! registry stores.

pub mod boxed;

use std::future::Future;

use crate::runtime::context::BotContext;

pub use boxed::BoxBotHandler;

/// Error returned by a bot handler.
///
/// Wraps the handler's underlying error and carries the retryable flag the
/// router consults: transient failures are retried with bounded attempts,
/// permanent ones are surfaced into the conversation immediately.
#[derive(Debug)]
pub struct HandlerError {
    source: anyhow::Error,
    retryable: bool,
}

impl HandlerError {
    /// A failure the router may retry (network hiccup, rate limit, ...).
    pub fn transient(source: impl Into<anyhow::Error>) -> Self {
        Self {
            source: source.into(),
            retryable: true,
        }
    }

    /// A failure retrying will not fix (bad input, missing file, ...).
    pub fn permanent(source: impl Into<anyhow::Error>) -> Self {
        Self {
            source: source.into(),
            retryable: false,
        }
    }

    /// Whether the router may retry the invocation.
    pub fn is_retryable(&self) -> bool {
        self.retryable
    }

    /// The underlying error.
    pub fn source(&self) -> &anyhow::Error {
        &self.source
    }
}

impl std::fmt::Display for HandlerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#}", self.source)
    }
}

impl std::error::Error for HandlerError {}

/// Errors without an explicit retryable marker are treated as permanent.
impl From<anyhow::Error> for HandlerError {
    fn from(source: anyhow::Error) -> Self {
        Self::permanent(source)
    }
}

/// Engine errors propagate out of handlers keeping their retryable flag,
/// so a transient delegated failure stays transient for the caller too.
impl From<mergebot_types::error::InvocationError> for HandlerError {
    fn from(source: mergebot_types::error::InvocationError) -> Self {
        let retryable = source.is_retryable();
        Self {
            source: anyhow::Error::new(source),
            retryable,
        }
    }
}

/// Trait for bot invocation handlers.
///
/// The handler owns the context for the duration of the invocation; it can
/// respond into the conversation, delegate to other bots, and interpose
/// itself in front of the user via `ctx.ask_user`. The incoming request is
/// available as `ctx.request()`.
pub trait BotHandler: Send + Sync {
    /// Execute one invocation.
    fn handle(&self, ctx: BotContext) -> impl Future<Output = Result<(), HandlerError>> + Send;
}

/// Adapter turning an async closure into a [`BotHandler`].
pub struct HandlerFn<F>(F);

impl<F, Fut> BotHandler for HandlerFn<F>
where
    F: Fn(BotContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send,
{
    fn handle(&self, ctx: BotContext) -> impl Future<Output = Result<(), HandlerError>> + Send {
        (self.0)(ctx)
    }
}

/// Wrap an async closure as a [`BotHandler`].
pub fn handler_fn<F, Fut>(f: F) -> HandlerFn<F>
where
    F: Fn(BotContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send,
{
    HandlerFn(f)
}
