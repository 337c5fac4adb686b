//! BoxBotHandler -- object-safe dynamic dispatch wrapper for BotHandler.
//!
//! Same blanket-impl pattern as elsewhere in the workspace:
//! 1. Define an object-safe `BotHandlerDyn` trait with boxed futures
//! 2. Blanket-impl `BotHandlerDyn` for all `T: BotHandler`
//! 3. `BoxBotHandler` wraps `Box<dyn BotHandlerDyn>` and delegates

use std::future::Future;
use std::pin::Pin;

use super::{BotHandler, HandlerError};
use crate::runtime::context::BotContext;

/// Object-safe version of [`BotHandler`] with boxed futures.
///
/// This trait exists solely to enable dynamic dispatch; a blanket
/// implementation covers every `BotHandler`.
pub trait BotHandlerDyn: Send + Sync {
    fn handle_boxed<'a>(
        &'a self,
        ctx: BotContext,
    ) -> Pin<Box<dyn Future<Output = Result<(), HandlerError>> + Send + 'a>>;
}

impl<T: BotHandler> BotHandlerDyn for T {
    fn handle_boxed<'a>(
        &'a self,
        ctx: BotContext,
    ) -> Pin<Box<dyn Future<Output = Result<(), HandlerError>> + Send + 'a>> {
        Box::pin(self.handle(ctx))
    }
}

/// Type-erased bot handler stored by the registry.
///
/// Since `BotHandler` uses RPITIT it cannot be a trait object directly;
/// `BoxBotHandler` provides an equivalent `handle` that delegates to the
/// inner `BotHandlerDyn` trait object.
pub struct BoxBotHandler {
    inner: Box<dyn BotHandlerDyn + Send + Sync>,
}

impl BoxBotHandler {
    /// Wrap a concrete handler in a type-erased box.
    pub fn new<T: BotHandler + 'static>(handler: T) -> Self {
        Self {
            inner: Box::new(handler),
        }
    }

    /// Execute one invocation.
    pub async fn handle(&self, ctx: BotContext) -> Result<(), HandlerError> {
        self.inner.handle_boxed(ctx).await
    }
}

impl std::fmt::Debug for BoxBotHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxBotHandler").finish_non_exhaustive()
    }
}
