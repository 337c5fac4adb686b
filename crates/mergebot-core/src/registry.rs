//! Process-wide bot directory.
//!
//! Bots register once at startup with a descriptor and a handler. The
//! registry is read-mostly: registration and deregistration are the only
//! writes, and insertion goes through the dashmap entry API with a fully
//! constructed `RegisteredBot`, so concurrent lookups never observe a
//! partially registered descriptor.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use mergebot_types::bot::BotDescriptor;
use mergebot_types::error::RegistryError;
use tracing::debug;
use uuid::Uuid;

use crate::handler::boxed::BoxBotHandler;

/// A registered bot: its descriptor coupled with its invocation handler.
pub struct RegisteredBot {
    pub descriptor: BotDescriptor,
    pub handler: BoxBotHandler,
}

impl std::fmt::Debug for RegisteredBot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredBot")
            .field("identity", &self.descriptor.identity)
            .field("capabilities", &self.descriptor.capabilities)
            .finish()
    }
}

/// Directory mapping bot identities to handlers and capability declarations.
pub struct BotRegistry {
    by_identity: DashMap<String, Arc<RegisteredBot>>,
    by_id: DashMap<Uuid, String>,
}

impl BotRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            by_identity: DashMap::new(),
            by_id: DashMap::new(),
        }
    }

    /// Register a bot.
    ///
    /// # Errors
    ///
    /// Fails with [`RegistryError::DuplicateIdentity`] when the identity
    /// alias is already taken.
    pub fn register(
        &self,
        descriptor: BotDescriptor,
        handler: BoxBotHandler,
    ) -> Result<(), RegistryError> {
        let identity = descriptor.identity.clone();
        let bot_id = descriptor.id;
        match self.by_identity.entry(identity.clone()) {
            Entry::Occupied(_) => Err(RegistryError::DuplicateIdentity(identity)),
            Entry::Vacant(entry) => {
                entry.insert(Arc::new(RegisteredBot {
                    descriptor,
                    handler,
                }));
                self.by_id.insert(bot_id, identity.clone());
                debug!(%identity, %bot_id, "registered bot");
                Ok(())
            }
        }
    }

    /// Look up a bot by identity alias.
    pub fn resolve(&self, identity: &str) -> Result<Arc<RegisteredBot>, RegistryError> {
        self.by_identity
            .get(identity)
            .map(|b| Arc::clone(&b))
            .ok_or_else(|| RegistryError::NotFound(identity.to_string()))
    }

    /// Look up a bot by its ID.
    pub fn resolve_by_id(&self, bot_id: &Uuid) -> Option<Arc<RegisteredBot>> {
        let identity = self.by_id.get(bot_id)?;
        self.by_identity.get(identity.as_str()).map(|b| Arc::clone(&b))
    }

    /// All bots advertising the given capability tag, sorted by identity
    /// for deterministic iteration.
    pub fn find_by_capability(&self, tag: &str) -> Vec<Arc<RegisteredBot>> {
        let mut bots: Vec<_> = self
            .by_identity
            .iter()
            .filter(|entry| entry.value().descriptor.has_capability(tag))
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        bots.sort_by(|a, b| a.descriptor.identity.cmp(&b.descriptor.identity));
        bots
    }

    /// All bots declaring the given input schema, sorted by identity.
    pub fn schema_consumers(&self, schema: &str) -> Vec<Arc<RegisteredBot>> {
        let mut bots: Vec<_> = self
            .by_identity
            .iter()
            .filter(|entry| entry.value().descriptor.accepts_schema(schema))
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        bots.sort_by(|a, b| a.descriptor.identity.cmp(&b.descriptor.identity));
        bots
    }

    /// Every distinct capability tag currently advertised, sorted.
    pub fn capability_tags(&self) -> Vec<String> {
        let mut tags: Vec<String> = self
            .by_identity
            .iter()
            .flat_map(|entry| entry.value().descriptor.capabilities.clone())
            .collect();
        tags.sort();
        tags.dedup();
        tags
    }

    /// Remove a bot from the registry. Returns `true` if it was present.
    pub fn deregister(&self, identity: &str) -> bool {
        if let Some((_, bot)) = self.by_identity.remove(identity) {
            self.by_id.remove(&bot.descriptor.id);
            debug!(%identity, "deregistered bot");
            true
        } else {
            false
        }
    }

    /// Number of registered bots.
    pub fn len(&self) -> usize {
        self.by_identity.len()
    }

    /// Whether no bots are registered.
    pub fn is_empty(&self) -> bool {
        self.by_identity.is_empty()
    }
}

impl Default for BotRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for BotRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BotRegistry")
            .field("registered_bots", &self.by_identity.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{HandlerError, handler_fn};

    fn noop_handler() -> BoxBotHandler {
        BoxBotHandler::new(handler_fn(|_ctx| async { Ok::<(), HandlerError>(()) }))
    }

    fn descriptor(identity: &str, capabilities: &[&str]) -> BotDescriptor {
        let mut desc = BotDescriptor::new(identity);
        for cap in capabilities {
            desc = desc.with_capability(*cap);
        }
        desc
    }

    #[test]
    fn register_then_resolve_round_trips() {
        let registry = BotRegistry::new();
        let desc = descriptor("read-file", &["file-access"]);
        let id = desc.id;
        registry.register(desc, noop_handler()).unwrap();

        let resolved = registry.resolve("read-file").unwrap();
        assert_eq!(resolved.descriptor.id, id);
        assert_eq!(registry.resolve_by_id(&id).unwrap().descriptor.identity, "read-file");
    }

    #[test]
    fn duplicate_identity_rejected() {
        let registry = BotRegistry::new();
        registry
            .register(descriptor("echo", &[]), noop_handler())
            .unwrap();
        let result = registry.register(descriptor("echo", &[]), noop_handler());
        assert!(matches!(result, Err(RegistryError::DuplicateIdentity(id)) if id == "echo"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn resolve_unknown_identity_fails() {
        let registry = BotRegistry::new();
        assert!(matches!(
            registry.resolve("ghost"),
            Err(RegistryError::NotFound(id)) if id == "ghost"
        ));
    }

    #[test]
    fn find_by_capability_sorted_and_filtered() {
        let registry = BotRegistry::new();
        registry
            .register(descriptor("zeta", &["file-access"]), noop_handler())
            .unwrap();
        registry
            .register(descriptor("alpha", &["file-access"]), noop_handler())
            .unwrap();
        registry
            .register(descriptor("other", &["math"]), noop_handler())
            .unwrap();

        let found = registry.find_by_capability("file-access");
        let identities: Vec<_> = found.iter().map(|b| b.descriptor.identity.as_str()).collect();
        assert_eq!(identities, vec!["alpha", "zeta"]);
    }

    #[test]
    fn capability_tags_deduplicated() {
        let registry = BotRegistry::new();
        registry
            .register(descriptor("a", &["x", "y"]), noop_handler())
            .unwrap();
        registry
            .register(descriptor("b", &["y", "z"]), noop_handler())
            .unwrap();
        assert_eq!(registry.capability_tags(), vec!["x", "y", "z"]);
    }

    #[test]
    fn deregister_frees_identity() {
        let registry = BotRegistry::new();
        let desc = descriptor("echo", &[]);
        let id = desc.id;
        registry.register(desc, noop_handler()).unwrap();

        assert!(registry.deregister("echo"));
        assert!(!registry.deregister("echo"));
        assert!(registry.resolve_by_id(&id).is_none());

        // Identity can be reused after deregistration.
        registry
            .register(descriptor("echo", &[]), noop_handler())
            .unwrap();
    }
}
