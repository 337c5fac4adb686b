//! Addressee resolution.
//!
//! Given an inbound message, decide which registered bot must be invoked
//! and in which input mode. Three addressing modes, tried in order:
//!
//! 1. **Explicit** -- the message names a target bot identity.
//! 2. **Structured** -- the payload's schema tag is declared by exactly one
//!    registered bot.
//! 3. **Natural language** -- the external classifier ranks registered
//!    capability tags against the message text; equal-confidence ties
//!    resolve to the most recently successful bot for the capability, else
//!    the resolution fails with `AmbiguousAddressee`.
//!
//! Resolving the input mode (structured consumption vs natural-language
//! fallback) is also done here, so the bot never has to decide.

use std::sync::Arc;

use mergebot_types::config::CoordinatorConfig;
use mergebot_types::error::DispatchError;
use mergebot_types::message::Message;
use tracing::debug;

use crate::registry::{BotRegistry, RegisteredBot};

use super::classifier::BoxIntentClassifier;
use super::recency::RecencyTracker;

/// How the selected bot will consume the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    /// The payload matches one of the bot's declared input schemas.
    Structured,
    /// Structured fields are absent (or undeclared); the bot interprets
    /// the natural-language text.
    NaturalLanguage,
}

/// Outcome of addressee resolution.
#[derive(Debug, Clone)]
pub struct Resolution {
    /// The selected bot.
    pub bot: Arc<RegisteredBot>,
    /// How the bot will consume the message.
    pub mode: InputMode,
    /// The capability tag the selection was based on, when the message was
    /// routed by classified intent.
    pub matched_capability: Option<String>,
}

/// Resolve the addressee for an inbound message.
pub async fn resolve(
    registry: &BotRegistry,
    recency: &RecencyTracker,
    classifier: &BoxIntentClassifier,
    config: &CoordinatorConfig,
    msg: &Message,
) -> Result<Resolution, DispatchError> {
    // Mode 1: explicit structured addressing by identity.
    if let Some(identity) = msg.explicit_addressee() {
        let bot = registry
            .resolve(identity)
            .map_err(|_| DispatchError::UnknownAddressee(identity.to_string()))?;
        let mode = delivery_mode(&bot, msg)?;
        debug!(addressee = identity, ?mode, "resolved explicit addressee");
        return Ok(Resolution {
            bot,
            mode,
            matched_capability: None,
        });
    }

    // Mode 2: implicit structured addressing by declared schema.
    if let Some(payload) = &msg.payload {
        let mut consumers = registry.schema_consumers(&payload.schema);
        match consumers.len() {
            1 => {
                let bot = consumers.remove(0);
                debug!(
                    schema = %payload.schema,
                    bot = %bot.descriptor.identity,
                    "resolved addressee by payload schema"
                );
                return Ok(Resolution {
                    bot,
                    mode: InputMode::Structured,
                    matched_capability: None,
                });
            }
            0 => {
                // No declared consumer: fall through to natural language
                // if the message carries text.
                if msg.text.is_none() {
                    return Err(DispatchError::NoAddressee);
                }
            }
            _ => {
                return Err(DispatchError::AmbiguousAddressee {
                    capability: payload.schema.clone(),
                    candidates: consumers
                        .iter()
                        .map(|b| b.descriptor.identity.clone())
                        .collect(),
                });
            }
        }
    }

    // Mode 3: natural-language addressing via the external classifier.
    let Some(text) = msg.text.as_deref() else {
        return Err(DispatchError::NoAddressee);
    };
    let tags = registry.capability_tags();
    if tags.is_empty() {
        return Err(DispatchError::NoAddressee);
    }

    let mut ranked = classifier
        .classify(text, &tags)
        .await
        .map_err(|e| DispatchError::Classifier(e.to_string()))?;
    if ranked.is_empty() {
        return Err(DispatchError::NoAddressee);
    }

    // Keep only tags that are actually registered, best first. Sort is
    // stable with a lexicographic secondary key for determinism.
    ranked.retain(|r| tags.iter().any(|t| t == &r.tag));
    ranked.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.tag.cmp(&b.tag))
    });
    let Some(top) = ranked.first().cloned() else {
        return Err(DispatchError::NoAddressee);
    };

    // Everything within `tie_epsilon` of the top confidence is a tie.
    let winner_tags: Vec<String> = ranked
        .iter()
        .take_while(|r| (top.confidence - r.confidence).abs() <= config.tie_epsilon)
        .map(|r| r.tag.clone())
        .collect();

    // Candidate bots: everyone advertising a winning tag, deduplicated,
    // identity-sorted for determinism.
    let mut candidates: Vec<Arc<RegisteredBot>> = Vec::new();
    for tag in &winner_tags {
        for bot in registry.find_by_capability(tag) {
            if !candidates.iter().any(|c| c.descriptor.id == bot.descriptor.id) {
                candidates.push(bot);
            }
        }
    }
    candidates.sort_by(|a, b| a.descriptor.identity.cmp(&b.descriptor.identity));

    let bot = match candidates.len() {
        0 => return Err(DispatchError::NoAddressee),
        1 => candidates.remove(0),
        _ => {
            // Recency bias: prefer the most recently successful candidate.
            let ids: Vec<_> = candidates.iter().map(|c| c.descriptor.id).collect();
            let winner = recency
                .most_recent_of(&winner_tags, &ids)
                .and_then(|winner_id| {
                    candidates.iter().position(|c| c.descriptor.id == winner_id)
                });
            match winner {
                Some(idx) => candidates.remove(idx),
                None => {
                    return Err(DispatchError::AmbiguousAddressee {
                        capability: top.tag,
                        candidates: candidates
                            .iter()
                            .map(|c| c.descriptor.identity.clone())
                            .collect(),
                    });
                }
            }
        }
    };

    let mode = delivery_mode(&bot, msg)?;
    debug!(
        bot = %bot.descriptor.identity,
        capability = %top.tag,
        confidence = top.confidence,
        ?mode,
        "resolved addressee by classified intent"
    );
    Ok(Resolution {
        bot,
        mode,
        matched_capability: Some(top.tag),
    })
}

/// Decide how the selected bot consumes the message: structured when the
/// payload matches a declared schema, natural-language fallback otherwise.
fn delivery_mode(bot: &RegisteredBot, msg: &Message) -> Result<InputMode, DispatchError> {
    if let Some(payload) = &msg.payload
        && bot.descriptor.accepts_schema(&payload.schema)
    {
        return Ok(InputMode::Structured);
    }
    if msg.text.is_some() {
        return Ok(InputMode::NaturalLanguage);
    }
    Err(DispatchError::NoDeliveryMode(
        bot.descriptor.identity.clone(),
    ))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::boxed::BoxBotHandler;
    use crate::handler::{HandlerError, handler_fn};
    use crate::route::classifier::{ClassifierError, IntentClassifier, RankedIntent};
    use mergebot_types::bot::{BotDescriptor, InputSchema};
    use mergebot_types::message::{MessageDraft, StructuredPayload};
    use serde_json::json;
    use uuid::Uuid;

    fn noop_handler() -> BoxBotHandler {
        BoxBotHandler::new(handler_fn(|_ctx| async { Ok::<(), HandlerError>(()) }))
    }

    /// Classifier ranking tags by a fixed table; unknown tags score zero.
    struct TableClassifier(Vec<(&'static str, f64)>);

    impl IntentClassifier for TableClassifier {
        async fn classify(
            &self,
            _text: &str,
            candidate_tags: &[String],
        ) -> Result<Vec<RankedIntent>, ClassifierError> {
            Ok(self
                .0
                .iter()
                .filter(|(tag, _)| candidate_tags.iter().any(|t| t == tag))
                .map(|(tag, conf)| RankedIntent::new(*tag, *conf))
                .collect())
        }
    }

    fn registry_with(bots: Vec<BotDescriptor>) -> BotRegistry {
        let registry = BotRegistry::new();
        for desc in bots {
            registry.register(desc, noop_handler()).unwrap();
        }
        registry
    }

    fn text_message(text: &str) -> Message {
        MessageDraft::text(text)
            .build(Uuid::now_v7(), Uuid::now_v7(), "alice")
            .unwrap()
    }

    #[tokio::test]
    async fn explicit_addressing_skips_classification() {
        let registry = registry_with(vec![
            BotDescriptor::new("read-file").with_input_schema(InputSchema::new(
                "read-file.v1",
                json!({"type": "object"}),
            )),
        ]);
        let recency = RecencyTracker::new();
        // A classifier that would fail loudly if consulted.
        struct Panicking;
        impl IntentClassifier for Panicking {
            async fn classify(
                &self,
                _text: &str,
                _tags: &[String],
            ) -> Result<Vec<RankedIntent>, ClassifierError> {
                Err(ClassifierError("classifier must not be invoked".into()))
            }
        }
        let classifier = BoxIntentClassifier::new(Panicking);
        let config = CoordinatorConfig::default();

        let msg = MessageDraft::payload(StructuredPayload::new(
            "read-file.v1",
            json!({"filename": "src/main.py"}),
        ))
        .to("read-file")
        .build(Uuid::now_v7(), Uuid::now_v7(), "alice")
        .unwrap();

        let resolution = resolve(&registry, &recency, &classifier, &config, &msg)
            .await
            .unwrap();
        assert_eq!(resolution.bot.descriptor.identity, "read-file");
        assert_eq!(resolution.mode, InputMode::Structured);
        assert!(resolution.matched_capability.is_none());
    }

    #[tokio::test]
    async fn explicit_unknown_identity_fails() {
        let registry = registry_with(vec![]);
        let recency = RecencyTracker::new();
        let classifier = BoxIntentClassifier::new(super::super::classifier::NullClassifier);
        let config = CoordinatorConfig::default();

        let msg = MessageDraft::text("hi")
            .to("ghost")
            .build(Uuid::now_v7(), Uuid::now_v7(), "alice")
            .unwrap();

        let result = resolve(&registry, &recency, &classifier, &config, &msg).await;
        assert!(matches!(result, Err(DispatchError::UnknownAddressee(id)) if id == "ghost"));
    }

    #[tokio::test]
    async fn unique_schema_consumer_resolves_without_classifier() {
        let registry = registry_with(vec![
            BotDescriptor::new("read-file").with_input_schema(InputSchema::new(
                "read-file.v1",
                json!({"type": "object"}),
            )),
            BotDescriptor::new("other"),
        ]);
        let recency = RecencyTracker::new();
        let classifier = BoxIntentClassifier::new(super::super::classifier::NullClassifier);
        let config = CoordinatorConfig::default();

        let msg = MessageDraft::payload(StructuredPayload::new(
            "read-file.v1",
            json!({"filename": "a.rs"}),
        ))
        .build(Uuid::now_v7(), Uuid::now_v7(), "alice")
        .unwrap();

        let resolution = resolve(&registry, &recency, &classifier, &config, &msg)
            .await
            .unwrap();
        assert_eq!(resolution.bot.descriptor.identity, "read-file");
        assert_eq!(resolution.mode, InputMode::Structured);
    }

    #[tokio::test]
    async fn multiple_schema_consumers_are_ambiguous() {
        let schema = InputSchema::new("shared.v1", json!({"type": "object"}));
        let registry = registry_with(vec![
            BotDescriptor::new("a").with_input_schema(schema.clone()),
            BotDescriptor::new("b").with_input_schema(schema),
        ]);
        let recency = RecencyTracker::new();
        let classifier = BoxIntentClassifier::new(super::super::classifier::NullClassifier);
        let config = CoordinatorConfig::default();

        let msg = MessageDraft::payload(StructuredPayload::new("shared.v1", json!({})))
            .build(Uuid::now_v7(), Uuid::now_v7(), "alice")
            .unwrap();

        let result = resolve(&registry, &recency, &classifier, &config, &msg).await;
        assert!(matches!(
            result,
            Err(DispatchError::AmbiguousAddressee { capability, .. }) if capability == "shared.v1"
        ));
    }

    #[tokio::test]
    async fn classified_single_winner_resolves() {
        let registry = registry_with(vec![
            BotDescriptor::new("read-file").with_capability("file-access"),
            BotDescriptor::new("calc").with_capability("math"),
        ]);
        let recency = RecencyTracker::new();
        let classifier =
            BoxIntentClassifier::new(TableClassifier(vec![("file-access", 0.9), ("math", 0.2)]));
        let config = CoordinatorConfig::default();

        let resolution = resolve(
            &registry,
            &recency,
            &classifier,
            &config,
            &text_message("show me the main module"),
        )
        .await
        .unwrap();

        assert_eq!(resolution.bot.descriptor.identity, "read-file");
        assert_eq!(resolution.mode, InputMode::NaturalLanguage);
        assert_eq!(resolution.matched_capability.as_deref(), Some("file-access"));
    }

    #[tokio::test]
    async fn equal_confidence_tie_prefers_recent_success() {
        let reader = BotDescriptor::new("read-file").with_capability("file-access");
        let lister = BotDescriptor::new("list-files").with_capability("file-access");
        let recent_id = lister.id;
        let registry = registry_with(vec![reader, lister]);

        let recency = RecencyTracker::new();
        recency.record_success("file-access", recent_id);

        let classifier = BoxIntentClassifier::new(TableClassifier(vec![("file-access", 0.8)]));
        let config = CoordinatorConfig::default();

        let resolution = resolve(
            &registry,
            &recency,
            &classifier,
            &config,
            &text_message("show me the main module"),
        )
        .await
        .unwrap();

        assert_eq!(resolution.bot.descriptor.identity, "list-files");
    }

    #[tokio::test]
    async fn equal_confidence_tie_without_recency_is_ambiguous() {
        let registry = registry_with(vec![
            BotDescriptor::new("read-file").with_capability("file-access"),
            BotDescriptor::new("list-files").with_capability("file-access"),
        ]);
        let recency = RecencyTracker::new();
        let classifier = BoxIntentClassifier::new(TableClassifier(vec![("file-access", 0.8)]));
        let config = CoordinatorConfig::default();

        let result = resolve(
            &registry,
            &recency,
            &classifier,
            &config,
            &text_message("show me the main module"),
        )
        .await;

        match result {
            Err(DispatchError::AmbiguousAddressee {
                capability,
                candidates,
            }) => {
                assert_eq!(capability, "file-access");
                assert_eq!(candidates, vec!["list-files", "read-file"]);
            }
            other => panic!("expected AmbiguousAddressee, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn no_classifier_match_is_no_addressee() {
        let registry = registry_with(vec![
            BotDescriptor::new("read-file").with_capability("file-access"),
        ]);
        let recency = RecencyTracker::new();
        let classifier = BoxIntentClassifier::new(super::super::classifier::NullClassifier);
        let config = CoordinatorConfig::default();

        let result = resolve(
            &registry,
            &recency,
            &classifier,
            &config,
            &text_message("completely unrelated"),
        )
        .await;
        assert!(matches!(result, Err(DispatchError::NoAddressee)));
    }

    #[tokio::test]
    async fn payload_without_consumer_falls_back_to_text() {
        let registry = registry_with(vec![
            BotDescriptor::new("read-file").with_capability("file-access"),
        ]);
        let recency = RecencyTracker::new();
        let classifier = BoxIntentClassifier::new(TableClassifier(vec![("file-access", 0.7)]));
        let config = CoordinatorConfig::default();

        let msg = MessageDraft::text("open the config")
            .with_payload(StructuredPayload::new("undeclared.v1", json!({})))
            .build(Uuid::now_v7(), Uuid::now_v7(), "alice")
            .unwrap();

        let resolution = resolve(&registry, &recency, &classifier, &config, &msg)
            .await
            .unwrap();
        assert_eq!(resolution.bot.descriptor.identity, "read-file");
        // The bot never declared the schema, so it falls back to text.
        assert_eq!(resolution.mode, InputMode::NaturalLanguage);
    }

    #[tokio::test]
    async fn explicit_addressee_with_undeclared_payload_and_no_text_fails() {
        let registry = registry_with(vec![BotDescriptor::new("read-file")]);
        let recency = RecencyTracker::new();
        let classifier = BoxIntentClassifier::new(super::super::classifier::NullClassifier);
        let config = CoordinatorConfig::default();

        let msg = MessageDraft::payload(StructuredPayload::new("undeclared.v1", json!({})))
            .to("read-file")
            .build(Uuid::now_v7(), Uuid::now_v7(), "alice")
            .unwrap();

        let result = resolve(&registry, &recency, &classifier, &config, &msg).await;
        assert!(matches!(result, Err(DispatchError::NoDeliveryMode(id)) if id == "read-file"));
    }
}
