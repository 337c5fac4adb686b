//! Messaging domain types for mergebot.
//!
//! Defines the immutable `Message` unit of communication, the schema-tagged
//! `StructuredPayload`, and the `MessageDraft` builder that enforces the
//! non-empty invariant (a message carries natural-language text, a
//! structured payload, or both -- never neither).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// A schema-tagged key-value payload attached to a message.
///
/// The `schema` tag names one of a bot's declared input schemas; the
/// dispatcher uses it to route structured messages and to decide the
/// delivery mode (structured consumption vs natural-language fallback).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StructuredPayload {
    /// Name of the schema this payload conforms to.
    pub schema: String,
    /// Payload fields.
    pub fields: serde_json::Map<String, serde_json::Value>,
}

impl StructuredPayload {
    /// Build a payload from a schema name and a JSON object.
    ///
    /// Non-object values are wrapped under a `"value"` key so the payload
    /// stays a key-value mapping.
    pub fn new(schema: impl Into<String>, value: serde_json::Value) -> Self {
        let fields = match value {
            serde_json::Value::Object(map) => map,
            other => {
                let mut map = serde_json::Map::new();
                map.insert("value".to_string(), other);
                map
            }
        };
        Self {
            schema: schema.into(),
            fields,
        }
    }

    /// Look up a field by name.
    pub fn field(&self, name: &str) -> Option<&serde_json::Value> {
        self.fields.get(name)
    }
}

/// An immutable message within a conversation.
///
/// Messages are created through [`MessageDraft`] and never mutated after
/// the conversation log assigns their sequence position. At least one of
/// `text` / `payload` is always present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// UUIDv7 message ID.
    pub id: Uuid,
    /// Conversation this message belongs to.
    pub conversation_id: Uuid,
    /// ID of the sending participant.
    pub sender: Uuid,
    /// Display name of the sender (denormalized).
    pub sender_name: String,
    /// Natural-language text, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Structured payload, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<StructuredPayload>,
    /// Explicit addressee (bot identity alias) for direct addressing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub addressee: Option<String>,
    /// Whether this message must be routed to the human owner of the
    /// top-level conversation.
    #[serde(default)]
    pub user_facing: bool,
    /// Invocation ID correlating a user-interposition exchange.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<Uuid>,
    /// Optional back-reference to a previous message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_reply_to: Option<Uuid>,
    /// When the message was created.
    pub created_at: DateTime<Utc>,
    /// Sequence position within the conversation, assigned on append.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,
}

/// Error building a message.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MessageError {
    /// Neither text nor payload was supplied.
    #[error("message carries neither text nor a structured payload")]
    EmptyMessage,
}

/// Builder for a [`Message`].
///
/// The only way to construct a message; `build` rejects drafts that carry
/// neither text nor a structured payload.
#[derive(Debug, Clone, Default)]
pub struct MessageDraft {
    text: Option<String>,
    payload: Option<StructuredPayload>,
    addressee: Option<String>,
    user_facing: bool,
    correlation_id: Option<Uuid>,
    in_reply_to: Option<Uuid>,
}

impl MessageDraft {
    /// Start a draft with natural-language text.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }

    /// Start a draft with a structured payload.
    pub fn payload(payload: StructuredPayload) -> Self {
        Self {
            payload: Some(payload),
            ..Self::default()
        }
    }

    /// Attach a structured payload to the draft.
    pub fn with_payload(mut self, payload: StructuredPayload) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Attach natural-language text to the draft.
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    /// Address the message to a bot identity explicitly.
    pub fn to(mut self, identity: impl Into<String>) -> Self {
        self.addressee = Some(identity.into());
        self
    }

    /// Mark the message as user-facing.
    pub fn user_facing(mut self) -> Self {
        self.user_facing = true;
        self
    }

    /// Correlate the message with an invocation (user-interposition reply).
    pub fn correlated_with(mut self, invocation_id: Uuid) -> Self {
        self.correlation_id = Some(invocation_id);
        self
    }

    /// Reference the message this one replies to.
    pub fn in_reply_to(mut self, message_id: Uuid) -> Self {
        self.in_reply_to = Some(message_id);
        self
    }

    /// The reply target set on the draft, if any.
    pub fn reply_to(&self) -> Option<Uuid> {
        self.in_reply_to
    }

    /// Finalize the draft into an immutable message.
    ///
    /// # Errors
    ///
    /// Returns [`MessageError::EmptyMessage`] if the draft carries neither
    /// text nor a payload.
    pub fn build(
        self,
        conversation_id: Uuid,
        sender: Uuid,
        sender_name: impl Into<String>,
    ) -> Result<Message, MessageError> {
        if self.text.is_none() && self.payload.is_none() {
            return Err(MessageError::EmptyMessage);
        }
        Ok(Message {
            id: Uuid::now_v7(),
            conversation_id,
            sender,
            sender_name: sender_name.into(),
            text: self.text,
            payload: self.payload,
            addressee: self.addressee,
            user_facing: self.user_facing,
            correlation_id: self.correlation_id,
            in_reply_to: self.in_reply_to,
            created_at: Utc::now(),
            seq: None,
        })
    }
}

impl Message {
    /// The draft's explicit addressee, if any.
    pub fn explicit_addressee(&self) -> Option<&str> {
        self.addressee.as_deref()
    }

    /// Whether this message is a reply within a user-interposition exchange.
    pub fn is_interposition_reply(&self) -> bool {
        self.correlation_id.is_some() && !self.user_facing
    }
}
