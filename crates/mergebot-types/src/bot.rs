//! Bot descriptor and capability declaration types.
//!
//! A `BotDescriptor` is what a bot registers with the engine: a unique
//! identity alias, the capability tags it advertises for natural-language
//! routing, and the input schemas it consumes for structured routing.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A declared input schema for structured message consumption.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InputSchema {
    /// Schema name, matched against `StructuredPayload::schema`.
    pub name: String,
    /// JSON Schema describing the accepted payload fields.
    pub schema: serde_json::Value,
}

impl InputSchema {
    /// Declare a schema by name with an explicit JSON Schema document.
    pub fn new(name: impl Into<String>, schema: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            schema,
        }
    }

    /// Derive a declared schema from a Rust type.
    pub fn of<T: JsonSchema>(name: impl Into<String>) -> Self {
        let schema = schemars::schema_for!(T);
        Self {
            name: name.into(),
            schema: serde_json::to_value(schema).unwrap_or(serde_json::Value::Null),
        }
    }
}

/// Registration-time description of a bot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotDescriptor {
    /// UUIDv7 bot ID, doubles as the bot's participant ID.
    pub id: Uuid,
    /// Unique identity alias used for explicit addressing (e.g. "read-file").
    pub identity: String,
    /// Display name.
    pub name: String,
    /// Optional human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Capability tags advertised for natural-language routing.
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// Input schemas accepted for structured routing.
    #[serde(default)]
    pub input_schemas: Vec<InputSchema>,
    /// When the descriptor was created.
    pub created_at: DateTime<Utc>,
}

impl BotDescriptor {
    /// Create a descriptor with a fresh UUIDv7. The display name defaults
    /// to the identity alias.
    pub fn new(identity: impl Into<String>) -> Self {
        let identity = identity.into();
        Self {
            id: Uuid::now_v7(),
            name: identity.clone(),
            identity,
            description: None,
            capabilities: Vec::new(),
            input_schemas: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// Set the display name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Advertise a capability tag.
    pub fn with_capability(mut self, tag: impl Into<String>) -> Self {
        self.capabilities.push(tag.into());
        self
    }

    /// Declare an accepted input schema.
    pub fn with_input_schema(mut self, schema: InputSchema) -> Self {
        self.input_schemas.push(schema);
        self
    }

    /// Whether this bot declares the given schema name.
    pub fn accepts_schema(&self, name: &str) -> bool {
        self.input_schemas.iter().any(|s| s.name == name)
    }

    /// Whether this bot advertises the given capability tag.
    pub fn has_capability(&self, tag: &str) -> bool {
        self.capabilities.iter().any(|c| c == tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(JsonSchema)]
    #[allow(dead_code)]
    struct ReadFileInput {
        filename: String,
    }

    #[test]
    fn builder_chain() {
        let desc = BotDescriptor::new("read-file")
            .with_name("Read File")
            .with_description("reads a file from the repo")
            .with_capability("file-access")
            .with_input_schema(InputSchema::new("read-file.v1", json!({"type": "object"})));

        assert_eq!(desc.identity, "read-file");
        assert_eq!(desc.name, "Read File");
        assert!(desc.has_capability("file-access"));
        assert!(desc.accepts_schema("read-file.v1"));
        assert!(!desc.accepts_schema("write-file.v1"));
    }

    #[test]
    fn name_defaults_to_identity() {
        let desc = BotDescriptor::new("echo");
        assert_eq!(desc.name, "echo");
    }

    #[test]
    fn schema_of_derives_json_schema() {
        let schema = InputSchema::of::<ReadFileInput>("read-file.v1");
        assert_eq!(schema.name, "read-file.v1");
        let props = schema
            .schema
            .get("properties")
            .and_then(|p| p.get("filename"));
        assert!(props.is_some());
    }
}
