//! Core message and tool-result types carried inside protocol envelopes.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Free-form key/value bag attached to messages and tool results.
pub type Metadata = HashMap<String, Value>;

/// A single turn of conversation passed between agents.
///
/// `content` is intentionally untyped JSON so that agents can exchange
/// anything from plain text to structured tool-call payloads without the
/// fabric needing to understand the shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: Value,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn new(role: impl Into<String>, content: Value) -> Self {
        Self {
            role: role.into(),
            content,
            metadata: Metadata::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Outcome of invoking a tool, carried as the payload of a tool-call
/// response message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl ToolResult {
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            metadata: Metadata::new(),
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            metadata: Metadata::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn message_round_trips_through_json() {
        let msg = Message::new("user", json!({"text": "hello"}));
        let encoded = serde_json::to_string(&msg).unwrap();
        let decoded: Message = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn message_defaults_metadata_when_absent() {
        let decoded: Message = serde_json::from_str(
            r#"{"role":"user","content":"hi","timestamp":"2024-01-01T00:00:00Z"}"#,
        )
        .unwrap();
        assert!(decoded.metadata.is_empty());
    }

    #[test]
    fn tool_result_omits_none_fields_on_encode() {
        let result = ToolResult::ok(json!(42));
        let encoded = serde_json::to_value(&result).unwrap();
        assert!(encoded.get("error").is_none());
    }
}
