use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::content::{MessagePart, ToolCallPart};
use super::role::Role;
use super::status::MessageStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentKind {
    Image,
    Document,
    File,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: AttachmentKind,
    pub name: String,
    pub content_type: String,
    #[serde(default)]
    pub content: Vec<MessagePart>,
}

/// Client-side streaming measurements attached to assistant messages
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MessageTiming {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_start_time: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_token_time: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_stream_time: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens_per_second: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_chunks: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_count: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MessageMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub annotations: Vec<Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub data: Vec<Value>,
    /// Per-step records of a multi-step run; each may carry a `usage` bag
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<Value>,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub custom: Map<String, Value>,
    /// Loosely typed token usage as reported upstream
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timing: Option<MessageTiming>,
}

impl MessageMetadata {
    /// Fold a later output's metadata into this one.
    ///
    /// Annotations, data and steps accumulate; `custom` is shallow-merged with
    /// later keys winning; `state`, `usage` and `timing` are replaced when present.
    pub fn merge(&mut self, other: &MessageMetadata) {
        if other.state.is_some() {
            self.state = other.state.clone();
        }
        self.annotations.extend(other.annotations.iter().cloned());
        self.data.extend(other.data.iter().cloned());
        self.steps.extend(other.steps.iter().cloned());
        for (key, value) in &other.custom {
            self.custom.insert(key.clone(), value.clone());
        }
        if other.usage.is_some() {
            self.usage = other.usage.clone();
        }
        if other.timing.is_some() {
            self.timing = other.timing.clone();
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// A canonical message in a thread
pub struct Message {
    pub id: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
    pub content: Vec<MessagePart>,
    pub status: MessageStatus,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub metadata: MessageMetadata,
}

impl Message {
    /// Create an empty, complete message with the current timestamp
    pub fn new<S: Into<String>>(id: S, role: Role) -> Self {
        Message {
            id: id.into(),
            role,
            created_at: Utc::now(),
            content: Vec::new(),
            status: MessageStatus::AUTO_COMPLETE,
            attachments: Vec::new(),
            metadata: MessageMetadata::default(),
        }
    }

    pub fn user<S: Into<String>>(id: S) -> Self {
        Self::new(id, Role::User)
    }

    pub fn assistant<S: Into<String>>(id: S) -> Self {
        Self::new(id, Role::Assistant)
    }

    pub fn system<S: Into<String>>(id: S) -> Self {
        Self::new(id, Role::System)
    }

    /// Add any MessagePart to the message
    pub fn with_content(mut self, part: MessagePart) -> Self {
        self.content.push(part);
        self
    }

    /// Add text content to the message
    pub fn with_text<S: Into<String>>(self, text: S) -> Self {
        self.with_content(MessagePart::text(text))
    }

    pub fn with_status(mut self, status: MessageStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_metadata(mut self, metadata: MessageMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// All text parts joined by blank lines
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|part| part.as_text())
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    pub fn tool_calls(&self) -> impl Iterator<Item = &ToolCallPart> {
        self.content.iter().filter_map(|part| part.as_tool_call())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_text_joins_text_parts() {
        let message = Message::assistant("m-1")
            .with_text("Hello")
            .with_content(MessagePart::tool_call("c-1", "search", json!({})))
            .with_text("World");
        assert_eq!(message.text(), "Hello\n\nWorld");
        assert_eq!(message.tool_calls().count(), 1);
    }

    #[test]
    fn test_metadata_merge() {
        let mut first = MessageMetadata {
            annotations: vec![json!("a")],
            custom: serde_json::from_value(json!({"model": "gpt-4o", "speaker": "one"})).unwrap(),
            ..Default::default()
        };
        let second = MessageMetadata {
            annotations: vec![json!("b")],
            data: vec![json!({"kind": "chart"})],
            custom: serde_json::from_value(json!({"speaker": "two"})).unwrap(),
            ..Default::default()
        };

        first.merge(&second);
        assert_eq!(first.annotations, vec![json!("a"), json!("b")]);
        assert_eq!(first.data.len(), 1);
        assert_eq!(first.custom["model"], "gpt-4o");
        assert_eq!(first.custom["speaker"], "two");
    }

    #[test]
    fn test_serialization() -> anyhow::Result<()> {
        let message = Message::user("u-1").with_text("Hello, world!");
        let serialized = serde_json::to_string(&message)?;
        let deserialized: Message = serde_json::from_str(&serialized)?;
        assert_eq!(message, deserialized);

        let value: Value = serde_json::from_str(&serialized)?;
        assert_eq!(value["role"], "user");
        assert!(value.get("createdAt").is_some());
        assert!(value.get("attachments").is_none());
        Ok(())
    }
}
