use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;

use super::status::MessageStatus;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextPart {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReasoningPart {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImagePart {
    pub image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourcePart {
    pub source_type: String,
    pub id: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilePart {
    pub data: String,
    pub mime_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataPart {
    pub name: String,
    pub data: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolInterrupt {
    #[serde(rename = "type")]
    pub kind: String,
    pub payload: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallPart {
    pub tool_call_id: String,
    pub tool_name: String,
    #[serde(default)]
    pub args: Value,
    /// Serialized (possibly still streaming) form of `args`
    #[serde(default)]
    pub args_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<Value>,
    #[serde(default)]
    pub is_error: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interrupt: Option<ToolInterrupt>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<MessageStatus>,
}

impl ToolCallPart {
    pub fn new<I: Into<String>, N: Into<String>>(tool_call_id: I, tool_name: N, args: Value) -> Self {
        ToolCallPart {
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            args_text: args.to_string(),
            args,
            result: None,
            artifact: None,
            is_error: false,
            interrupt: None,
            status: None,
        }
    }

    pub fn with_result(mut self, result: Value) -> Self {
        self.result = Some(result);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
/// A single typed part of a message's content
pub enum MessagePart {
    Text(TextPart),
    Reasoning(ReasoningPart),
    ToolCall(ToolCallPart),
    Image(ImagePart),
    Source(SourcePart),
    File(FilePart),
    Data(DataPart),
}

impl MessagePart {
    pub fn text<S: Into<String>>(text: S) -> Self {
        MessagePart::Text(TextPart { text: text.into() })
    }

    pub fn reasoning<S: Into<String>>(text: S) -> Self {
        MessagePart::Reasoning(ReasoningPart { text: text.into() })
    }

    pub fn image<S: Into<String>>(image: S) -> Self {
        MessagePart::Image(ImagePart {
            image: image.into(),
            filename: None,
        })
    }

    pub fn tool_call<I: Into<String>, N: Into<String>>(id: I, name: N, args: Value) -> Self {
        MessagePart::ToolCall(ToolCallPart::new(id, name, args))
    }

    pub fn data<S: Into<String>>(name: S, data: Value) -> Self {
        MessagePart::Data(DataPart {
            name: name.into(),
            data,
        })
    }

    /// The wire name of this part's type
    pub fn part_type(&self) -> &'static str {
        match self {
            MessagePart::Text(_) => "text",
            MessagePart::Reasoning(_) => "reasoning",
            MessagePart::ToolCall(_) => "tool-call",
            MessagePart::Image(_) => "image",
            MessagePart::Source(_) => "source",
            MessagePart::File(_) => "file",
            MessagePart::Data(_) => "data",
        }
    }

    /// Get the text content if this is a Text variant
    pub fn as_text(&self) -> Option<&str> {
        match self {
            MessagePart::Text(text) => Some(&text.text),
            _ => None,
        }
    }

    pub fn as_tool_call(&self) -> Option<&ToolCallPart> {
        match self {
            MessagePart::ToolCall(call) => Some(call),
            _ => None,
        }
    }
}

/// Drop every tool-call part whose id was already seen earlier in `parts`
pub fn dedupe_tool_calls(parts: Vec<MessagePart>) -> Vec<MessagePart> {
    let mut seen = HashSet::new();
    parts
        .into_iter()
        .filter(|part| match part {
            MessagePart::ToolCall(call) => seen.insert(call.tool_call_id.clone()),
            _ => true,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_dedupe_keeps_first_tool_call() {
        let parts = vec![
            MessagePart::tool_call("call-1", "search", json!({"q": "first"})),
            MessagePart::text("between"),
            MessagePart::tool_call("call-1", "search", json!({"q": "second"})),
            MessagePart::tool_call("call-2", "fetch", json!({})),
        ];

        let deduped = dedupe_tool_calls(parts);
        assert_eq!(deduped.len(), 3);
        let first = deduped[0].as_tool_call().unwrap();
        assert_eq!(first.args, json!({"q": "first"}));
        assert_eq!(deduped[2].as_tool_call().unwrap().tool_call_id, "call-2");
    }

    #[test]
    fn test_part_serialization_tags() -> anyhow::Result<()> {
        let part = MessagePart::tool_call("call-1", "search", json!({"q": "rust"}));
        let value = serde_json::to_value(&part)?;
        assert_eq!(value["type"], "tool-call");
        assert_eq!(value["toolCallId"], "call-1");
        assert_eq!(value["argsText"], r#"{"q":"rust"}"#);
        assert!(value.get("result").is_none());

        let parsed: MessagePart = serde_json::from_value(json!({"type": "text", "text": "hi"}))?;
        assert_eq!(parsed.as_text(), Some("hi"));
        Ok(())
    }
}
