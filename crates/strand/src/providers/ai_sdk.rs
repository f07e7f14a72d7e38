use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::warn;

use crate::errors::ConversionError;
use crate::external_store::{ConvertMessageFn, ConvertedMessage};
use crate::models::content::{
    dedupe_tool_calls, DataPart, FilePart, ImagePart, MessagePart, SourcePart, ToolCallPart,
    ToolInterrupt,
};
use crate::models::message::{Attachment, AttachmentKind, MessageMetadata, MessageTiming};
use crate::models::message_like::MessageLike;
use crate::models::role::Role;
use crate::models::status::{ActionReason, MessageStatus};

/// A message as produced by the vercel ai sdk `useChat` hook
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UiMessage {
    pub id: String,
    pub role: String,
    #[serde(default)]
    pub parts: Vec<UiPart>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl UiMessage {
    pub fn new<I: Into<String>, R: Into<String>>(id: I, role: R) -> Self {
        UiMessage {
            id: id.into(),
            role: role.into(),
            parts: Vec::new(),
            metadata: None,
        }
    }

    pub fn with_part(mut self, part: UiPart) -> Self {
        self.parts.push(part);
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn is_assistant(&self) -> bool {
        self.role == "assistant"
    }
}

/// One part of a [`UiMessage`].
///
/// Part types are open ended (`tool-<name>`, `data-<name>`), so every field a
/// known part type may carry is optional and `kind` decides which ones apply.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UiPart {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl UiPart {
    pub fn new<S: Into<String>>(kind: S) -> Self {
        UiPart {
            kind: kind.into(),
            ..Default::default()
        }
    }

    pub fn text<S: Into<String>>(text: S) -> Self {
        UiPart {
            text: Some(text.into()),
            ..UiPart::new("text")
        }
    }

    /// A `tool-<name>` part in the given state
    pub fn tool<N: Into<String>, I: Into<String>>(tool_name: N, tool_call_id: I, state: &str) -> Self {
        UiPart {
            tool_call_id: Some(tool_call_id.into()),
            state: Some(state.to_string()),
            ..UiPart::new(format!("tool-{}", tool_name.into()))
        }
    }

    pub fn with_input(mut self, input: Value) -> Self {
        self.input = Some(input);
        self
    }

    pub fn with_output(mut self, output: Value) -> Self {
        self.output = Some(output);
        self
    }

    pub fn is_tool(&self) -> bool {
        self.kind == "dynamic-tool" || self.kind.starts_with("tool-")
    }

    /// `toolName` for dynamic tools, else the suffix of `tool-<name>`
    pub fn tool_name(&self) -> Option<&str> {
        if self.kind == "dynamic-tool" {
            return self.tool_name.as_deref();
        }
        self.kind.strip_prefix("tool-")
    }

    fn state_is(&self, state: &str) -> bool {
        self.state.as_deref() == Some(state)
    }
}

/// Key orders seen so far for one tool call, keyed by JSON path
type KeyOrders = HashMap<String, Vec<String>>;

#[derive(Default)]
struct ConverterState {
    key_orders: HashMap<String, KeyOrders>,
    timings: HashMap<String, MessageTiming>,
    interrupts: HashMap<String, ToolInterrupt>,
}

/// Converts [`UiMessage`]s into message-likes.
///
/// The converter remembers the order in which streamed tool argument keys
/// first appeared, so `args_text` only ever grows at the end while the
/// arguments are still streaming.
#[derive(Default)]
pub struct AiSdkMessageConverter {
    state: Mutex<ConverterState>,
}

impl AiSdkMessageConverter {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, ConverterState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Streaming measurements merged into the metadata of message `message_id`
    pub fn set_message_timing<S: Into<String>>(&self, message_id: S, timing: MessageTiming) {
        self.state().timings.insert(message_id.into(), timing);
    }

    /// Marks a tool call as waiting on a human decision
    pub fn set_tool_interrupt<S: Into<String>>(&self, tool_call_id: S, interrupt: ToolInterrupt) {
        self.state().interrupts.insert(tool_call_id.into(), interrupt);
    }

    pub fn clear_tool_interrupt(&self, tool_call_id: &str) {
        self.state().interrupts.remove(tool_call_id);
    }

    pub fn convert_message(&self, message: &UiMessage) -> Result<MessageLike, ConversionError> {
        let role = match message.role.as_str() {
            "user" => Role::User,
            "assistant" => Role::Assistant,
            "system" => Role::System,
            other => return Err(ConversionError::UnknownRole(other.to_string())),
        };

        let content = self.convert_parts(message);
        let mut metadata = parse_metadata(message);

        let mut like = MessageLike::new(role).with_id(&message.id);
        like.created_at = Some(Utc::now());
        like.content = content;

        match role {
            Role::User => {
                like.attachments = file_attachments(&message.parts);
            }
            Role::System | Role::Assistant => {
                if let Some(timing) = self.state().timings.get(&message.id) {
                    metadata.timing = Some(timing.clone());
                }
            }
        }
        like.metadata = metadata;
        Ok(like)
    }

    /// A conversion function for an external store holding [`UiMessage`]s
    pub fn store_converter(self: &Arc<Self>) -> ConvertMessageFn<UiMessage> {
        let converter = Arc::clone(self);
        Arc::new(move |message: &Arc<UiMessage>, _index: usize| {
            converter
                .convert_message(message)
                .map(ConvertedMessage::Like)
        })
    }

    fn convert_parts(&self, message: &UiMessage) -> Vec<MessagePart> {
        let converted = message
            .parts
            .iter()
            .filter(|part| part.kind != "step-start" && part.kind != "file")
            .filter_map(|part| self.convert_part(&message.id, part))
            .collect();
        dedupe_tool_calls(converted)
    }

    fn convert_part(&self, message_id: &str, part: &UiPart) -> Option<MessagePart> {
        match part.kind.as_str() {
            "text" => Some(MessagePart::text(part.text.clone().unwrap_or_default())),
            "reasoning" => Some(MessagePart::reasoning(part.text.clone().unwrap_or_default())),
            _ if part.is_tool() => self.convert_tool_part(message_id, part),
            "source-url" => Some(MessagePart::Source(SourcePart {
                source_type: "url".to_string(),
                id: part.source_id.clone().unwrap_or_default(),
                url: part.url.clone().unwrap_or_default(),
                title: Some(part.title.clone().unwrap_or_default()),
            })),
            "source-document" => {
                warn!("Source document parts are not yet supported in conversion");
                None
            }
            kind => match kind.strip_prefix("data-") {
                Some(name) => Some(MessagePart::Data(DataPart {
                    name: name.to_string(),
                    data: part.data.clone().unwrap_or(Value::Null),
                })),
                None => {
                    warn!(part_type = kind, "Unsupported message part type");
                    None
                }
            },
        }
    }

    fn convert_tool_part(&self, message_id: &str, part: &UiPart) -> Option<MessagePart> {
        let (Some(tool_name), Some(tool_call_id)) = (part.tool_name(), part.tool_call_id.as_deref())
        else {
            warn!(part_type = %part.kind, "Tool part without a tool name or call id");
            return None;
        };

        let args = match &part.input {
            Some(input) if !input.is_null() => input.clone(),
            _ => json!({}),
        };

        let (result, is_error) = match part.state.as_deref() {
            Some("output-available") => (part.output.clone(), false),
            Some("output-error") => (Some(json!({ "error": part.error_text })), true),
            Some("output-denied") => {
                let reason = part
                    .approval
                    .as_ref()
                    .and_then(|approval| approval.get("reason"))
                    .and_then(Value::as_str)
                    .filter(|reason| !reason.is_empty())
                    .unwrap_or("Tool approval denied");
                (Some(json!({ "error": reason })), true)
            }
            _ => (None, false),
        };

        let cache_key = format!("{}:{}", message_id, tool_call_id);
        let mut state = self.state();
        let orders = state.key_orders.entry(cache_key.clone()).or_default();
        let mut args_text = stabilize_key_order(&args, "$", orders).to_string();
        if part.state_is("input-streaming") {
            // the sdk closes partial json before handing it out
            args_text = strip_closing_delimiters(&args_text).to_string();
        } else {
            state.key_orders.remove(&cache_key);
        }

        let (interrupt, status) = if part.state_is("approval-requested") && part.approval.is_some() {
            let interrupt = ToolInterrupt {
                kind: "human".to_string(),
                payload: part.approval.clone().unwrap_or(Value::Null),
            };
            (Some(interrupt), Some(requires_interrupt()))
        } else if let Some(interrupt) = state.interrupts.get(tool_call_id) {
            (Some(interrupt.clone()), Some(requires_interrupt()))
        } else {
            (None, None)
        };

        Some(MessagePart::ToolCall(ToolCallPart {
            tool_call_id: tool_call_id.to_string(),
            tool_name: tool_name.to_string(),
            args,
            args_text,
            result,
            artifact: None,
            is_error,
            interrupt,
            status,
        }))
    }
}

fn requires_interrupt() -> MessageStatus {
    MessageStatus::RequiresAction {
        reason: ActionReason::Interrupt,
    }
}

fn strip_closing_delimiters(json: &str) -> &str {
    json.trim_end_matches(['}', ']', '"'])
}

/// Rebuild `value` so every object lists keys in the order they were first
/// seen at the same path, appending keys that are new this time.
fn stabilize_key_order(value: &Value, path: &str, orders: &mut KeyOrders) -> Value {
    match value {
        Value::Array(items) => Value::Array(
            items
                .iter()
                .enumerate()
                .map(|(idx, item)| stabilize_key_order(item, &format!("{}[{}]", path, idx), orders))
                .collect(),
        ),
        Value::Object(record) => {
            let previous = orders.remove(path).unwrap_or_default();
            let mut order: Vec<String> = previous
                .into_iter()
                .filter(|key| record.contains_key(key))
                .collect();
            for key in record.keys() {
                if !order.contains(key) {
                    order.push(key.clone());
                }
            }

            let mut stable = Map::new();
            for key in &order {
                if let Some(child) = record.get(key) {
                    let child_path = format!("{}.{}", path, key);
                    stable.insert(key.clone(), stabilize_key_order(child, &child_path, orders));
                }
            }
            orders.insert(path.to_string(), order);
            Value::Object(stable)
        }
        other => other.clone(),
    }
}

fn parse_metadata(message: &UiMessage) -> MessageMetadata {
    let Some(raw) = message.metadata.as_ref().filter(|raw| !raw.is_null()) else {
        return MessageMetadata::default();
    };
    serde_json::from_value(raw.clone()).unwrap_or_else(|err| {
        warn!(message_id = %message.id, error = %err, "Ignoring malformed message metadata");
        MessageMetadata::default()
    })
}

fn file_attachments(parts: &[UiPart]) -> Vec<Attachment> {
    parts
        .iter()
        .filter(|part| part.kind == "file")
        .enumerate()
        .map(|(idx, part)| {
            let media_type = part.media_type.clone();
            let is_image = media_type
                .as_deref()
                .is_some_and(|media_type| media_type.starts_with("image/"));
            let url = part.url.clone().unwrap_or_default();
            let content = if is_image {
                MessagePart::Image(ImagePart {
                    image: url,
                    filename: part.filename.clone(),
                })
            } else {
                MessagePart::File(FilePart {
                    data: url,
                    mime_type: media_type.clone().unwrap_or_default(),
                    filename: part.filename.clone(),
                })
            };
            Attachment {
                id: idx.to_string(),
                kind: if is_image {
                    AttachmentKind::Image
                } else {
                    AttachmentKind::File
                },
                name: part.filename.clone().unwrap_or_else(|| "file".to_string()),
                content_type: media_type.unwrap_or_else(|| "unknown/unknown".to_string()),
                content: vec![content],
            }
        })
        .collect()
}
