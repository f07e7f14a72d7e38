use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::converter::{ExternalMessage, ToolResultMessage};
use crate::errors::ConversionError;
use crate::models::content::{MessagePart, ToolCallPart};
use crate::models::message::MessageMetadata;
use crate::models::message_like::MessageLike;
use crate::models::role::Role;
use crate::models::status::MessageStatus;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ImageUrl {
    Url(String),
    Object { url: String },
}

impl ImageUrl {
    pub fn url(&self) -> &str {
        match self {
            ImageUrl::Url(url) => url,
            ImageUrl::Object { url } => url,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LangChainPart {
    Text { text: String },
    TextDelta { text: String },
    ImageUrl { image_url: ImageUrl },
    ToolUse(Map<String, Value>),
    InputJsonDelta(Map<String, Value>),
}

impl LangChainPart {
    fn text(&self) -> Option<&str> {
        match self {
            LangChainPart::Text { text } | LangChainPart::TextDelta { text } => Some(text),
            _ => None,
        }
    }
}

/// Message content: a plain string or a list of typed parts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LangChainContent {
    Text(String),
    Parts(Vec<LangChainPart>),
}

impl Default for LangChainContent {
    fn default() -> Self {
        LangChainContent::Text(String::new())
    }
}

impl LangChainContent {
    fn to_parts(&self) -> Vec<MessagePart> {
        match self {
            LangChainContent::Text(text) => vec![MessagePart::text(text.as_str())],
            LangChainContent::Parts(parts) => parts
                .iter()
                .filter_map(|part| match part {
                    LangChainPart::Text { text } | LangChainPart::TextDelta { text } => {
                        Some(MessagePart::text(text.as_str()))
                    }
                    LangChainPart::ImageUrl { image_url } => Some(MessagePart::image(image_url.url())),
                    LangChainPart::ToolUse(_) | LangChainPart::InputJsonDelta(_) => None,
                })
                .collect(),
        }
    }

    /// Append streamed content, joining adjacent text
    fn concat(&mut self, next: &LangChainContent) {
        if let (LangChainContent::Text(text), LangChainContent::Text(more)) = (&mut *self, next) {
            text.push_str(more);
            return;
        }
        let mut parts = match std::mem::take(self) {
            LangChainContent::Text(text) if text.is_empty() => Vec::new(),
            LangChainContent::Text(text) => vec![LangChainPart::Text { text }],
            LangChainContent::Parts(parts) => parts,
        };
        match next {
            LangChainContent::Text(more) if more.is_empty() => {}
            LangChainContent::Text(more) => {
                push_part(&mut parts, &LangChainPart::Text { text: more.clone() })
            }
            LangChainContent::Parts(more) => {
                for part in more {
                    push_part(&mut parts, part);
                }
            }
        }
        *self = LangChainContent::Parts(parts);
    }
}

fn push_part(parts: &mut Vec<LangChainPart>, part: &LangChainPart) {
    if let (Some(LangChainPart::Text { text }), Some(more)) = (parts.last_mut(), part.text()) {
        text.push_str(more);
        return;
    }
    match part {
        LangChainPart::TextDelta { text } => parts.push(LangChainPart::Text { text: text.clone() }),
        other => parts.push(other.clone()),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LangChainToolCall {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

/// A streamed fragment of one tool call; `args` is partial json text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LangChainToolCallChunk {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub args: String,
    pub index: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub content: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub additional_kwargs: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HumanMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub content: LangChainContent,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub additional_kwargs: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AiMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub content: LangChainContent,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<LangChainToolCall>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_call_chunks: Vec<LangChainToolCallChunk>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<MessageStatus>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub additional_kwargs: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub content: Value,
    pub tool_call_id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<Value>,
    /// `success` or `error`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

/// A message as stored in a LangGraph thread state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum LangChainMessage {
    System(SystemMessage),
    Human(HumanMessage),
    Ai(AiMessage),
    Tool(ToolMessage),
}

impl LangChainMessage {
    pub fn id(&self) -> Option<&str> {
        match self {
            LangChainMessage::System(message) => message.id.as_deref(),
            LangChainMessage::Human(message) => message.id.as_deref(),
            LangChainMessage::Ai(message) => message.id.as_deref(),
            LangChainMessage::Tool(message) => message.id.as_deref(),
        }
    }

    fn set_id(&mut self, id: String) {
        let slot = match self {
            LangChainMessage::System(message) => &mut message.id,
            LangChainMessage::Human(message) => &mut message.id,
            LangChainMessage::Ai(message) => &mut message.id,
            LangChainMessage::Tool(message) => &mut message.id,
        };
        *slot = Some(id);
    }
}

/// A streamed `AIMessageChunk`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LangChainMessageChunk {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub content: LangChainContent,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<LangChainToolCall>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_call_chunks: Vec<LangChainToolCallChunk>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub additional_kwargs: Map<String, Value>,
}

fn kwargs_metadata(additional_kwargs: &Map<String, Value>) -> MessageMetadata {
    let custom = additional_kwargs
        .get("metadata")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    MessageMetadata {
        custom,
        ..Default::default()
    }
}

fn like_with(role: Role, id: &Option<String>, content: Vec<MessagePart>, kwargs: &Map<String, Value>) -> MessageLike {
    let mut like = MessageLike::new(role);
    like.id = id.clone();
    like.content = content;
    like.metadata = kwargs_metadata(kwargs);
    like
}

/// Convert one stored LangChain message.
///
/// Usable directly as an
/// [`ExternalMessageConverter`](crate::converter::ExternalMessageConverter)
/// callback, so tool messages fold into the preceding ai message.
pub fn convert_langchain_message(
    message: &LangChainMessage,
) -> Result<Vec<ExternalMessage>, ConversionError> {
    let converted: ExternalMessage = match message {
        LangChainMessage::System(system) => like_with(
            Role::System,
            &system.id,
            vec![MessagePart::text(system.content.as_str())],
            &system.additional_kwargs,
        )
        .into(),
        LangChainMessage::Human(human) => like_with(
            Role::User,
            &human.id,
            human.content.to_parts(),
            &human.additional_kwargs,
        )
        .into(),
        LangChainMessage::Ai(ai) => {
            let mut content = ai.content.to_parts();
            content.extend(ai.tool_calls.iter().map(|call| {
                let args_text = ai
                    .tool_call_chunks
                    .iter()
                    .find(|chunk| chunk.id == call.id)
                    .map(|chunk| chunk.args.clone())
                    .unwrap_or_else(|| call.args.to_string());
                MessagePart::ToolCall(ToolCallPart {
                    args_text,
                    ..ToolCallPart::new(call.id.as_str(), call.name.as_str(), call.args.clone())
                })
            }));
            let mut like = like_with(Role::Assistant, &ai.id, content, &ai.additional_kwargs);
            like.status = ai.status.clone();
            like.into()
        }
        LangChainMessage::Tool(tool) => {
            if tool.tool_call_id.is_empty() {
                return Err(ConversionError::InvalidRecord(
                    "tool message without a tool_call_id".to_string(),
                ));
            }
            ToolResultMessage {
                tool_call_id: tool.tool_call_id.clone(),
                tool_name: Some(tool.name.clone()),
                result: tool.content.clone(),
                artifact: tool.artifact.clone(),
                is_error: tool.status.as_deref() == Some("error"),
            }
            .into()
        }
    };
    Ok(vec![converted])
}

/// One entry of a LangGraph `messages` stream tuple
#[derive(Debug, Clone, PartialEq)]
pub enum NormalizedTupleMessage {
    Chunk(LangChainMessageChunk),
    Message(LangChainMessage),
}

fn normalize_tool_call_chunk(value: &Value) -> Option<LangChainToolCallChunk> {
    let record = value.as_object()?;
    let id = record.get("id")?.as_str()?;
    let name = record.get("name")?.as_str()?;
    let index = record.get("index")?.as_u64()?;
    let args = record
        .get("args")
        .and_then(Value::as_str)
        .or_else(|| record.get("args_json").and_then(Value::as_str))
        .unwrap_or_default();
    Some(LangChainToolCallChunk {
        id: id.to_string(),
        name: name.to_string(),
        args: args.to_string(),
        index,
    })
}

fn normalize_chunk(record: &Map<String, Value>) -> Option<LangChainMessageChunk> {
    match record.get("type").and_then(Value::as_str) {
        Some("AIMessageChunk") | Some("ai") => {}
        _ => return None,
    }

    let id = match record.get("id") {
        None => None,
        Some(Value::String(id)) => Some(id.clone()),
        Some(_) => return None,
    };
    let content = match record.get("content") {
        None => LangChainContent::default(),
        Some(content @ (Value::String(_) | Value::Array(_))) => {
            serde_json::from_value(content.clone()).ok()?
        }
        Some(_) => return None,
    };
    let tool_call_chunks = match record.get("tool_call_chunks") {
        None => Vec::new(),
        Some(Value::Array(chunks)) => chunks.iter().filter_map(normalize_tool_call_chunk).collect(),
        Some(_) => return None,
    };
    let tool_calls = record
        .get("tool_calls")
        .and_then(|calls| serde_json::from_value(calls.clone()).ok())
        .unwrap_or_default();
    let additional_kwargs = record
        .get("additional_kwargs")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();

    Some(LangChainMessageChunk {
        id,
        content,
        tool_calls,
        tool_call_chunks,
        additional_kwargs,
    })
}

/// Classify one message from a LangGraph `messages` stream.
///
/// Ai messages are read as chunks whenever they validate as one; other
/// messages are parsed whole. Anything unrecognized yields `None`.
pub fn normalize_langgraph_tuple_message(value: &Value) -> Option<NormalizedTupleMessage> {
    let record = value.as_object()?;
    if let Some(chunk) = normalize_chunk(record) {
        return Some(NormalizedTupleMessage::Chunk(chunk));
    }
    match record.get("type").and_then(Value::as_str) {
        Some("system" | "human" | "tool" | "ai") => serde_json::from_value(value.clone())
            .map(NormalizedTupleMessage::Message)
            .ok(),
        _ => None,
    }
}

/// Builds the message list of a LangGraph run from streamed messages and chunks.
///
/// Messages are keyed by id; a chunk extends the ai message with the same id.
/// The returned list keeps the `Arc` of every message that did not change.
#[derive(Debug, Default)]
pub struct LangChainMessageAccumulator {
    messages: Vec<Arc<LangChainMessage>>,
    positions: HashMap<String, usize>,
    snapshot: Option<Arc<[Arc<LangChainMessage>]>>,
}

impl LangChainMessageAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_messages<I: IntoIterator<Item = LangChainMessage>>(messages: I) -> Self {
        let mut accumulator = Self::new();
        for message in messages {
            accumulator.add_message(message);
        }
        accumulator
    }

    /// Insert or replace a whole message
    pub fn add_message(&mut self, mut message: LangChainMessage) {
        let id = match message.id() {
            Some(id) => id.to_string(),
            None => {
                let id = Uuid::new_v4().to_string();
                message.set_id(id.clone());
                id
            }
        };
        self.put(id, message);
    }

    /// Fold a streamed chunk into the ai message it belongs to
    pub fn add_chunk(&mut self, chunk: LangChainMessageChunk) {
        let id = chunk
            .id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let mut message = match self.get(&id) {
            Some(LangChainMessage::Ai(existing)) => existing.clone(),
            _ => AiMessage {
                id: Some(id.clone()),
                content: LangChainContent::Text(String::new()),
                ..Default::default()
            },
        };

        message.content.concat(&chunk.content);
        for piece in &chunk.tool_call_chunks {
            match message
                .tool_call_chunks
                .iter_mut()
                .find(|existing| existing.index == piece.index)
            {
                Some(existing) => existing.args.push_str(&piece.args),
                None => message.tool_call_chunks.push(piece.clone()),
            }
        }
        refresh_tool_calls(&mut message);
        for call in &chunk.tool_calls {
            match message.tool_calls.iter_mut().find(|existing| existing.id == call.id) {
                Some(existing) => *existing = call.clone(),
                None => message.tool_calls.push(call.clone()),
            }
        }
        for (key, value) in &chunk.additional_kwargs {
            message.additional_kwargs.insert(key.clone(), value.clone());
        }

        self.put(id, LangChainMessage::Ai(message));
    }

    pub fn add(&mut self, message: NormalizedTupleMessage) {
        match message {
            NormalizedTupleMessage::Chunk(chunk) => self.add_chunk(chunk),
            NormalizedTupleMessage::Message(message) => self.add_message(message),
        }
    }

    pub fn get(&self, id: &str) -> Option<&LangChainMessage> {
        self.positions
            .get(id)
            .and_then(|&position| self.messages.get(position))
            .map(|message| message.as_ref())
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// The accumulated messages in arrival order
    pub fn messages(&mut self) -> Arc<[Arc<LangChainMessage>]> {
        if let Some(snapshot) = &self.snapshot {
            return Arc::clone(snapshot);
        }
        let snapshot: Arc<[Arc<LangChainMessage>]> = self.messages.clone().into();
        self.snapshot = Some(Arc::clone(&snapshot));
        snapshot
    }

    pub fn clear(&mut self) {
        self.messages.clear();
        self.positions.clear();
        self.snapshot = None;
    }

    fn put(&mut self, id: String, message: LangChainMessage) {
        let message = Arc::new(message);
        match self.positions.get(&id) {
            Some(&position) => self.messages[position] = message,
            None => {
                self.positions.insert(id, self.messages.len());
                self.messages.push(message);
            }
        }
        self.snapshot = None;
    }
}

/// Re-derive parsed tool calls from the streamed argument text.
///
/// Arguments are only replaced when the accumulated text parses, so a call
/// keeps its last complete arguments while more text streams in.
fn refresh_tool_calls(message: &mut AiMessage) {
    for chunk in &message.tool_call_chunks {
        let parsed = serde_json::from_str::<Value>(&chunk.args).ok();
        match message.tool_calls.iter_mut().find(|call| call.id == chunk.id) {
            Some(call) => {
                if let Some(args) = parsed {
                    call.args = args;
                }
            }
            None => {
                debug!(tool_call_id = %chunk.id, "New streamed tool call");
                message.tool_calls.push(LangChainToolCall {
                    id: chunk.id.clone(),
                    name: chunk.name.clone(),
                    args: parsed.unwrap_or_else(|| json!({})),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse(value: Value) -> LangChainMessage {
        serde_json::from_value(value).unwrap()
    }

    fn single_like(message: &LangChainMessage) -> MessageLike {
        match convert_langchain_message(message).unwrap().remove(0) {
            ExternalMessage::Message { like, .. } => like,
            other => panic!("expected a message, got {:?}", other),
        }
    }

    #[test]
    fn test_kwargs_metadata_becomes_custom() {
        let system = parse(json!({
            "type": "system",
            "id": "sys-1",
            "content": "You are a helpful assistant.",
            "additional_kwargs": {"metadata": {"speaker_name": "System"}}
        }));
        let like = single_like(&system);
        assert_eq!(like.role, Role::System);
        assert_eq!(like.metadata.custom["speaker_name"], "System");

        let human = parse(json!({
            "type": "human",
            "id": "human-1",
            "content": "Hello!",
            "additional_kwargs": {"metadata": {"speaker_name": "Presenter"}}
        }));
        let like = single_like(&human);
        assert_eq!(like.role, Role::User);
        assert_eq!(like.metadata.custom["speaker_name"], "Presenter");

        let ai = parse(json!({
            "type": "ai",
            "id": "ai-1",
            "content": "Hi there!",
            "additional_kwargs": {"metadata": {"model": "gpt-4", "speaker_name": "Assistant"}}
        }));
        let like = single_like(&ai);
        assert_eq!(like.role, Role::Assistant);
        assert_eq!(like.metadata.custom["model"], "gpt-4");
    }

    #[test]
    fn test_missing_metadata_defaults_to_empty() {
        for message in [
            json!({"type": "system", "id": "sys-1", "content": "Hello"}),
            json!({"type": "human", "id": "h-1", "content": "Hello"}),
            json!({"type": "ai", "id": "ai-1", "content": "Hello", "additional_kwargs": {"other": 1}}),
        ] {
            let like = single_like(&parse(message));
            assert!(like.metadata.custom.is_empty());
        }
    }

    #[test]
    fn test_content_parts() {
        let human = parse(json!({
            "type": "human",
            "content": [
                {"type": "text", "text": "look"},
                {"type": "image_url", "image_url": "https://example.com/a.png"},
                {"type": "image_url", "image_url": {"url": "https://example.com/b.png"}},
                {"type": "tool_use", "id": "t-1", "name": "search"}
            ]
        }));
        let like = single_like(&human);
        assert_eq!(
            like.content,
            vec![
                MessagePart::text("look"),
                MessagePart::image("https://example.com/a.png"),
                MessagePart::image("https://example.com/b.png"),
            ]
        );
    }

    #[test]
    fn test_ai_tool_calls_prefer_chunk_args_text() {
        let ai = parse(json!({
            "type": "ai",
            "id": "ai-1",
            "content": "",
            "tool_calls": [
                {"id": "c-1", "name": "search", "args": {"q": "rust"}},
                {"id": "c-2", "name": "fetch", "args": {"url": "x"}}
            ],
            "tool_call_chunks": [
                {"id": "c-1", "name": "search", "args": "{\"q\": \"rust\"}", "index": 0}
            ],
            "status": {"type": "complete", "reason": "stop"}
        }));
        let like = single_like(&ai);
        let calls: Vec<&ToolCallPart> = like.content.iter().filter_map(|p| p.as_tool_call()).collect();
        assert_eq!(calls[0].args_text, "{\"q\": \"rust\"}");
        assert_eq!(calls[1].args_text, r#"{"url":"x"}"#);
        assert_eq!(calls[1].args, json!({"url": "x"}));
        assert!(matches!(like.status, Some(MessageStatus::Complete { .. })));
    }

    #[test]
    fn test_tool_message_becomes_tool_result() {
        let tool = parse(json!({
            "type": "tool",
            "content": "sunny",
            "tool_call_id": "c-1",
            "name": "weather",
            "status": "error"
        }));
        let outputs = convert_langchain_message(&tool).unwrap();
        assert_eq!(
            outputs,
            vec![ExternalMessage::Tool(ToolResultMessage {
                tool_call_id: "c-1".into(),
                tool_name: Some("weather".into()),
                result: json!("sunny"),
                artifact: None,
                is_error: true,
            })]
        );
    }

    #[test]
    fn test_normalize_tuple_messages() {
        let chunk = normalize_langgraph_tuple_message(&json!({
            "type": "AIMessageChunk",
            "id": "ai-1",
            "content": "Hel",
            "tool_call_chunks": [
                {"id": "c-1", "name": "search", "args_json": "{\"q\"", "index": 0},
                {"id": "c-2", "name": "fetch", "index": "zero"},
                {"name": "fetch", "args": "{}", "index": 1}
            ]
        }));
        let Some(NormalizedTupleMessage::Chunk(chunk)) = chunk else {
            panic!("expected a chunk");
        };
        assert_eq!(chunk.tool_call_chunks.len(), 1);
        assert_eq!(chunk.tool_call_chunks[0].args, "{\"q\"");

        let human = normalize_langgraph_tuple_message(&json!({"type": "human", "content": "hi"}));
        assert!(matches!(human, Some(NormalizedTupleMessage::Message(LangChainMessage::Human(_)))));

        assert_eq!(
            normalize_langgraph_tuple_message(&json!({"type": "ai", "id": 7, "content": "x"})),
            None
        );
        assert_eq!(normalize_langgraph_tuple_message(&json!({"type": "event"})), None);
        assert_eq!(normalize_langgraph_tuple_message(&json!("ai")), None);
        assert_eq!(
            normalize_langgraph_tuple_message(&json!({"type": "AIMessageChunk", "tool_call_chunks": {}})),
            None
        );
    }

    #[test]
    fn test_accumulator_folds_chunks() {
        let mut accumulator = LangChainMessageAccumulator::with_messages([parse(json!({
            "type": "human", "id": "h-1", "content": "weather?"
        }))]);
        let before = accumulator.messages();

        for raw in [
            json!({"type": "AIMessageChunk", "id": "ai-1", "content": "Let me ",
                   "tool_call_chunks": [{"id": "c-1", "name": "weather", "args": "{\"city\": ", "index": 0}]}),
            json!({"type": "AIMessageChunk", "id": "ai-1", "content": "check.",
                   "tool_call_chunks": [{"id": "c-1", "name": "weather", "args": "\"Oslo\"}", "index": 0}]}),
        ] {
            if let Some(normalized) = normalize_langgraph_tuple_message(&raw) {
                accumulator.add(normalized);
            }
        }

        let after = accumulator.messages();
        assert_eq!(after.len(), 2);
        assert!(Arc::ptr_eq(&before[0], &after[0]));
        assert!(Arc::ptr_eq(&after, &accumulator.messages()));

        let LangChainMessage::Ai(ai) = after[1].as_ref() else {
            panic!("expected an ai message");
        };
        assert_eq!(ai.content, LangChainContent::Text("Let me check.".into()));
        assert_eq!(ai.tool_call_chunks.len(), 1);
        assert_eq!(ai.tool_call_chunks[0].args, "{\"city\": \"Oslo\"}");
        assert_eq!(ai.tool_calls[0].args, json!({"city": "Oslo"}));

        let like = single_like(&after[1]);
        assert_eq!(like.content[0], MessagePart::text("Let me check."));
        assert_eq!(like.content[1].as_tool_call().unwrap().args_text, "{\"city\": \"Oslo\"}");
    }

    #[test]
    fn test_partial_tool_args_keep_last_parsed_value() {
        let mut accumulator = LangChainMessageAccumulator::new();
        accumulator.add_chunk(LangChainMessageChunk {
            id: Some("ai-1".into()),
            tool_call_chunks: vec![LangChainToolCallChunk {
                id: "c-1".into(),
                name: "search".into(),
                args: "{\"q\": \"ru".into(),
                index: 0,
            }],
            ..Default::default()
        });
        let Some(LangChainMessage::Ai(ai)) = accumulator.get("ai-1") else {
            panic!("expected an ai message");
        };
        assert_eq!(ai.tool_calls[0].args, json!({}));

        accumulator.add_chunk(LangChainMessageChunk {
            id: Some("ai-1".into()),
            content: LangChainContent::Parts(vec![LangChainPart::TextDelta { text: "ok".into() }]),
            ..Default::default()
        });
        let Some(LangChainMessage::Ai(ai)) = accumulator.get("ai-1") else {
            panic!("expected an ai message");
        };
        assert_eq!(
            ai.content,
            LangChainContent::Parts(vec![LangChainPart::Text { text: "ok".into() }])
        );
        assert_eq!(accumulator.len(), 1);
    }

    #[test]
    fn test_messages_without_ids_get_one() {
        let mut accumulator = LangChainMessageAccumulator::new();
        accumulator.add_message(parse(json!({"type": "human", "content": "a"})));
        accumulator.add_message(parse(json!({"type": "human", "content": "b"})));
        let messages = accumulator.messages();
        assert_eq!(messages.len(), 2);
        assert!(messages.iter().all(|message| message.id().is_some()));
    }
}
