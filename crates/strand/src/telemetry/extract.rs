use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;

use super::{RunStatus, TelemetryToolCall, ToolSource};
use crate::providers::ai_sdk::{UiMessage, UiPart};

/// Longest text or JSON payload carried by a report field, in characters
pub const MAX_SPAN_CONTENT: usize = 50_000;

lazy_static! {
    static ref BASE64: Regex = Regex::new(r"^[A-Za-z0-9+/]{100,}={0,2}$").unwrap();
}

/// What a finished (or abandoned) run looked like from the client's side
#[derive(Debug, Clone, PartialEq)]
pub struct RunTelemetry {
    pub assistant_message_id: String,
    pub status: RunStatus,
    pub tool_calls: Vec<TelemetryToolCall>,
    pub total_steps: Option<u64>,
    pub output_text: Option<String>,
    pub input_tokens: Option<f64>,
    pub output_tokens: Option<f64>,
    pub reasoning_tokens: Option<f64>,
    pub cached_input_tokens: Option<f64>,
    pub model_id: Option<String>,
}

fn truncate(value: String) -> String {
    match value.char_indices().nth(MAX_SPAN_CONTENT) {
        Some((end, _)) => value[..end].to_string(),
        None => value,
    }
}

fn stringify(value: Option<&Value>) -> Option<String> {
    value
        .filter(|value| !value.is_null())
        .map(|value| truncate(value.to_string()))
}

fn first_chars(value: &str, count: usize) -> &str {
    match value.char_indices().nth(count) {
        Some((end, _)) => &value[..end],
        None => value,
    }
}

/// Replace inline base64 media in an MCP content list with its size
fn summarize_mcp_result(output: Option<&Value>) -> Option<String> {
    let output = output.filter(|value| !value.is_null())?;
    let parsed = match output {
        Value::String(text) => serde_json::from_str::<Value>(text).ok(),
        other => Some(other.clone()),
    };

    let Some(Value::Array(items)) = parsed else {
        return stringify(Some(output));
    };

    let summarized: Vec<Value> = items
        .into_iter()
        .map(|mut item| {
            let kind = item.get("type").and_then(Value::as_str).unwrap_or_default();
            if kind != "image" && kind != "audio" {
                return item;
            }
            let Some(data) = item.get("data").and_then(Value::as_str) else {
                return item;
            };
            if !BASE64.is_match(first_chars(data, 200)) {
                return item;
            }
            let size_kb = (data.len() as f64 * 3.0) / 4.0 / 1024.0;
            let summary = format!("[{}: {:.1}KB]", kind, size_kb);
            item["data"] = Value::String(summary);
            item
        })
        .collect();
    Some(truncate(Value::Array(summarized).to_string()))
}

fn is_dynamic_tool(part: &UiPart) -> bool {
    part.kind == "dynamic-tool" || part.kind.starts_with("dynamic-tool-")
}

fn is_tool_part(part: &UiPart) -> bool {
    part.tool_call_id.is_some() && (is_dynamic_tool(part) || part.kind.starts_with("tool-"))
}

fn tool_name(part: &UiPart) -> String {
    if let Some(name) = &part.tool_name {
        return name.clone();
    }
    part.kind
        .strip_prefix("dynamic-tool-")
        .or_else(|| part.kind.strip_prefix("tool-"))
        .unwrap_or_default()
        .to_string()
}

fn build_tool_call(part: &UiPart) -> TelemetryToolCall {
    let mcp = is_dynamic_tool(part);
    TelemetryToolCall {
        tool_name: tool_name(part),
        tool_call_id: part.tool_call_id.clone().unwrap_or_default(),
        tool_args: stringify(part.input.as_ref()),
        tool_result: if mcp {
            summarize_mcp_result(part.output.as_ref())
        } else {
            stringify(part.output.as_ref())
        },
        tool_source: mcp.then_some(ToolSource::Mcp),
    }
}

fn count(usage: &Value, key: &str) -> Option<f64> {
    usage.get(key).and_then(Value::as_f64)
}

/// Summarize the last assistant message of `messages`.
///
/// Returns `None` when the thread has no assistant message yet. Usage and
/// model id are read from the message metadata when the server attached them.
pub fn extract_run_telemetry(messages: &[UiMessage]) -> Option<RunTelemetry> {
    let assistant = messages.iter().rev().find(|message| message.is_assistant())?;

    let mut texts = Vec::new();
    let mut tool_calls = Vec::new();
    let mut steps = 0u64;

    for part in &assistant.parts {
        if part.kind == "step-start" {
            steps += 1;
        } else if part.kind == "text" {
            if let Some(text) = part.text.as_deref().filter(|text| !text.is_empty()) {
                texts.push(text);
            }
        } else if is_tool_part(part) {
            tool_calls.push(build_tool_call(part));
        }
    }

    let output_text = (!texts.is_empty()).then(|| truncate(texts.concat()));
    let status = if output_text.is_some() {
        RunStatus::Completed
    } else {
        RunStatus::Incomplete
    };

    let metadata = assistant.metadata.as_ref();
    let model_id = metadata
        .and_then(|metadata| metadata.get("modelId"))
        .and_then(Value::as_str)
        .filter(|model_id| !model_id.is_empty())
        .map(str::to_string);
    let usage = metadata.and_then(|metadata| metadata.get("usage"));

    let mut telemetry = RunTelemetry {
        assistant_message_id: assistant.id.clone(),
        status,
        tool_calls,
        total_steps: (steps > 0).then_some(steps),
        output_text,
        input_tokens: None,
        output_tokens: None,
        reasoning_tokens: None,
        cached_input_tokens: None,
        model_id,
    };
    if let Some(usage) = usage {
        telemetry.input_tokens = count(usage, "inputTokens").or_else(|| count(usage, "promptTokens"));
        telemetry.output_tokens =
            count(usage, "outputTokens").or_else(|| count(usage, "completionTokens"));
        telemetry.reasoning_tokens = count(usage, "reasoningTokens");
        telemetry.cached_input_tokens = count(usage, "cachedInputTokens");
    }
    Some(telemetry)
}
