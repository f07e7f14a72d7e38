//! Folding upstream records into canonical messages.
//!
//! Each record is mapped through a callback into zero or more
//! [`ExternalMessage`]s. Consecutive assistant and tool outputs are grouped
//! into chunks, each chunk is joined into one message, and every stage is
//! cached by the identity of its inputs so an unchanged prefix of records
//! yields the very same `Arc<Message>`s on the next pass.
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::errors::ConversionError;
use crate::models::content::MessagePart;
use crate::models::message::Message;
use crate::models::message_like::MessageLike;
use crate::models::role::Role;
use crate::models::status::{get_auto_status, is_auto_status};

/// How an assistant output combines with the outputs that follow it
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JoinStrategy {
    /// Consecutive assistant and tool outputs form one message
    #[default]
    ConcatContent,
    /// The next non-tool output starts a new message
    None,
}

/// The result of a tool call, merged into the matching tool-call part
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResultMessage {
    pub tool_call_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    pub result: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<Value>,
    #[serde(default)]
    pub is_error: bool,
}

/// One output of the record callback
#[derive(Debug, Clone, PartialEq)]
pub enum ExternalMessage {
    Message {
        like: MessageLike,
        join_strategy: Option<JoinStrategy>,
    },
    Tool(ToolResultMessage),
}

impl ExternalMessage {
    pub fn tool_result<S: Into<String>>(tool_call_id: S, result: Value) -> Self {
        ExternalMessage::Tool(ToolResultMessage {
            tool_call_id: tool_call_id.into(),
            tool_name: None,
            result,
            artifact: None,
            is_error: false,
        })
    }

    pub fn with_join_strategy(self, strategy: JoinStrategy) -> Self {
        match self {
            ExternalMessage::Message { like, .. } => ExternalMessage::Message {
                like,
                join_strategy: Some(strategy),
            },
            tool => tool,
        }
    }

    fn role(&self) -> Option<Role> {
        match self {
            ExternalMessage::Message { like, .. } => Some(like.role),
            ExternalMessage::Tool(_) => None,
        }
    }

    fn is_tool(&self) -> bool {
        matches!(self, ExternalMessage::Tool(_))
    }
}

impl From<MessageLike> for ExternalMessage {
    fn from(like: MessageLike) -> Self {
        ExternalMessage::Message {
            like,
            join_strategy: None,
        }
    }
}

impl From<ToolResultMessage> for ExternalMessage {
    fn from(result: ToolResultMessage) -> Self {
        ExternalMessage::Tool(result)
    }
}

pub type ConvertCallback<T> =
    Arc<dyn Fn(&T) -> Result<Vec<ExternalMessage>, ConversionError> + Send + Sync>;

/// A group of outputs that becomes one message, with the indices of the
/// records that contributed to it.
///
/// `sources[i]` identifies the record behind `results[i]`. A record repeated
/// back to back in the input is listed once.
struct ChunkPlan {
    inputs: Vec<usize>,
    outputs: Vec<Arc<ExternalMessage>>,
}

fn chunk_outputs(
    results: &[Arc<[Arc<ExternalMessage>]>],
    sources: &[usize],
    strategy: JoinStrategy,
) -> Vec<ChunkPlan> {
    let mut chunks = Vec::new();
    let mut current = ChunkPlan {
        inputs: Vec::new(),
        outputs: Vec::new(),
    };
    let mut is_assistant = false;
    let mut pending_none = false;

    for (index, outputs) in results.iter().enumerate() {
        for output in outputs.iter() {
            let role = output.role();
            let starts_chunk = (pending_none && !output.is_tool())
                || !is_assistant
                || matches!(role, Some(Role::User | Role::System));
            if starts_chunk {
                if !current.outputs.is_empty() {
                    chunks.push(std::mem::replace(
                        &mut current,
                        ChunkPlan {
                            inputs: Vec::new(),
                            outputs: Vec::new(),
                        },
                    ));
                } else {
                    current.inputs.clear();
                }
                pending_none = false;
            }
            is_assistant = output.is_tool() || role == Some(Role::Assistant);

            if current.inputs.last().map(|&last| sources[last]) != Some(sources[index]) {
                current.inputs.push(index);
            }
            current.outputs.push(Arc::clone(output));

            if let ExternalMessage::Message { like, join_strategy } = output.as_ref() {
                if like.role == Role::Assistant
                    && (*join_strategy == Some(JoinStrategy::None) || strategy == JoinStrategy::None)
                {
                    pending_none = true;
                }
            }
        }
    }
    if !current.outputs.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Join one chunk of outputs into a single message-like value.
///
/// A user or system output stands alone. Assistant outputs are concatenated
/// with the first one supplying id, timestamp and status; tool results are
/// written into the matching tool-call part.
fn join_outputs(outputs: &[Arc<ExternalMessage>]) -> Result<MessageLike, ConversionError> {
    let mut joined = MessageLike::new(Role::Assistant);
    let mut started = false;

    for output in outputs {
        match output.as_ref() {
            ExternalMessage::Tool(result) => {
                let call = joined
                    .content
                    .iter_mut()
                    .find_map(|part| match part {
                        MessagePart::ToolCall(call) if call.tool_call_id == result.tool_call_id => {
                            Some(call)
                        }
                        _ => None,
                    })
                    .ok_or_else(|| ConversionError::ToolCallNotFound {
                        tool_call_id: result.tool_call_id.clone(),
                    })?;
                if let Some(name) = &result.tool_name {
                    if *name != call.tool_name {
                        return Err(ConversionError::ToolNameMismatch {
                            tool_call_id: result.tool_call_id.clone(),
                            tool_name: name.clone(),
                            existing: call.tool_name.clone(),
                        });
                    }
                }
                call.result = Some(result.result.clone());
                call.artifact = result.artifact.clone();
                call.is_error = result.is_error;
            }
            ExternalMessage::Message { like, .. } => match like.role {
                Role::User | Role::System => return Ok(like.clone()),
                Role::Assistant => {
                    if !started {
                        joined.id = like.id.clone();
                        joined.created_at = like.created_at;
                        joined.status = like.status.clone();
                        started = true;
                    }
                    joined.attachments.extend(like.attachments.iter().cloned());
                    joined.metadata.merge(&like.metadata);
                    joined.content.extend(like.content.iter().cloned());
                }
            },
        }
    }
    Ok(joined)
}

/// Convert records in one shot, without caching
pub fn convert_external_messages<T, F>(
    records: &[T],
    callback: F,
    is_running: bool,
    strategy: JoinStrategy,
) -> Result<Vec<Message>, ConversionError>
where
    F: Fn(&T) -> Result<Vec<ExternalMessage>, ConversionError>,
{
    let results = records
        .iter()
        .map(|record| {
            callback(record).map(|outputs| outputs.into_iter().map(Arc::new).collect())
        })
        .collect::<Result<Vec<Arc<[Arc<ExternalMessage>]>>, _>>()?;

    let sources: Vec<usize> = records
        .iter()
        .map(|record| record as *const T as usize)
        .collect();
    let chunks = chunk_outputs(&results, &sources, strategy);
    let last = chunks.len().saturating_sub(1);
    chunks
        .iter()
        .enumerate()
        .map(|(idx, chunk)| {
            join_outputs(&chunk.outputs)?
                .into_message(&idx.to_string(), get_auto_status(idx == last, is_running))
        })
        .collect()
}

struct Chunk<T> {
    inputs: Vec<Arc<T>>,
    outputs: Vec<Arc<ExternalMessage>>,
}

struct CachedMessage<T> {
    chunk: Arc<Chunk<T>>,
    message: Arc<Message>,
}

struct Memo<T> {
    records: Arc<[Arc<T>]>,
    is_running: bool,
    messages: Arc<[Arc<Message>]>,
}

fn identity<T>(value: &Arc<T>) -> usize {
    Arc::as_ptr(value) as usize
}

fn same_elements<T>(a: &[Arc<T>], b: &[Arc<T>]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(a, b)| Arc::ptr_eq(a, b))
}

/// Incremental, identity-caching converter for one thread.
///
/// Caches are keyed by the address of an `Arc` that the cache entry itself
/// keeps alive, and are rebuilt from the live input on every pass.
pub struct ExternalMessageConverter<T> {
    callback: ConvertCallback<T>,
    join_strategy: JoinStrategy,
    callback_cache: HashMap<usize, (Arc<T>, Arc<[Arc<ExternalMessage>]>)>,
    chunk_cache: HashMap<usize, Arc<Chunk<T>>>,
    message_cache: HashMap<usize, CachedMessage<T>>,
    memo: Option<Memo<T>>,
}

impl<T> ExternalMessageConverter<T> {
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(&T) -> Result<Vec<ExternalMessage>, ConversionError> + Send + Sync + 'static,
    {
        Self::from_callback(Arc::new(callback))
    }

    pub fn from_callback(callback: ConvertCallback<T>) -> Self {
        ExternalMessageConverter {
            callback,
            join_strategy: JoinStrategy::default(),
            callback_cache: HashMap::new(),
            chunk_cache: HashMap::new(),
            message_cache: HashMap::new(),
            memo: None,
        }
    }

    pub fn with_join_strategy(mut self, strategy: JoinStrategy) -> Self {
        self.join_strategy = strategy;
        self
    }

    pub fn join_strategy(&self) -> JoinStrategy {
        self.join_strategy
    }

    pub fn set_join_strategy(&mut self, strategy: JoinStrategy) {
        if self.join_strategy != strategy {
            self.join_strategy = strategy;
            self.memo = None;
        }
    }

    /// Replace the callback; every cache is dropped since earlier outputs no
    /// longer describe the records.
    pub fn set_callback(&mut self, callback: ConvertCallback<T>) {
        if !Arc::ptr_eq(&self.callback, &callback) {
            debug!("converter callback changed, clearing caches");
            self.callback = callback;
            self.callback_cache.clear();
            self.chunk_cache.clear();
            self.message_cache.clear();
            self.memo = None;
        }
    }

    /// The records each message of the last conversion was built from
    pub fn source_records(&self, message: &Arc<Message>) -> Option<&[Arc<T>]> {
        self.message_cache
            .values()
            .find(|cached| Arc::ptr_eq(&cached.message, message))
            .map(|cached| cached.chunk.inputs.as_slice())
    }

    pub fn convert(
        &mut self,
        records: &Arc<[Arc<T>]>,
        is_running: bool,
    ) -> Result<Arc<[Arc<Message>]>, ConversionError> {
        if let Some(memo) = &self.memo {
            if Arc::ptr_eq(&memo.records, records) && memo.is_running == is_running {
                return Ok(Arc::clone(&memo.messages));
            }
        }

        let mut callback_cache = HashMap::with_capacity(records.len());
        let mut results = Vec::with_capacity(records.len());
        for record in records.iter() {
            let key = identity(record);
            let outputs = match self.callback_cache.get(&key) {
                Some((_, outputs)) => Arc::clone(outputs),
                None => (self.callback)(record.as_ref())?
                    .into_iter()
                    .map(Arc::new)
                    .collect::<Arc<[_]>>(),
            };
            callback_cache.insert(key, (Arc::clone(record), Arc::clone(&outputs)));
            results.push(outputs);
        }

        let sources: Vec<usize> = records.iter().map(identity).collect();
        let plans = chunk_outputs(&results, &sources, self.join_strategy);
        let last = plans.len().saturating_sub(1);
        let mut chunk_cache = HashMap::with_capacity(plans.len());
        let mut message_cache = HashMap::with_capacity(plans.len());
        let mut messages = Vec::with_capacity(plans.len());

        for (idx, plan) in plans.into_iter().enumerate() {
            let Some(first) = plan.outputs.first() else {
                continue;
            };
            let chunk_key = identity(first);
            let chunk = match self.chunk_cache.get(&chunk_key) {
                Some(cached) if same_elements(&cached.outputs, &plan.outputs) => Arc::clone(cached),
                _ => Arc::new(Chunk {
                    inputs: plan.inputs.iter().map(|&i| Arc::clone(&records[i])).collect(),
                    outputs: plan.outputs,
                }),
            };
            chunk_cache.insert(chunk_key, Arc::clone(&chunk));

            let auto_status = get_auto_status(idx == last, is_running);
            let message_key = identity(&chunk);
            let reusable = self.message_cache.get(&message_key).filter(|cached| {
                let message = &cached.message;
                let status_ok = message.role != Role::Assistant
                    || !is_auto_status(&message.status)
                    || message.status == auto_status;
                status_ok && same_elements(&cached.chunk.inputs, &chunk.inputs)
            });
            let message = match reusable {
                Some(cached) => Arc::clone(&cached.message),
                None => Arc::new(
                    join_outputs(&chunk.outputs)?.into_message(&idx.to_string(), auto_status)?,
                ),
            };
            message_cache.insert(
                message_key,
                CachedMessage {
                    chunk,
                    message: Arc::clone(&message),
                },
            );
            messages.push(message);
        }

        let messages: Arc<[Arc<Message>]> = match &self.memo {
            Some(memo) if same_elements(&memo.messages, &messages) => Arc::clone(&memo.messages),
            _ => messages.into(),
        };

        self.callback_cache = callback_cache;
        self.chunk_cache = chunk_cache;
        self.message_cache = message_cache;
        self.memo = Some(Memo {
            records: Arc::clone(records),
            is_running,
            messages: Arc::clone(&messages),
        });
        Ok(messages)
    }
}
