use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Arc, OnceLock};

use crate::errors::ConversionError;
use crate::models::content::MessagePart;
use crate::models::message::{Attachment, Message};
use crate::models::message_like::MessageLike;
use crate::models::role::Role;
use crate::repository::ExportedRepository;

/// A prompt the host offers as a one-click follow-up
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Suggestion {
    pub prompt: String,
}

impl Suggestion {
    pub fn new<S: Into<String>>(prompt: S) -> Self {
        Suggestion {
            prompt: prompt.into(),
        }
    }
}

/// What the thread can do given the callbacks and adapters the host supplied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeCapabilities {
    pub switch_to_branch: bool,
    pub edit: bool,
    pub reload: bool,
    pub cancel: bool,
    pub copy: bool,
    pub speech: bool,
    pub attachments: bool,
    pub feedback: bool,
}

impl Default for RuntimeCapabilities {
    fn default() -> Self {
        RuntimeCapabilities {
            switch_to_branch: false,
            edit: false,
            reload: false,
            cancel: false,
            copy: true,
            speech: false,
            attachments: false,
            feedback: false,
        }
    }
}

/// Optional host integrations that only matter as capability flags here
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AdapterSupport {
    pub speech: bool,
    pub attachments: bool,
    pub feedback: bool,
}

/// A message the user composed, handed to the host for sending or editing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppendMessage {
    pub parent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
    pub role: Role,
    pub content: Vec<MessagePart>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
}

impl AppendMessage {
    pub fn user<S: Into<String>>(parent_id: Option<&str>, text: S) -> Self {
        AppendMessage {
            parent_id: parent_id.map(str::to_string),
            source_id: None,
            role: Role::User,
            content: vec![MessagePart::text(text)],
            attachments: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRunConfig {
    pub parent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddToolResult {
    pub message_id: String,
    pub tool_name: String,
    pub tool_call_id: String,
    pub result: Value,
    #[serde(default)]
    pub is_error: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<Value>,
}

/// Result of the host's per-record conversion
#[derive(Debug, Clone)]
pub enum ConvertedMessage {
    /// Needs ids and statuses filled in
    Like(MessageLike),
    /// Already canonical; used as is
    Ready(Arc<Message>),
}

impl From<MessageLike> for ConvertedMessage {
    fn from(like: MessageLike) -> Self {
        ConvertedMessage::Like(like)
    }
}

pub type ConvertMessageFn<T> =
    Arc<dyn Fn(&Arc<T>, usize) -> Result<ConvertedMessage, ConversionError> + Send + Sync>;
pub type AppendFn = Arc<dyn Fn(&AppendMessage) -> anyhow::Result<()> + Send + Sync>;
pub type ReloadFn = Arc<dyn Fn(&StartRunConfig) -> anyhow::Result<()> + Send + Sync>;
pub type CancelFn = Arc<dyn Fn() -> anyhow::Result<()> + Send + Sync>;
pub type AddToolResultFn = Arc<dyn Fn(&AddToolResult) -> anyhow::Result<()> + Send + Sync>;
pub type SetMessagesFn<T> = Arc<dyn Fn(Vec<Arc<T>>) -> anyhow::Result<()> + Send + Sync>;

/// Where the host keeps its messages
pub enum StoreMessages<T> {
    /// A flat list of host records and the function that converts each one
    Records {
        records: Arc<[Arc<T>]>,
        convert: ConvertMessageFn<T>,
    },
    /// A whole tree, imported as is
    Repository(Arc<ExportedRepository>),
}

impl<T> Clone for StoreMessages<T> {
    fn clone(&self) -> Self {
        match self {
            StoreMessages::Records { records, convert } => StoreMessages::Records {
                records: Arc::clone(records),
                convert: Arc::clone(convert),
            },
            StoreMessages::Repository(repository) => {
                StoreMessages::Repository(Arc::clone(repository))
            }
        }
    }
}

/// One snapshot of the host's state.
///
/// The host builds a new adapter whenever its state changes and hands it to
/// [`ExternalStoreThread::set_adapter`](super::ExternalStoreThread::set_adapter).
/// Unchanged parts should keep their `Arc`s so the thread can skip work.
pub struct ExternalStoreAdapter<T> {
    pub messages: StoreMessages<T>,
    pub is_running: bool,
    pub is_disabled: bool,
    pub is_loading: bool,
    pub suggestions: Arc<[Suggestion]>,
    pub extras: Option<Arc<Value>>,
    pub on_new: AppendFn,
    pub on_edit: Option<AppendFn>,
    pub on_reload: Option<ReloadFn>,
    pub on_cancel: Option<CancelFn>,
    pub on_add_tool_result: Option<AddToolResultFn>,
    pub set_messages: Option<SetMessagesFn<T>>,
    pub adapters: AdapterSupport,
    pub copy: bool,
}

impl<T> Clone for ExternalStoreAdapter<T> {
    fn clone(&self) -> Self {
        ExternalStoreAdapter {
            messages: self.messages.clone(),
            is_running: self.is_running,
            is_disabled: self.is_disabled,
            is_loading: self.is_loading,
            suggestions: Arc::clone(&self.suggestions),
            extras: self.extras.clone(),
            on_new: Arc::clone(&self.on_new),
            on_edit: self.on_edit.clone(),
            on_reload: self.on_reload.clone(),
            on_cancel: self.on_cancel.clone(),
            on_add_tool_result: self.on_add_tool_result.clone(),
            set_messages: self.set_messages.clone(),
            adapters: self.adapters,
            copy: self.copy,
        }
    }
}

impl<T> ExternalStoreAdapter<T> {
    fn with_store(messages: StoreMessages<T>, on_new: AppendFn) -> Self {
        ExternalStoreAdapter {
            messages,
            is_running: false,
            is_disabled: false,
            is_loading: false,
            suggestions: Arc::from(Vec::new()),
            extras: None,
            on_new,
            on_edit: None,
            on_reload: None,
            on_cancel: None,
            on_add_tool_result: None,
            set_messages: None,
            adapters: AdapterSupport::default(),
            copy: true,
        }
    }

    pub fn new<C, N>(records: Arc<[Arc<T>]>, convert: C, on_new: N) -> Self
    where
        C: Fn(&Arc<T>, usize) -> Result<ConvertedMessage, ConversionError> + Send + Sync + 'static,
        N: Fn(&AppendMessage) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self::with_store(
            StoreMessages::Records {
                records,
                convert: Arc::new(convert),
            },
            Arc::new(on_new),
        )
    }

    /// Like [`ExternalStoreAdapter::new`], sharing an existing conversion
    /// function so the thread keeps its conversion cache across snapshots
    pub fn from_converter<N>(records: Arc<[Arc<T>]>, convert: ConvertMessageFn<T>, on_new: N) -> Self
    where
        N: Fn(&AppendMessage) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self::with_store(StoreMessages::Records { records, convert }, Arc::new(on_new))
    }

    pub fn from_repository<N>(repository: Arc<ExportedRepository>, on_new: N) -> Self
    where
        N: Fn(&AppendMessage) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self::with_store(StoreMessages::Repository(repository), Arc::new(on_new))
    }

    /// The same snapshot with a new record list
    pub fn with_records(&self, records: Arc<[Arc<T>]>) -> Self {
        let mut next = self.clone();
        if let StoreMessages::Records { convert, .. } = &self.messages {
            next.messages = StoreMessages::Records {
                records,
                convert: Arc::clone(convert),
            };
        }
        next
    }

    pub fn running(mut self, is_running: bool) -> Self {
        self.is_running = is_running;
        self
    }

    pub fn disabled(mut self, is_disabled: bool) -> Self {
        self.is_disabled = is_disabled;
        self
    }

    pub fn loading(mut self, is_loading: bool) -> Self {
        self.is_loading = is_loading;
        self
    }

    pub fn with_suggestions(mut self, suggestions: Vec<Suggestion>) -> Self {
        self.suggestions = suggestions.into();
        self
    }

    pub fn with_extras(mut self, extras: Value) -> Self {
        self.extras = Some(Arc::new(extras));
        self
    }

    pub fn with_adapters(mut self, adapters: AdapterSupport) -> Self {
        self.adapters = adapters;
        self
    }

    pub fn with_copy(mut self, copy: bool) -> Self {
        self.copy = copy;
        self
    }

    pub fn on_edit<F>(mut self, f: F) -> Self
    where
        F: Fn(&AppendMessage) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.on_edit = Some(Arc::new(f));
        self
    }

    pub fn on_reload<F>(mut self, f: F) -> Self
    where
        F: Fn(&StartRunConfig) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.on_reload = Some(Arc::new(f));
        self
    }

    pub fn on_cancel<F>(mut self, f: F) -> Self
    where
        F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.on_cancel = Some(Arc::new(f));
        self
    }

    pub fn on_add_tool_result<F>(mut self, f: F) -> Self
    where
        F: Fn(&AddToolResult) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.on_add_tool_result = Some(Arc::new(f));
        self
    }

    pub fn set_messages<F>(mut self, f: F) -> Self
    where
        F: Fn(Vec<Arc<T>>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.set_messages = Some(Arc::new(f));
        self
    }

    pub fn capabilities(&self) -> RuntimeCapabilities {
        RuntimeCapabilities {
            switch_to_branch: self.set_messages.is_some(),
            edit: self.on_edit.is_some(),
            reload: self.on_reload.is_some(),
            cancel: self.on_cancel.is_some(),
            copy: self.copy,
            speech: self.adapters.speech,
            attachments: self.adapters.attachments,
            feedback: self.adapters.feedback,
        }
    }
}

fn ready_message(message: &Arc<Message>, _index: usize) -> Result<ConvertedMessage, ConversionError> {
    Ok(ConvertedMessage::Ready(Arc::clone(message)))
}

impl ExternalStoreAdapter<Message> {
    /// A store whose records already are canonical messages.
    ///
    /// Every such store shares one conversion function, so switching between
    /// snapshots never resets the thread's conversion cache.
    pub fn from_thread_messages<N>(messages: Arc<[Arc<Message>]>, on_new: N) -> Self
    where
        N: Fn(&AppendMessage) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        static PASSTHROUGH: OnceLock<ConvertMessageFn<Message>> = OnceLock::new();
        let convert = PASSTHROUGH.get_or_init(|| -> ConvertMessageFn<Message> { Arc::new(ready_message) });
        Self::with_store(
            StoreMessages::Records {
                records: messages,
                convert: Arc::clone(convert),
            },
            Arc::new(on_new),
        )
    }
}
