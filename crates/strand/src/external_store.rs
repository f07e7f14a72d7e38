//! Keeps a thread in sync with state owned by the host.
//!
//! The host calls [`ExternalStoreThread::set_adapter`] with a fresh
//! [`ExternalStoreAdapter`] whenever its state changes. The thread converts
//! the host's records, writes them into its [`MessageRepository`], manages the
//! optimistic assistant placeholder and reports what changed.
mod adapter;

pub use adapter::{
    AdapterSupport, AddToolResult, AddToolResultFn, AppendFn, AppendMessage, CancelFn,
    ConvertMessageFn, ConvertedMessage, ExternalStoreAdapter, ReloadFn, RuntimeCapabilities,
    SetMessagesFn, StartRunConfig, StoreMessages, Suggestion,
};

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::errors::{Capability, ThreadError, ThreadResult};
use crate::models::message::Message;
use crate::models::message_like::MessageLike;
use crate::models::role::Role;
use crate::models::status::{get_auto_status, is_auto_status};
use crate::repository::MessageRepository;

/// A run started or finished between two snapshots
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunEvent {
    RunStart,
    RunEnd,
}

/// Which derived values changed during an update.
///
/// Values that did not change keep their previous `Arc`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ThreadUpdate {
    pub messages: bool,
    pub capabilities: bool,
    pub suggestions: bool,
    pub extras: bool,
    pub run_event: Option<RunEvent>,
}

impl ThreadUpdate {
    pub fn is_unchanged(&self) -> bool {
        *self == ThreadUpdate::default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    /// Nothing to show yet
    Idle,
    /// A response is on its way
    Streaming,
    Settled,
}

/// Whether the host is running but has not produced the assistant reply yet
pub fn has_upcoming_message(is_running: bool, messages: &[Arc<Message>]) -> bool {
    is_running && messages.last().map(|m| m.role) != Some(Role::Assistant)
}

fn same_elements<T>(a: &[Arc<T>], b: &[Arc<T>]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(a, b)| Arc::ptr_eq(a, b))
}

type Listener = Box<dyn Fn(&ThreadUpdate) + Send + Sync>;

/// A subscription handle returned by [`ExternalStoreThread::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// A thread whose messages live in the host's store
pub struct ExternalStoreThread<T> {
    store: Option<Arc<ExternalStoreAdapter<T>>>,
    repository: MessageRepository,
    /// Converted message per host record, keyed by the record's address
    converted: HashMap<usize, (Arc<T>, Arc<Message>)>,
    /// Host records behind each canonical message id
    sources: HashMap<String, Arc<T>>,
    optimistic_id: Option<String>,
    messages: Arc<[Arc<Message>]>,
    capabilities: Arc<RuntimeCapabilities>,
    suggestions: Arc<[Suggestion]>,
    extras: Option<Arc<Value>>,
    composer_text: String,
    listeners: Vec<(SubscriptionId, Listener)>,
    next_subscription: u64,
}

/// Everything `set_adapter` may touch before a snapshot is known to be good
struct SavedState<T> {
    store: Option<Arc<ExternalStoreAdapter<T>>>,
    repository: MessageRepository,
    converted: HashMap<usize, (Arc<T>, Arc<Message>)>,
    sources: HashMap<String, Arc<T>>,
    optimistic_id: Option<String>,
    capabilities: Arc<RuntimeCapabilities>,
    suggestions: Arc<[Suggestion]>,
    extras: Option<Arc<Value>>,
}

impl<T> Default for ExternalStoreThread<T> {
    fn default() -> Self {
        ExternalStoreThread {
            store: None,
            repository: MessageRepository::new(),
            converted: HashMap::new(),
            sources: HashMap::new(),
            optimistic_id: None,
            messages: Arc::from(Vec::new()),
            capabilities: Arc::new(RuntimeCapabilities::default()),
            suggestions: Arc::from(Vec::new()),
            extras: None,
            composer_text: String::new(),
            listeners: Vec::new(),
            next_subscription: 0,
        }
    }
}

impl<T> ExternalStoreThread<T> {
    pub fn new(store: Arc<ExternalStoreAdapter<T>>) -> ThreadResult<Self> {
        let mut thread = Self::default();
        thread.set_adapter(store)?;
        Ok(thread)
    }

    pub fn messages(&self) -> Arc<[Arc<Message>]> {
        Arc::clone(&self.messages)
    }

    pub fn capabilities(&self) -> Arc<RuntimeCapabilities> {
        Arc::clone(&self.capabilities)
    }

    pub fn suggestions(&self) -> Arc<[Suggestion]> {
        Arc::clone(&self.suggestions)
    }

    pub fn extras(&self) -> Option<Arc<Value>> {
        self.extras.clone()
    }

    pub fn repository(&self) -> &MessageRepository {
        &self.repository
    }

    pub fn optimistic_id(&self) -> Option<&str> {
        self.optimistic_id.as_deref()
    }

    pub fn is_running(&self) -> bool {
        self.store.as_ref().is_some_and(|store| store.is_running)
    }

    pub fn is_disabled(&self) -> bool {
        self.store.as_ref().is_some_and(|store| store.is_disabled)
    }

    pub fn is_loading(&self) -> bool {
        self.store.as_ref().is_some_and(|store| store.is_loading)
    }

    pub fn state(&self) -> ThreadState {
        if self.optimistic_id.is_some() || self.is_running() {
            ThreadState::Streaming
        } else if self.messages.is_empty() {
            ThreadState::Idle
        } else {
            ThreadState::Settled
        }
    }

    pub fn composer_text(&self) -> &str {
        &self.composer_text
    }

    pub fn set_composer_text<S: Into<String>>(&mut self, text: S) {
        self.composer_text = text.into();
    }

    /// The host records a canonical message was converted from
    pub fn source_record(&self, message_id: &str) -> Option<&Arc<T>> {
        self.sources.get(message_id)
    }

    pub fn subscribe<F>(&mut self, listener: F) -> SubscriptionId
    where
        F: Fn(&ThreadUpdate) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_subscription);
        self.next_subscription += 1;
        self.listeners.push((id, Box::new(listener)));
        id
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) {
        self.listeners.retain(|(listener_id, _)| *listener_id != id);
    }

    fn notify(&self, update: &ThreadUpdate) {
        for (_, listener) in &self.listeners {
            listener(update);
        }
    }

    fn store(&self) -> ThreadResult<&Arc<ExternalStoreAdapter<T>>> {
        self.store
            .as_ref()
            .ok_or_else(|| ThreadError::Callback("no store adapter has been set".to_string()))
    }

    /// Apply a new host snapshot.
    ///
    /// Snapshots that share the previous records (or repository) and running
    /// flag only refresh capabilities, suggestions and extras.
    ///
    /// A snapshot that fails to convert or apply leaves the thread exactly as
    /// it was, so the same records are converted again on the next call.
    pub fn set_adapter(&mut self, store: Arc<ExternalStoreAdapter<T>>) -> ThreadResult<ThreadUpdate> {
        if let Some(old) = &self.store {
            if Arc::ptr_eq(old, &store) {
                let update = ThreadUpdate::default();
                self.notify(&update);
                return Ok(update);
            }
        }

        let saved = SavedState {
            store: self.store.clone(),
            repository: self.repository.clone(),
            converted: self.converted.clone(),
            sources: self.sources.clone(),
            optimistic_id: self.optimistic_id.clone(),
            capabilities: Arc::clone(&self.capabilities),
            suggestions: Arc::clone(&self.suggestions),
            extras: self.extras.clone(),
        };
        match self.apply_snapshot(store) {
            Ok(update) => {
                self.notify(&update);
                Ok(update)
            }
            Err(err) => {
                warn!(error = %err, "store snapshot rejected, keeping previous state");
                self.store = saved.store;
                self.repository = saved.repository;
                self.converted = saved.converted;
                self.sources = saved.sources;
                self.optimistic_id = saved.optimistic_id;
                self.capabilities = saved.capabilities;
                self.suggestions = saved.suggestions;
                self.extras = saved.extras;
                Err(err)
            }
        }
    }

    fn apply_snapshot(&mut self, store: Arc<ExternalStoreAdapter<T>>) -> ThreadResult<ThreadUpdate> {
        let mut update = ThreadUpdate::default();
        let capabilities = store.capabilities();
        if *self.capabilities != capabilities {
            self.capabilities = Arc::new(capabilities);
            update.capabilities = true;
        }
        if *self.suggestions != *store.suggestions {
            self.suggestions = Arc::clone(&store.suggestions);
            update.suggestions = true;
        }
        let extras_equal = match (&self.extras, &store.extras) {
            (None, None) => true,
            (Some(old), Some(new)) => Arc::ptr_eq(old, new) || old == new,
            _ => false,
        };
        if !extras_equal {
            self.extras = store.extras.clone();
            update.extras = true;
        }

        let old = self.store.replace(Arc::clone(&store));
        let was_running = old.as_ref().is_some_and(|old| old.is_running);
        let is_running = store.is_running;

        let messages = match (&store.messages, old.as_ref().map(|old| &old.messages)) {
            (StoreMessages::Repository(repository), previous) => {
                if let Some(StoreMessages::Repository(previous)) = previous {
                    if was_running == is_running && Arc::ptr_eq(previous, repository) {
                        return Ok(update);
                    }
                }
                self.repository.clear();
                self.optimistic_id = None;
                self.converted.clear();
                self.sources.clear();
                self.repository.import(repository)?;
                self.repository.messages()
            }
            (StoreMessages::Records { records, convert }, previous) => {
                if let Some(StoreMessages::Records {
                    records: previous_records,
                    convert: previous_convert,
                }) = previous
                {
                    if !Arc::ptr_eq(previous_convert, convert) {
                        debug!("convert function changed, clearing conversion cache");
                        self.converted.clear();
                    } else if was_running == is_running && Arc::ptr_eq(previous_records, records) {
                        return Ok(update);
                    }
                }
                let messages = self.convert_records(records, convert, is_running)?;
                let mut parent: Option<&str> = None;
                for message in &messages {
                    self.repository
                        .add_or_update_message(parent, Arc::clone(message))?;
                    parent = Some(&message.id);
                }
                messages.into()
            }
        };

        if was_running != is_running {
            update.run_event = Some(if is_running {
                RunEvent::RunStart
            } else {
                RunEvent::RunEnd
            });
        }

        if let Some(id) = self.optimistic_id.take() {
            self.repository.delete_message(&id)?;
            debug!(id = %id, "removed optimistic message");
        }
        let last_id = messages.last().map(|message| message.id.clone());
        if has_upcoming_message(is_running, &messages) {
            let id = self
                .repository
                .append_optimistic_message(last_id.as_deref(), MessageLike::new(Role::Assistant))?;
            self.optimistic_id = Some(id);
        }
        let head = self.optimistic_id.clone().or(last_id);
        self.repository.reset_head(head.as_deref())?;

        update.messages = self.refresh_messages();
        debug!(
            messages = self.messages.len(),
            running = is_running,
            optimistic = self.optimistic_id.is_some(),
            "applied store snapshot"
        );
        Ok(update)
    }

    fn convert_records(
        &mut self,
        records: &Arc<[Arc<T>]>,
        convert: &ConvertMessageFn<T>,
        is_running: bool,
    ) -> ThreadResult<Vec<Arc<Message>>> {
        let last = records.len().saturating_sub(1);
        let mut converted = HashMap::with_capacity(records.len());
        let mut sources = HashMap::with_capacity(records.len());
        let mut messages = Vec::with_capacity(records.len());

        for (idx, record) in records.iter().enumerate() {
            let key = Arc::as_ptr(record) as usize;
            let auto_status = get_auto_status(idx == last, is_running);
            let cached = self.converted.get(&key).map(|(_, message)| message).filter(|message| {
                message.role != Role::Assistant
                    || !is_auto_status(&message.status)
                    || message.status == auto_status
            });
            let message = match cached {
                Some(message) => Arc::clone(message),
                None => match convert(record, idx)? {
                    ConvertedMessage::Ready(message) => message,
                    ConvertedMessage::Like(like) => {
                        Arc::new(like.into_message(&idx.to_string(), auto_status)?)
                    }
                },
            };
            converted.insert(key, (Arc::clone(record), Arc::clone(&message)));
            sources.insert(message.id.clone(), Arc::clone(record));
            messages.push(message);
        }

        self.converted = converted;
        self.sources = sources;
        Ok(messages)
    }

    /// Pick up the repository's head path, keeping the previous slice when
    /// nothing in it changed
    fn refresh_messages(&mut self) -> bool {
        let messages = self.repository.messages();
        if same_elements(&self.messages, &messages) {
            return false;
        }
        self.messages = messages;
        true
    }

    /// Hand the current head path back to the host as records
    fn sync_to_host(&self) -> ThreadResult<()> {
        let store = self.store()?;
        let Some(set_messages) = &store.set_messages else {
            return Ok(());
        };
        if matches!(store.messages, StoreMessages::Repository(_)) {
            debug!("store keeps a repository, skipping message sync");
            return Ok(());
        }
        let records = self
            .repository
            .messages()
            .iter()
            .filter_map(|message| self.sources.get(&message.id).cloned())
            .collect();
        set_messages(records).map_err(ThreadError::callback)
    }

    pub fn switch_to_branch(&mut self, branch_id: &str) -> ThreadResult<()> {
        if self.store()?.set_messages.is_none() {
            return Err(ThreadError::Unsupported(Capability::SwitchToBranch));
        }
        self.repository.switch_to_branch(branch_id)?;
        let update = ThreadUpdate {
            messages: self.refresh_messages(),
            ..Default::default()
        };
        self.notify(&update);
        self.sync_to_host()
    }

    /// Send a composed message; one that does not continue the current head
    /// is an edit
    pub fn append(&self, message: &AppendMessage) -> ThreadResult<()> {
        let store = self.store()?;
        let head = self.messages.last().map(|m| m.id.as_str());
        if message.parent_id.as_deref() != head {
            let on_edit = store
                .on_edit
                .as_ref()
                .ok_or(ThreadError::Unsupported(Capability::Edit))?;
            on_edit(message).map_err(ThreadError::callback)
        } else {
            (store.on_new)(message).map_err(ThreadError::callback)
        }
    }

    pub fn start_run(&self, config: &StartRunConfig) -> ThreadResult<()> {
        let on_reload = self
            .store()?
            .on_reload
            .as_ref()
            .ok_or(ThreadError::Unsupported(Capability::Reload))?;
        on_reload(config).map_err(ThreadError::callback)
    }

    pub fn resume_run(&self) -> ThreadResult<()> {
        Err(ThreadError::Unsupported(Capability::Resume))
    }

    pub fn add_tool_result(&self, result: &AddToolResult) -> ThreadResult<()> {
        let on_add_tool_result = self
            .store()?
            .on_add_tool_result
            .as_ref()
            .ok_or(ThreadError::Unsupported(Capability::ToolResults))?;
        on_add_tool_result(result).map_err(ThreadError::callback)
    }

    /// Cancel the current run.
    ///
    /// The optimistic placeholder is dropped. A trailing user message without
    /// a reply is removed too, and its text moves back into an empty composer.
    /// Only a missing cancel callback is an error; failures during cleanup are
    /// logged.
    pub fn cancel_run(&mut self) -> ThreadResult<()> {
        let on_cancel = self
            .store()?
            .on_cancel
            .clone()
            .ok_or(ThreadError::Unsupported(Capability::Cancel))?;
        if let Err(err) = on_cancel() {
            warn!(error = %err, "host cancel callback failed");
        }

        if let Some(id) = self.optimistic_id.take() {
            if let Err(err) = self.repository.delete_message(&id) {
                warn!(error = %err, "failed to remove optimistic message");
            }
        }

        let messages = self.repository.messages();
        if let Some(previous) = messages.last() {
            let is_leaf = self
                .repository
                .children(&previous.id)
                .map(|children| children.is_empty())
                .unwrap_or(false);
            if previous.role == Role::User && is_leaf {
                match self.repository.delete_message(&previous.id) {
                    Ok(()) => {
                        if self.composer_text.trim().is_empty() {
                            self.composer_text = previous.text();
                        }
                    }
                    Err(err) => warn!(error = %err, "failed to remove unanswered user message"),
                }
            }
        }

        let update = ThreadUpdate {
            messages: self.refresh_messages(),
            ..Default::default()
        };
        self.notify(&update);
        if let Err(err) = self.sync_to_host() {
            warn!(error = %err, "failed to resync messages after cancel");
        }
        Ok(())
    }
}
