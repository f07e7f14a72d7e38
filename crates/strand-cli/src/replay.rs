use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::fmt::Write;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use strand::converter::ExternalMessageConverter;
use strand::external_store::{ExternalStoreAdapter, ExternalStoreThread, ThreadUpdate};
use strand::models::message::Message;
use strand::models::status::MessageStatus;
use strand::providers::ai_sdk::{AiSdkMessageConverter, UiMessage};
use strand::providers::langchain::{convert_langchain_message, LangChainMessage};
use strand::telemetry::{HttpRunSink, RunReceipt, TelemetryReporter};
use strand::usage::thread_token_usage;

use crate::configuration::Settings;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Format {
    #[value(name = "ai-sdk")]
    AiSdk,
    #[value(name = "langchain")]
    LangChain,
}

/// One line of a recording: the host store at one instant
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot<T> {
    #[serde(default)]
    pub is_running: bool,
    pub messages: Vec<T>,
}

pub struct ReplayOutcome {
    pub messages: Arc<[Arc<Message>]>,
    pub is_running: bool,
    pub updates: Vec<ThreadUpdate>,
}

/// Reads a JSONL recording, skipping blank lines
pub fn read_snapshots<T: DeserializeOwned>(path: &Path) -> Result<Vec<Snapshot<T>>> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read recording {}", path.display()))?;

    contents
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| {
            serde_json::from_str(line)
                .with_context(|| format!("Invalid snapshot on line {}", idx + 1))
        })
        .collect()
}

/// Keeps the previous `Arc` for every record that did not change, the way a
/// host store hands unchanged records back between renders.
fn intern<T: PartialEq>(previous: &[Arc<T>], next: Vec<T>) -> Arc<[Arc<T>]> {
    next.into_iter()
        .enumerate()
        .map(|(idx, record)| match previous.get(idx) {
            Some(kept) if **kept == record => Arc::clone(kept),
            _ => Arc::new(record),
        })
        .collect::<Vec<_>>()
        .into()
}

fn drive<T, S, F>(snapshots: Vec<Snapshot<T>>, mut build: F) -> Result<ReplayOutcome>
where
    T: PartialEq,
    F: FnMut(&Arc<[Arc<T>]>, bool) -> Result<ExternalStoreAdapter<S>>,
{
    let mut previous: Arc<[Arc<T>]> = Vec::new().into();
    let mut thread: Option<ExternalStoreThread<S>> = None;
    let mut updates = Vec::new();

    for (idx, snapshot) in snapshots.into_iter().enumerate() {
        let records = intern(&previous, snapshot.messages);
        let adapter = Arc::new(build(&records, snapshot.is_running)?);
        match thread.as_mut() {
            Some(thread) => {
                let update = thread.set_adapter(adapter)?;
                tracing::info!(
                    snapshot = idx,
                    messages = update.messages,
                    capabilities = update.capabilities,
                    suggestions = update.suggestions,
                    run_event = ?update.run_event,
                    "applied snapshot"
                );
                updates.push(update);
            }
            None => {
                tracing::info!(snapshot = idx, records = records.len(), "thread created");
                thread = Some(ExternalStoreThread::new(adapter)?);
            }
        }
        previous = records;
    }

    let thread = thread.context("Recording contains no snapshots")?;
    Ok(ReplayOutcome {
        messages: thread.messages(),
        is_running: thread.is_running(),
        updates,
    })
}

pub fn replay_ai_sdk(snapshots: Vec<Snapshot<UiMessage>>) -> Result<ReplayOutcome> {
    let converter = Arc::new(AiSdkMessageConverter::new());
    let convert = converter.store_converter();
    drive(snapshots, |records, is_running| {
        Ok(
            ExternalStoreAdapter::from_converter(Arc::clone(records), Arc::clone(&convert), |_| {
                Ok(())
            })
            .running(is_running),
        )
    })
}

pub fn replay_langchain(snapshots: Vec<Snapshot<LangChainMessage>>) -> Result<ReplayOutcome> {
    let mut converter = ExternalMessageConverter::new(|message: &LangChainMessage| {
        convert_langchain_message(message)
    });
    drive(snapshots, |records, is_running| {
        let messages = converter.convert(records, is_running)?;
        Ok(ExternalStoreAdapter::from_thread_messages(messages, |_| Ok(())).running(is_running))
    })
}

fn status_label(status: &MessageStatus) -> String {
    match status {
        MessageStatus::Running => "running".to_string(),
        MessageStatus::RequiresAction { reason } => format!("requires-action: {:?}", reason),
        MessageStatus::Complete { reason } => format!("complete: {:?}", reason),
        MessageStatus::Incomplete { reason, .. } => format!("incomplete: {:?}", reason),
    }
}

/// Plain text view of the head branch
pub fn render(outcome: &ReplayOutcome) -> String {
    let mut out = String::new();
    let changed = outcome.updates.iter().filter(|update| update.messages).count();
    let _ = writeln!(
        out,
        "{} updates, {} changed messages",
        outcome.updates.len(),
        changed
    );
    for message in outcome.messages.iter() {
        let _ = writeln!(
            out,
            "{} {} [{}]",
            message.role,
            message.id,
            status_label(&message.status)
        );
        for call in message.tool_calls() {
            let _ = write!(out, "  -> {}({})", call.tool_name, call.args_text);
            match &call.result {
                Some(result) => {
                    let _ = writeln!(out, " = {}", result);
                }
                None => out.push('\n'),
            }
        }
        let text = message.text();
        if !text.is_empty() {
            let _ = writeln!(out, "  {}", text);
        }
    }

    if let Some(usage) = thread_token_usage(&outcome.messages) {
        let show = |value: Option<f64>| value.map_or("-".to_string(), |v| v.to_string());
        let _ = writeln!(
            out,
            "tokens: input={} output={} total={}",
            show(usage.input_tokens),
            show(usage.output_tokens),
            show(usage.total_tokens)
        );
    }
    if outcome.is_running {
        out.push_str("(run still in progress)\n");
    }
    out
}

/// Sends the run that ended in `messages` to the configured cloud endpoint
pub async fn report_run(
    settings: &Settings,
    thread_id: &str,
    messages: &[UiMessage],
) -> Result<Option<RunReceipt>> {
    let cloud = settings
        .cloud
        .as_ref()
        .context("Reporting requires STRAND_CLOUD__API_KEY to be set")?;
    let sink = HttpRunSink::new(cloud.base_url.as_str(), cloud.api_key.as_str())?;
    let reporter = TelemetryReporter::new(sink).with_enabled(settings.telemetry.enabled);
    Ok(reporter.report_from_messages(thread_id, messages).await)
}
