//! Run telemetry for AI SDK threads.
//!
//! [`extract_run_telemetry`] summarizes the last assistant message of a
//! thread; [`TelemetryReporter`] turns that summary into a [`RunReport`] and
//! hands it to a [`RunReportSink`] at most once per thread and message.
mod extract;
mod reporter;

pub use extract::{extract_run_telemetry, RunTelemetry, MAX_SPAN_CONTENT};
pub use reporter::{
    BeforeReportFn, HttpRunSink, RunReceipt, RunReport, RunReportSink, TelemetryReporter,
};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Completed,
    Incomplete,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolSource {
    Mcp,
    Frontend,
    Backend,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryToolCall {
    pub tool_name: String,
    pub tool_call_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_args: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_source: Option<ToolSource>,
}
