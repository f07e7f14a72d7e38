use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;

use super::extract::{extract_run_telemetry, RunTelemetry};
use super::{RunStatus, TelemetryToolCall};
use crate::providers::ai_sdk::UiMessage;

/// The payload accepted by the runs endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub thread_id: String,
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_steps: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<TelemetryToolCall>>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_count"
    )]
    pub input_tokens: Option<f64>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_count"
    )]
    pub output_tokens: Option<f64>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_count"
    )]
    pub reasoning_tokens: Option<f64>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_count"
    )]
    pub cached_input_tokens: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}

/// Whole token counts go out as JSON integers
fn serialize_count<S: Serializer>(count: &Option<f64>, serializer: S) -> Result<S::Ok, S::Error> {
    match count {
        Some(count) if count.fract() == 0.0 && *count >= 0.0 && *count <= u64::MAX as f64 => {
            serializer.serialize_u64(*count as u64)
        }
        Some(count) => serializer.serialize_f64(*count),
        None => serializer.serialize_none(),
    }
}

impl RunReport {
    pub fn new<S: Into<String>>(thread_id: S, telemetry: &RunTelemetry) -> Self {
        RunReport {
            thread_id: thread_id.into(),
            status: telemetry.status,
            total_steps: telemetry.total_steps,
            tool_calls: (!telemetry.tool_calls.is_empty()).then(|| telemetry.tool_calls.clone()),
            input_tokens: telemetry.input_tokens,
            output_tokens: telemetry.output_tokens,
            reasoning_tokens: telemetry.reasoning_tokens,
            cached_input_tokens: telemetry.cached_input_tokens,
            model_id: telemetry.model_id.clone(),
            output_text: telemetry.output_text.clone(),
            metadata: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReceipt {
    pub run_id: String,
}

/// Where run reports are delivered
#[async_trait]
pub trait RunReportSink: Send + Sync {
    async fn report(&self, report: &RunReport) -> Result<RunReceipt>;
}

#[async_trait]
impl<S: RunReportSink + ?Sized> RunReportSink for Arc<S> {
    async fn report(&self, report: &RunReport) -> Result<RunReceipt> {
        (**self).report(report).await
    }
}

/// Posts reports to `{base_url}/v1/runs`
pub struct HttpRunSink {
    client: Client,
    base_url: String,
    api_key: String,
}

impl HttpRunSink {
    pub fn new<U: Into<String>, K: Into<String>>(base_url: U, api_key: K) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
        })
    }
}

#[async_trait]
impl RunReportSink for HttpRunSink {
    async fn report(&self, report: &RunReport) -> Result<RunReceipt> {
        let url = format!("{}/v1/runs", self.base_url.trim_end_matches('/'));

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(report)
            .send()
            .await?;

        match response.status() {
            StatusCode::OK | StatusCode::CREATED => Ok(response.json().await?),
            status => Err(anyhow!(
                "Run report failed: {}\nBody: {}",
                status,
                response.text().await.unwrap_or_default()
            )),
        }
    }
}

/// Rewrites a report before it is sent, or returns `None` to drop it
pub type BeforeReportFn = Arc<dyn Fn(RunReport) -> Option<RunReport> + Send + Sync>;

/// Reports each finished assistant message of a thread once.
pub struct TelemetryReporter<S> {
    sink: S,
    enabled: bool,
    before_report: Option<BeforeReportFn>,
    reported: Mutex<HashSet<String>>,
}

impl<S: RunReportSink> TelemetryReporter<S> {
    pub fn new(sink: S) -> Self {
        TelemetryReporter {
            sink,
            enabled: true,
            before_report: None,
            reported: Mutex::new(HashSet::new()),
        }
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_before_report<F>(mut self, before_report: F) -> Self
    where
        F: Fn(RunReport) -> Option<RunReport> + Send + Sync + 'static,
    {
        self.before_report = Some(Arc::new(before_report));
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Report the run that produced the last assistant message of `messages`.
    ///
    /// Returns the receipt when a report was delivered. Nothing is sent when
    /// telemetry is disabled, the thread has no assistant message, the
    /// message was already reported, or the `before_report` hook dropped it.
    /// Delivery failures are logged and otherwise ignored.
    pub async fn report_from_messages(
        &self,
        thread_id: &str,
        messages: &[UiMessage],
    ) -> Option<RunReceipt> {
        if !self.enabled {
            return None;
        }
        let telemetry = extract_run_telemetry(messages)?;

        let dedupe_key = format!("{}:{}", thread_id, telemetry.assistant_message_id);
        if self.reported().contains(&dedupe_key) {
            return None;
        }

        let initial = RunReport::new(thread_id, &telemetry);
        let report = match &self.before_report {
            Some(before_report) => before_report(initial)?,
            None => initial,
        };

        self.reported().insert(dedupe_key);
        match self.sink.report(&report).await {
            Ok(receipt) => Some(receipt),
            Err(err) => {
                debug!(thread_id, error = %err, "Run report failed");
                None
            }
        }
    }

    fn reported(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        self.reported.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::ai_sdk::UiPart;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Default)]
    struct RecordingSink {
        reports: Mutex<Vec<RunReport>>,
        fail: bool,
    }

    impl RecordingSink {
        fn failing() -> Self {
            RecordingSink {
                fail: true,
                ..Default::default()
            }
        }

        fn reports(&self) -> Vec<RunReport> {
            self.reports.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl RunReportSink for RecordingSink {
        async fn report(&self, report: &RunReport) -> Result<RunReceipt> {
            self.reports.lock().unwrap().push(report.clone());
            if self.fail {
                return Err(anyhow!("network down"));
            }
            Ok(RunReceipt {
                run_id: format!("run-{}", self.reports.lock().unwrap().len()),
            })
        }
    }

    fn thread(message_id: &str) -> Vec<UiMessage> {
        vec![
            UiMessage::new("u-1", "user").with_part(UiPart::text("weather?")),
            UiMessage::new(message_id, "assistant")
                .with_part(UiPart::new("step-start"))
                .with_part(
                    UiPart::tool("weather", "c-1", "output-available")
                        .with_input(json!({"city": "Oslo"}))
                        .with_output(json!({"temp": 4})),
                )
                .with_part(UiPart::text("It is 4 degrees."))
                .with_metadata(json!({
                    "modelId": "gpt-4o",
                    "usage": {"inputTokens": 20, "outputTokens": 8}
                })),
        ]
    }

    #[tokio::test]
    async fn test_disabled_reporter_sends_nothing() {
        let sink = Arc::new(RecordingSink::default());
        let reporter = TelemetryReporter::new(Arc::clone(&sink)).with_enabled(false);
        assert_eq!(reporter.report_from_messages("t-1", &thread("a-1")).await, None);
        assert!(sink.reports().is_empty());
    }

    #[tokio::test]
    async fn test_report_payload() {
        let sink = Arc::new(RecordingSink::default());
        let reporter = TelemetryReporter::new(Arc::clone(&sink));
        let receipt = reporter.report_from_messages("t-1", &thread("a-1")).await;
        assert_eq!(receipt.map(|r| r.run_id), Some("run-1".to_string()));

        let reports = sink.reports();
        assert_eq!(reports.len(), 1);
        assert_eq!(
            serde_json::to_value(&reports[0]).unwrap(),
            json!({
                "thread_id": "t-1",
                "status": "completed",
                "total_steps": 1,
                "tool_calls": [{
                    "tool_name": "weather",
                    "tool_call_id": "c-1",
                    "tool_args": "{\"city\":\"Oslo\"}",
                    "tool_result": "{\"temp\":4}"
                }],
                "input_tokens": 20,
                "output_tokens": 8,
                "model_id": "gpt-4o",
                "output_text": "It is 4 degrees."
            })
        );
    }

    #[tokio::test]
    async fn test_before_report_can_rewrite_or_drop() {
        let sink = Arc::new(RecordingSink::default());
        let reporter = TelemetryReporter::new(Arc::clone(&sink)).with_before_report(|mut report| {
            report.output_text = None;
            let mut metadata = Map::new();
            metadata.insert("tenant".into(), json!("acme"));
            report.metadata = Some(metadata);
            Some(report)
        });
        reporter.report_from_messages("t-1", &thread("a-1")).await;
        let reports = sink.reports();
        assert_eq!(reports[0].output_text, None);
        assert_eq!(reports[0].metadata.as_ref().unwrap()["tenant"], "acme");

        let sink = Arc::new(RecordingSink::default());
        let reporter = TelemetryReporter::new(Arc::clone(&sink)).with_before_report(|_| None);
        assert_eq!(reporter.report_from_messages("t-1", &thread("a-1")).await, None);
        assert!(sink.reports().is_empty());
    }

    #[tokio::test]
    async fn test_sink_failure_is_swallowed() {
        let sink = Arc::new(RecordingSink::failing());
        let reporter = TelemetryReporter::new(Arc::clone(&sink));
        assert_eq!(reporter.report_from_messages("t-1", &thread("a-1")).await, None);
        assert_eq!(sink.reports().len(), 1);

        // a failed delivery still counts as reported
        reporter.report_from_messages("t-1", &thread("a-1")).await;
        assert_eq!(sink.reports().len(), 1);
    }

    #[tokio::test]
    async fn test_dedupe_by_thread_and_message() {
        let sink = Arc::new(RecordingSink::default());
        let reporter = TelemetryReporter::new(Arc::clone(&sink));
        reporter.report_from_messages("t-1", &thread("a-1")).await;
        reporter.report_from_messages("t-1", &thread("a-1")).await;
        assert_eq!(sink.reports().len(), 1);

        reporter.report_from_messages("t-1", &thread("a-2")).await;
        reporter.report_from_messages("t-2", &thread("a-1")).await;
        assert_eq!(sink.reports().len(), 3);
    }

    #[test]
    fn test_token_counts_on_the_wire() {
        let report = RunReport {
            thread_id: "t-1".into(),
            status: RunStatus::Completed,
            total_steps: None,
            tool_calls: None,
            input_tokens: Some(20.0),
            output_tokens: Some(12.5),
            reasoning_tokens: None,
            cached_input_tokens: None,
            model_id: None,
            output_text: None,
            metadata: None,
        };
        assert_eq!(
            serde_json::to_value(&report).unwrap(),
            json!({
                "thread_id": "t-1",
                "status": "completed",
                "input_tokens": 20,
                "output_tokens": 12.5
            })
        );
    }

    #[tokio::test]
    async fn test_http_sink_posts_report() -> Result<()> {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/runs"))
            .and(header("Authorization", "Bearer sk-test"))
            .and(body_json(json!({"thread_id": "t-1", "status": "incomplete"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"run_id": "run-42"})))
            .expect(1)
            .mount(&mock_server)
            .await;

        let sink = HttpRunSink::new(format!("{}/", mock_server.uri()), "sk-test")?;
        let report = RunReport {
            thread_id: "t-1".into(),
            status: RunStatus::Incomplete,
            total_steps: None,
            tool_calls: None,
            input_tokens: None,
            output_tokens: None,
            reasoning_tokens: None,
            cached_input_tokens: None,
            model_id: None,
            output_text: None,
            metadata: None,
        };
        let receipt = sink.report(&report).await?;
        assert_eq!(receipt.run_id, "run-42");
        Ok(())
    }

    #[tokio::test]
    async fn test_http_sink_surfaces_errors() -> Result<()> {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/runs"))
            .respond_with(ResponseTemplate::new(422).set_body_string("bad status"))
            .mount(&mock_server)
            .await;

        let sink = HttpRunSink::new(mock_server.uri(), "sk-test")?;
        let telemetry = extract_run_telemetry(&thread("a-1")).unwrap();
        let err = sink.report(&RunReport::new("t-1", &telemetry)).await.unwrap_err();
        assert!(err.to_string().contains("422"));
        Ok(())
    }
}
