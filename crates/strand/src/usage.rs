//! Token usage extraction for assistant messages.
//!
//! Upstream usage arrives as loosely typed JSON in one of three places: the
//! message's own `usage`, the older `custom.usage`, or per-step records. A
//! total is only ever reported when it is explicit or when both input and
//! output counts are known.
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use crate::models::message::Message;
use crate::models::role::Role;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TokenUsage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_tokens: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cached_input_tokens: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<f64>,
}

impl TokenUsage {
    pub fn is_empty(&self) -> bool {
        *self == TokenUsage::default()
    }

    /// The same usage with `total_tokens` filled in when it can be computed
    pub fn with_computed_total(mut self) -> Self {
        self.total_tokens = compute_total(&self);
        self
    }

    fn detail_fields_mut(&mut self) -> [&mut Option<f64>; 4] {
        [
            &mut self.input_tokens,
            &mut self.output_tokens,
            &mut self.reasoning_tokens,
            &mut self.cached_input_tokens,
        ]
    }

    fn detail_fields(&self) -> [Option<f64>; 4] {
        [
            self.input_tokens,
            self.output_tokens,
            self.reasoning_tokens,
            self.cached_input_tokens,
        ]
    }
}

/// A finite, non-negative token count. Fractional counts are kept as is.
fn token_count(value: Option<&Value>) -> Option<f64> {
    let count = value?.as_f64()?;
    (count.is_finite() && count >= 0.0).then_some(count)
}

/// Pick the recognized token counts out of a loose usage bag.
///
/// Returns `None` when the value is not an object or carries none of the
/// five fields, so "no usage" stays distinct from "all zero".
pub fn normalize_usage(raw: &Value) -> Option<TokenUsage> {
    let record = raw.as_object()?;
    let usage = TokenUsage {
        input_tokens: token_count(record.get("inputTokens")),
        output_tokens: token_count(record.get("outputTokens")),
        reasoning_tokens: token_count(record.get("reasoningTokens")),
        cached_input_tokens: token_count(record.get("cachedInputTokens")),
        total_tokens: token_count(record.get("totalTokens")),
    };
    (!usage.is_empty()).then_some(usage)
}

/// Explicit total, else input + output when both are known
pub fn compute_total(usage: &TokenUsage) -> Option<f64> {
    if let Some(total) = usage.total_tokens {
        return Some(total);
    }
    match (usage.input_tokens, usage.output_tokens) {
        (Some(input), Some(output)) => Some(input + output),
        _ => None,
    }
}

/// Sum the usage of every step record that carries a `usage` bag.
///
/// Detail fields are summed independently. The aggregate total is present
/// only when every step with usage had a computable total.
pub fn aggregate_steps(steps: &[Value]) -> Option<TokenUsage> {
    let mut aggregate = TokenUsage::default();
    let mut total_sum = 0.0;
    let mut steps_with_usage = 0usize;
    let mut steps_with_total = 0usize;

    for step in steps {
        let Some(usage) = step.get("usage").and_then(normalize_usage) else {
            continue;
        };
        steps_with_usage += 1;

        if let Some(total) = compute_total(&usage) {
            total_sum += total;
            steps_with_total += 1;
        }

        for (sum, count) in aggregate
            .detail_fields_mut()
            .into_iter()
            .zip(usage.detail_fields())
        {
            if let Some(count) = count {
                *sum = Some(sum.unwrap_or(0.0) + count);
            }
        }
    }

    if steps_with_usage == 0 {
        return None;
    }
    if steps_with_total == steps_with_usage {
        aggregate.total_tokens = Some(total_sum);
    }
    Some(aggregate)
}

/// Token usage of an assistant message.
///
/// Looks at `metadata.usage`, then the legacy `metadata.custom.usage`, then
/// falls back to aggregating `metadata.steps`.
pub fn message_token_usage(message: &Message) -> Option<TokenUsage> {
    if message.role != Role::Assistant {
        return None;
    }
    let metadata = &message.metadata;

    if let Some(usage) = metadata.usage.as_ref().and_then(normalize_usage) {
        return Some(usage.with_computed_total());
    }
    if let Some(usage) = metadata.custom.get("usage").and_then(normalize_usage) {
        return Some(usage.with_computed_total());
    }
    aggregate_steps(&metadata.steps)
}

/// Usage of the last assistant message in a thread
pub fn thread_token_usage(messages: &[Arc<Message>]) -> Option<TokenUsage> {
    messages
        .iter()
        .rev()
        .find(|message| message.role == Role::Assistant)
        .and_then(|message| message_token_usage(message))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::message::MessageMetadata;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn assistant(metadata: Value) -> Message {
        let metadata: MessageMetadata = serde_json::from_value(metadata).unwrap();
        Message::assistant("a-1").with_metadata(metadata)
    }

    #[test]
    fn test_fallback_total_ignores_reasoning_and_cached() {
        let usage = message_token_usage(&assistant(json!({
            "usage": {
                "inputTokens": 4,
                "outputTokens": 6,
                "reasoningTokens": 9,
                "cachedInputTokens": 3
            }
        })));
        assert_eq!(
            usage,
            Some(TokenUsage {
                input_tokens: Some(4.0),
                output_tokens: Some(6.0),
                reasoning_tokens: Some(9.0),
                cached_input_tokens: Some(3.0),
                total_tokens: Some(10.0),
            })
        );
    }

    #[test]
    fn test_total_only_is_not_split() {
        let usage = message_token_usage(&assistant(json!({"usage": {"totalTokens": 12}})));
        assert_eq!(
            usage,
            Some(TokenUsage {
                total_tokens: Some(12.0),
                ..Default::default()
            })
        );
    }

    #[test]
    fn test_partial_usage_has_no_total() {
        let usage = message_token_usage(&assistant(json!({"usage": {"inputTokens": 10}})));
        assert_eq!(
            usage,
            Some(TokenUsage {
                input_tokens: Some(10.0),
                ..Default::default()
            })
        );

        let usage = message_token_usage(&assistant(json!({
            "usage": {"reasoningTokens": 7, "cachedInputTokens": 2}
        })));
        assert_eq!(usage.and_then(|u| u.total_tokens), None);
    }

    #[test]
    fn test_normalize_rejects_invalid_counts() {
        assert_eq!(normalize_usage(&json!("nope")), None);
        assert_eq!(normalize_usage(&json!({"inputTokens": -1})), None);
        assert_eq!(normalize_usage(&json!({"inputTokens": "5"})), None);
        assert_eq!(normalize_usage(&json!({"other": 5})), None);
        assert_eq!(
            normalize_usage(&json!({"inputTokens": 0})),
            Some(TokenUsage {
                input_tokens: Some(0.0),
                ..Default::default()
            })
        );
        assert_eq!(
            normalize_usage(&json!({"outputTokens": 3.0})).and_then(|u| u.output_tokens),
            Some(3.0)
        );
    }

    #[test]
    fn test_fractional_counts_are_kept() {
        let usage = message_token_usage(&assistant(json!({
            "usage": {"inputTokens": 1.5, "outputTokens": 2.25}
        })));
        assert_eq!(
            usage,
            Some(TokenUsage {
                input_tokens: Some(1.5),
                output_tokens: Some(2.25),
                total_tokens: Some(3.75),
                ..Default::default()
            })
        );

        let steps = [
            json!({"usage": {"inputTokens": 0.5, "outputTokens": 1.0}}),
            json!({"usage": {"totalTokens": 2.5}}),
        ];
        let usage = aggregate_steps(&steps);
        assert_eq!(usage.and_then(|u| u.total_tokens), Some(4.0));
        assert_eq!(usage.and_then(|u| u.input_tokens), Some(0.5));
        assert_eq!(normalize_usage(&json!({"inputTokens": -0.5})), None);
    }

    #[test]
    fn test_steps_aggregate_without_inflating_totals() {
        let steps = [
            json!({"usage": {"inputTokens": 3, "outputTokens": 2, "reasoningTokens": 11}}),
            json!({"usage": {"inputTokens": 4, "outputTokens": 1, "reasoningTokens": 13}}),
        ];
        assert_eq!(
            aggregate_steps(&steps),
            Some(TokenUsage {
                total_tokens: Some(10.0),
                input_tokens: Some(7.0),
                output_tokens: Some(3.0),
                reasoning_tokens: Some(24.0),
                cached_input_tokens: None,
            })
        );
    }

    #[test]
    fn test_steps_without_computable_total_omit_total() {
        let steps = [
            json!({"usage": {"inputTokens": 5, "outputTokens": 5}}),
            json!({"usage": {"reasoningTokens": 10}}),
        ];
        assert_eq!(
            aggregate_steps(&steps),
            Some(TokenUsage {
                input_tokens: Some(5.0),
                output_tokens: Some(5.0),
                reasoning_tokens: Some(10.0),
                ..Default::default()
            })
        );

        let steps = [
            json!({"usage": {"totalTokens": 10}}),
            json!({"usage": {"inputTokens": 3}}),
        ];
        assert_eq!(
            aggregate_steps(&steps),
            Some(TokenUsage {
                input_tokens: Some(3.0),
                ..Default::default()
            })
        );
    }

    #[test]
    fn test_steps_with_explicit_totals_are_summed() {
        let steps = [
            json!({"usage": {"inputTokens": 5, "outputTokens": 5}}),
            json!({"type": "step-start"}),
            json!({"usage": {"totalTokens": 15}}),
        ];
        let usage = aggregate_steps(&steps);
        assert_eq!(usage.and_then(|u| u.total_tokens), Some(25.0));
        assert_eq!(aggregate_steps(&[json!({"type": "step-start"})]), None);
    }

    #[test]
    fn test_legacy_custom_usage_fallback() {
        let usage = message_token_usage(&assistant(json!({
            "custom": {"usage": {"inputTokens": 4, "outputTokens": 6}}
        })));
        assert_eq!(
            usage,
            Some(TokenUsage {
                total_tokens: Some(10.0),
                input_tokens: Some(4.0),
                output_tokens: Some(6.0),
                ..Default::default()
            })
        );
    }

    #[test]
    fn test_direct_usage_wins_and_users_have_none() {
        let message = assistant(json!({
            "usage": {"totalTokens": 1},
            "custom": {"usage": {"totalTokens": 2}},
            "steps": [{"usage": {"totalTokens": 3}}]
        }));
        assert_eq!(message_token_usage(&message).and_then(|u| u.total_tokens), Some(1.0));

        let user = Message::user("u-1").with_metadata(message.metadata.clone());
        assert_eq!(message_token_usage(&user), None);

        let thread = vec![Arc::new(message), Arc::new(user)];
        assert_eq!(thread_token_usage(&thread).and_then(|u| u.total_tokens), Some(1.0));
    }
}
