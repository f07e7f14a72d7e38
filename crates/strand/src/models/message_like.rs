use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::content::{dedupe_tool_calls, MessagePart};
use super::message::{Attachment, Message, MessageMetadata};
use super::role::Role;
use super::status::MessageStatus;
use crate::errors::ConversionError;

/// A loosely specified message as supplied by a host or a source converter.
///
/// Everything except the role and content is optional; missing values are
/// filled in by [`MessageLike::into_message`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageLike {
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub content: Vec<MessagePart>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<MessageStatus>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub metadata: MessageMetadata,
}

impl MessageLike {
    pub fn new(role: Role) -> Self {
        MessageLike {
            role,
            id: None,
            created_at: None,
            content: Vec::new(),
            status: None,
            attachments: Vec::new(),
            metadata: MessageMetadata::default(),
        }
    }

    pub fn with_id<S: Into<String>>(mut self, id: S) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_content(mut self, part: MessagePart) -> Self {
        self.content.push(part);
        self
    }

    pub fn with_text<S: Into<String>>(self, text: S) -> Self {
        self.with_content(MessagePart::text(text))
    }

    pub fn with_status(mut self, status: MessageStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Build the canonical message.
    ///
    /// `fallback_id` is used when the message has no id and `fallback_status`
    /// when an assistant message carries no status of its own. User and system
    /// messages are always complete.
    pub fn into_message(
        self,
        fallback_id: &str,
        fallback_status: MessageStatus,
    ) -> Result<Message, ConversionError> {
        let content = match self.role {
            Role::System => {
                let single_text = matches!(self.content.as_slice(), [MessagePart::Text(_)]);
                if !single_text {
                    return Err(ConversionError::InvalidSystemMessage);
                }
                self.content
            }
            Role::User => {
                for part in &self.content {
                    if matches!(
                        part,
                        MessagePart::Reasoning(_) | MessagePart::ToolCall(_) | MessagePart::Source(_)
                    ) {
                        return Err(ConversionError::UnsupportedPart {
                            role: self.role.to_string(),
                            part_type: part.part_type().to_string(),
                        });
                    }
                }
                self.content
            }
            Role::Assistant => dedupe_tool_calls(
                self.content.into_iter().map(fill_tool_call_args).collect(),
            ),
        };

        let status = match self.role {
            Role::Assistant => self.status.unwrap_or(fallback_status),
            Role::User | Role::System => MessageStatus::AUTO_COMPLETE,
        };

        Ok(Message {
            id: self.id.unwrap_or_else(|| fallback_id.to_string()),
            role: self.role,
            created_at: self.created_at.unwrap_or_else(Utc::now),
            content,
            status,
            attachments: self.attachments,
            metadata: self.metadata,
        })
    }
}

fn fill_tool_call_args(part: MessagePart) -> MessagePart {
    match part {
        MessagePart::ToolCall(mut call) => {
            if call.args.is_null() {
                call.args = serde_json::from_str(&call.args_text).unwrap_or_else(|_| json!({}));
            }
            if call.args_text.is_empty() {
                call.args_text = call.args.to_string();
            }
            MessagePart::ToolCall(call)
        }
        other => other,
    }
}

impl From<&Message> for MessageLike {
    fn from(message: &Message) -> Self {
        MessageLike {
            role: message.role,
            id: Some(message.id.clone()),
            created_at: Some(message.created_at),
            content: message.content.clone(),
            status: Some(message.status.clone()),
            attachments: message.attachments.clone(),
            metadata: message.metadata.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::content::ToolCallPart;
    use crate::models::status::{get_auto_status, CompleteReason};

    #[test]
    fn test_fallbacks_fill_missing_fields() -> anyhow::Result<()> {
        let message = MessageLike::new(Role::Assistant)
            .with_text("hi")
            .into_message("3", get_auto_status(true, true))?;
        assert_eq!(message.id, "3");
        assert_eq!(message.status, MessageStatus::Running);

        let explicit = MessageLike::new(Role::Assistant)
            .with_id("a-1")
            .with_status(MessageStatus::Complete {
                reason: CompleteReason::Stop,
            })
            .into_message("0", get_auto_status(true, true))?;
        assert_eq!(explicit.id, "a-1");
        assert!(!explicit.status.is_running());
        Ok(())
    }

    #[test]
    fn test_user_messages_reject_tool_calls() {
        let result = MessageLike::new(Role::User)
            .with_content(MessagePart::tool_call("c-1", "search", json!({})))
            .into_message("0", MessageStatus::AUTO_COMPLETE);
        assert!(matches!(
            result,
            Err(ConversionError::UnsupportedPart { ref part_type, .. }) if part_type == "tool-call"
        ));
    }

    #[test]
    fn test_system_message_needs_single_text_part() {
        let result = MessageLike::new(Role::System)
            .with_text("a")
            .with_text("b")
            .into_message("0", MessageStatus::AUTO_COMPLETE);
        assert_eq!(result, Err(ConversionError::InvalidSystemMessage));
    }

    #[test]
    fn test_tool_call_args_text_is_filled() -> anyhow::Result<()> {
        let mut call = ToolCallPart::new("c-1", "search", json!({"q": "rust"}));
        call.args_text.clear();
        let mut streamed = ToolCallPart::new("c-2", "search", Value::Null);
        streamed.args_text = r#"{"q":"streamed"}"#.to_string();

        let message = MessageLike::new(Role::Assistant)
            .with_content(MessagePart::ToolCall(call))
            .with_content(MessagePart::ToolCall(streamed))
            .into_message("0", MessageStatus::AUTO_COMPLETE)?;
        let calls: Vec<_> = message.tool_calls().collect();
        assert_eq!(calls[0].args_text, r#"{"q":"rust"}"#);
        assert_eq!(calls[1].args, json!({"q": "streamed"}));
        Ok(())
    }
}
