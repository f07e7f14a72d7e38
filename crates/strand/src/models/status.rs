use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActionReason {
    ToolCalls,
    Interrupt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CompleteReason {
    Stop,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IncompleteReason {
    Cancelled,
    Length,
    ContentFilter,
    Other,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
/// Streaming state of a message
pub enum MessageStatus {
    Running,
    RequiresAction {
        reason: ActionReason,
    },
    Complete {
        reason: CompleteReason,
    },
    Incomplete {
        reason: IncompleteReason,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<Value>,
    },
}

impl MessageStatus {
    pub const AUTO_RUNNING: MessageStatus = MessageStatus::Running;
    pub const AUTO_COMPLETE: MessageStatus = MessageStatus::Complete {
        reason: CompleteReason::Unknown,
    };

    pub fn is_running(&self) -> bool {
        matches!(self, MessageStatus::Running)
    }

    pub fn incomplete(reason: IncompleteReason) -> Self {
        MessageStatus::Incomplete {
            reason,
            error: None,
        }
    }
}

/// Status of a message purely from its position: running only for the last
/// message of a running thread.
pub fn get_auto_status(is_last: bool, is_running: bool) -> MessageStatus {
    if is_last && is_running {
        MessageStatus::AUTO_RUNNING
    } else {
        MessageStatus::AUTO_COMPLETE
    }
}

/// Whether `status` is one of the values [`get_auto_status`] produces.
///
/// Only auto statuses may be replaced when a message's position or the
/// thread's running flag changes. Upstream statuses such as
/// `complete/stop` or any `incomplete` value are left alone.
pub fn is_auto_status(status: &MessageStatus) -> bool {
    *status == MessageStatus::AUTO_RUNNING || *status == MessageStatus::AUTO_COMPLETE
}
