use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Operations a host store may or may not support
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Capability {
    Edit,
    Reload,
    Cancel,
    SwitchToBranch,
    ToolResults,
    Resume,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Capability::Edit => "editing messages",
            Capability::Reload => "reloading messages",
            Capability::Cancel => "cancelling runs",
            Capability::SwitchToBranch => "switching branches",
            Capability::ToolResults => "tool results",
            Capability::Resume => "resuming runs",
        };
        f.write_str(name)
    }
}

#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    #[error("Parent message not found: {0}")]
    ParentNotFound(String),

    #[error("Message not found: {0}")]
    MessageNotFound(String),

    #[error("Branch not found: {0}")]
    BranchNotFound(String),

    #[error("Message {0} cannot be linked below its own descendant")]
    Cycle(String),
}

#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConversionError {
    #[error("Tool call {tool_call_id} not found in assistant message")]
    ToolCallNotFound { tool_call_id: String },

    #[error("Tool call name {tool_call_id} {tool_name} does not match existing tool call {existing}")]
    ToolNameMismatch {
        tool_call_id: String,
        tool_name: String,
        existing: String,
    },

    #[error("Unsupported {role} message part type: {part_type}")]
    UnsupportedPart { role: String, part_type: String },

    #[error("Unknown message role: {0}")]
    UnknownRole(String),

    #[error("System messages must contain exactly one text part")]
    InvalidSystemMessage,

    #[error("Invalid upstream record: {0}")]
    InvalidRecord(String),
}

#[non_exhaustive]
#[derive(Error, Debug, Clone)]
pub enum ThreadError {
    #[error("Runtime does not support {0}.")]
    Unsupported(Capability),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Conversion(#[from] ConversionError),

    #[error("Host callback failed: {0}")]
    Callback(String),
}

impl ThreadError {
    pub(crate) fn callback(err: anyhow::Error) -> Self {
        ThreadError::Callback(format!("{:#}", err))
    }
}

pub type ThreadResult<T> = Result<T, ThreadError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_error_message() {
        let err = ThreadError::Unsupported(Capability::Edit);
        assert_eq!(err.to_string(), "Runtime does not support editing messages.");

        let err = ThreadError::Unsupported(Capability::ToolResults);
        assert_eq!(err.to_string(), "Runtime does not support tool results.");
    }

    #[test]
    fn test_nested_errors_are_transparent() {
        let err: ThreadError = RepositoryError::BranchNotFound("m-1".into()).into();
        assert_eq!(err.to_string(), "Branch not found: m-1");
    }
}
