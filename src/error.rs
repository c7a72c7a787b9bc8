use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, QuillError>;

#[derive(Debug, Error)]
pub enum QuillError {
    #[error("tool `{0}` not found")]
    UnknownTool(String),

    #[error("tool `{0}` is already registered")]
    DuplicateTool(String),

    #[error("invalid arguments for tool `{name}`: {reason}")]
    InvalidArguments { name: String, reason: String },

    #[error("tool `{name}` invocation failed: {source}")]
    ToolExecution {
        name: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("tool `{name}` timed out after {}s", timeout.as_secs_f32())]
    ToolTimeout { name: String, timeout: Duration },

    #[error("language model error: {0}")]
    LanguageModel(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("MCP error: {0}")]
    Mcp(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serde(#[from] serde_json::Error),
}

impl QuillError {
    /// Wraps a handler failure for the named tool.
    pub fn tool(
        name: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        QuillError::ToolExecution {
            name: name.into(),
            source: source.into(),
        }
    }

    /// Errors the agent loop hands back to the model as a tool turn instead of
    /// aborting the request.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            QuillError::UnknownTool(_)
                | QuillError::InvalidArguments { .. }
                | QuillError::ToolExecution { .. }
                | QuillError::ToolTimeout { .. }
        )
    }
}
