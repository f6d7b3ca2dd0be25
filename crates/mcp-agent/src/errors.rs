use serde::{Deserialize, Serialize};
use thiserror::Error;

#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Deserialize, Serialize)]
pub enum AgentError {
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Failed to fetch tools from {server}: {message}")]
    ToolFetchError { server: String, message: String },

    #[error("Tool name collision: '{name}' is exposed by both {first} and {second}")]
    ToolNameCollision {
        name: String,
        first: String,
        second: String,
    },

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("Tool {tool} failed: {message}")]
    RemoteToolError { tool: String, message: String },

    #[error("Agent not initialized: {0}")]
    AgentNotInitialized(String),

    #[error("Step limit of {0} model calls exceeded")]
    StepLimitExceeded(usize),

    #[error("Model provider error: {0}")]
    ProviderError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AgentError {
    /// Errors scoped to a single tool call; these are reported back to the model
    /// instead of aborting the turn.
    pub fn is_tool_local(&self) -> bool {
        matches!(
            self,
            AgentError::ToolNotFound(_)
                | AgentError::InvalidArguments(_)
                | AgentError::RemoteToolError { .. }
        )
    }
}

pub type AgentResult<T> = Result<T, AgentError>;
