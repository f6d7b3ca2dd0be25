use async_trait::async_trait;

use crate::errors::AgentResult;
use crate::models::content::Content;
use crate::models::tool::{Tool, ToolCall};

/// The set of tools an agent can operate: what to advertise to the model and
/// how to run a call the model makes.
#[async_trait]
pub trait Toolbox: Send + Sync {
    /// Declarations of every available tool, in a stable order
    fn tools(&self) -> Vec<Tool>;

    /// Run a single tool call.
    ///
    /// Errors local to the call (unknown tool, bad arguments, remote failure)
    /// are returned as such so the agent can report them back to the model.
    async fn dispatch(&self, tool_call: ToolCall) -> AgentResult<Vec<Content>>;
}
