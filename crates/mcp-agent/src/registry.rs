//! Aggregates the tool catalogs of several MCP servers into one flat
//! namespace and routes each call back to the server that owns the tool.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::errors::{AgentError, AgentResult};
use crate::mcp::connection::ToolServer;
use crate::mcp::protocol::{RemoteTool, ToolOutput};
use crate::models::content::Content;
use crate::models::tool::{Tool, ToolCall};
use crate::providers::utils::sanitize_function_name;
use crate::schema::InputValidator;
use crate::toolbox::Toolbox;

/// What to do when two servers expose a tool under the same name
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CollisionPolicy {
    /// The server configured later replaces the earlier entry
    #[default]
    LastWriteWins,
    /// Expose every tool as `<server_id>__<tool>`
    Namespace,
    /// Refuse to build the registry
    Fail,
}

impl FromStr for CollisionPolicy {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "last-write-wins" | "last_write_wins" | "overwrite" => Ok(Self::LastWriteWins),
            "namespace" | "prefix" => Ok(Self::Namespace),
            "fail" | "error" => Ok(Self::Fail),
            other => Err(AgentError::ConfigurationError(format!(
                "unknown tool collision policy '{}'",
                other
            ))),
        }
    }
}

/// What to do when a server's catalog cannot be fetched
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FetchPolicy {
    #[default]
    AllOrNothing,
    /// Skip failing servers as long as at least one succeeds
    Lenient,
}

impl FromStr for FetchPolicy {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "strict" | "all-or-nothing" | "all_or_nothing" => Ok(Self::AllOrNothing),
            "lenient" => Ok(Self::Lenient),
            other => Err(AgentError::ConfigurationError(format!(
                "unknown tool fetch policy '{}'",
                other
            ))),
        }
    }
}

/// Longest function name chat completion endpoints accept
pub const MAX_TOOL_NAME_LEN: usize = 64;

/// The name a tool is declared to the model under, restricted to
/// `[a-zA-Z0-9_-]{1,64}`. Calls still go out under the remote name.
pub fn exposed_name(name: &str) -> String {
    let mut exposed = sanitize_function_name(name);
    // Sanitized names are ASCII, so any byte index is a char boundary
    exposed.truncate(MAX_TOOL_NAME_LEN);
    exposed
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryOptions {
    pub collision: CollisionPolicy,
    pub fetch: FetchPolicy,
}

/// A remote tool adapted for local use
#[derive(Clone)]
pub struct RegisteredTool {
    pub name: String,
    pub remote_name: String,
    pub description: String,
    pub schema: Value,
    pub validator: InputValidator,
    server: Arc<dyn ToolServer>,
}

impl RegisteredTool {
    fn new(name: String, remote: RemoteTool, server: Arc<dyn ToolServer>) -> Self {
        let description = remote
            .description
            .filter(|d| !d.is_empty())
            .unwrap_or_else(|| format!("Tool: {}", remote.name));
        let validator = InputValidator::from_schema(&remote.input_schema);

        Self {
            name,
            remote_name: remote.name,
            description,
            schema: remote.input_schema,
            validator,
            server,
        }
    }

    /// Id of the server this tool dispatches to
    pub fn server_id(&self) -> &str {
        self.server.id()
    }

    pub fn declaration(&self) -> Tool {
        Tool::new(&self.name, &self.description, self.schema.clone())
    }
}

impl fmt::Debug for RegisteredTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredTool")
            .field("name", &self.name)
            .field("remote_name", &self.remote_name)
            .field("server", &self.server.id())
            .finish()
    }
}

/// The aggregated, read-only view over every configured server's tools
#[derive(Debug, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, RegisteredTool>,
    // Registration order, so declarations are stable across calls
    order: Vec<String>,
}

impl ToolRegistry {
    /// Fetch every server's catalog, in order, and aggregate the results
    pub async fn fetch_all(
        servers: Vec<Arc<dyn ToolServer>>,
        options: &RegistryOptions,
    ) -> AgentResult<Self> {
        if servers.is_empty() {
            return Err(AgentError::ConfigurationError(
                "no MCP servers configured".to_string(),
            ));
        }

        let mut registry = Self::default();
        let mut last_error = None;
        let mut fetched = 0;

        for server in servers {
            let remote_tools = match server.list_tools().await {
                Ok(tools) => tools,
                Err(e) => {
                    let error = AgentError::ToolFetchError {
                        server: server.url().to_string(),
                        message: format!("{:#}", e),
                    };
                    match options.fetch {
                        FetchPolicy::AllOrNothing => return Err(error),
                        FetchPolicy::Lenient => {
                            tracing::warn!(server = %server.id(), error = %error, "skipping tool server");
                            last_error = Some(error);
                            continue;
                        }
                    }
                }
            };

            tracing::info!(
                server = %server.id(),
                url = %server.url(),
                count = remote_tools.len(),
                "loaded tools"
            );
            fetched += 1;

            for remote in remote_tools {
                registry.insert(remote, Arc::clone(&server), options.collision)?;
            }
        }

        if fetched == 0 {
            if let Some(error) = last_error {
                return Err(error);
            }
        }

        Ok(registry)
    }

    fn insert(
        &mut self,
        remote: RemoteTool,
        server: Arc<dyn ToolServer>,
        policy: CollisionPolicy,
    ) -> AgentResult<()> {
        let qualified = match policy {
            CollisionPolicy::Namespace => format!("{}__{}", server.id(), remote.name),
            _ => remote.name.clone(),
        };
        let name = exposed_name(&qualified);
        if name != qualified {
            tracing::debug!(tool = %qualified, exposed = %name, "renamed tool for the model");
        }

        if let Some(existing) = self.tools.get(&name) {
            match policy {
                CollisionPolicy::Fail => {
                    return Err(AgentError::ToolNameCollision {
                        name,
                        first: existing.server_id().to_string(),
                        second: server.id().to_string(),
                    });
                }
                _ => {
                    tracing::warn!(
                        tool = %name,
                        replaced = %existing.server_id(),
                        by = %server.id(),
                        "tool name collision, later server wins"
                    );
                }
            }
        } else {
            self.order.push(name.clone());
        }

        let tool = RegisteredTool::new(name.clone(), remote, server);
        self.tools.insert(name, tool);
        Ok(())
    }

    /// Validate arguments and run the named tool on its server
    pub async fn invoke(&self, name: &str, arguments: &Value) -> AgentResult<String> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| AgentError::ToolNotFound(name.to_string()))?;
        let validated = tool.validator.validate(arguments)?;

        tracing::debug!(tool = %name, server = %tool.server_id(), "calling remote tool");
        let result = tool
            .server
            .call_tool(&tool.remote_name, validated)
            .await
            .map_err(|e| AgentError::RemoteToolError {
                tool: name.to_string(),
                message: format!("{:#}", e),
            })?;

        let text = ToolOutput::from_result(&result).into_text();
        if result.is_error {
            return Err(AgentError::RemoteToolError {
                tool: name.to_string(),
                message: text,
            });
        }
        Ok(text)
    }

    pub fn get(&self, name: &str) -> Option<&RegisteredTool> {
        self.tools.get(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.order.iter().map(String::as_str).collect()
    }

    pub fn registered(&self) -> impl Iterator<Item = &RegisteredTool> {
        self.order.iter().filter_map(|name| self.tools.get(name))
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Drop every tool and with them the server connections
    pub fn close(&mut self) {
        self.tools.clear();
        self.order.clear();
    }
}

#[async_trait]
impl Toolbox for ToolRegistry {
    fn tools(&self) -> Vec<Tool> {
        self.registered().map(RegisteredTool::declaration).collect()
    }

    async fn dispatch(&self, tool_call: ToolCall) -> AgentResult<Vec<Content>> {
        let text = self.invoke(&tool_call.name, &tool_call.arguments).await?;
        Ok(vec![Content::text(text)])
    }
}
