use std::sync::Arc;

use mcp_agent::agent::Agent;
use mcp_agent::errors::{AgentError, AgentResult};
use mcp_agent::providers::configs::DatabricksProviderConfig;
use mcp_agent::providers::databricks::DatabricksProvider;
use mcp_agent::registry::ToolRegistry;

use crate::configuration::Settings;

/// Owns the wiring between settings, tool servers and the model
pub struct App {
    settings: Settings,
    registry: Option<Arc<ToolRegistry>>,
    agent: Option<Agent>,
}

impl App {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            registry: None,
            agent: None,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Connect to every configured server, aggregate their tools and build
    /// the agent around them. Fails before any model call is made.
    pub async fn initialize(&mut self) -> AgentResult<&ToolRegistry> {
        let servers = self.settings.servers();
        if servers.is_empty() {
            return Err(AgentError::ConfigurationError(
                "no MCP servers configured; set DATABRICKS_MCP_SERVERS or EXTERNAL_MCP_SERVERS"
                    .to_string(),
            ));
        }

        let workspace_url = self.settings.workspace_url()?.to_string();
        let auth = self.settings.workspace_auth()?;

        let connections = servers.connect(Arc::clone(&auth))?;
        let registry =
            Arc::new(ToolRegistry::fetch_all(connections, &self.settings.registry).await?);
        tracing::info!(tools = registry.len(), "tool registry ready");

        let provider_config =
            DatabricksProviderConfig::new(workspace_url, auth).with_model(&self.settings.model_name);
        let provider = DatabricksProvider::new(provider_config)
            .map_err(|e| AgentError::ConfigurationError(format!("{:#}", e)))?;

        let agent = Agent::new(Box::new(provider))
            .with_toolbox(registry.clone())
            .with_system_prompt(&self.settings.system_prompt)
            .with_config(self.settings.agent_config());

        self.agent = Some(agent);
        let registry = self.registry.insert(registry);
        Ok(&**registry)
    }

    pub fn agent(&self) -> AgentResult<&Agent> {
        self.agent.as_ref().ok_or_else(|| {
            AgentError::AgentNotInitialized("call initialize before running queries".to_string())
        })
    }

    pub fn registry(&self) -> Option<&ToolRegistry> {
        self.registry.as_deref()
    }

    /// Answer one query in a fresh conversation and return the final text
    pub async fn run_query(&self, query: &str) -> AgentResult<String> {
        let state = self.agent()?.invoke_query(query).await?;
        Ok(state.final_response().unwrap_or_default())
    }
}
