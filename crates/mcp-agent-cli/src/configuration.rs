use std::path::PathBuf;
use std::sync::Arc;

use config::{Config, Environment};
use mcp_agent::agent::{AgentConfig, DEFAULT_MAX_STEPS};
use mcp_agent::errors::{AgentError, AgentResult};
use mcp_agent::mcp::auth::{AuthProvider, BearerToken, DatabricksCliAuth};
use mcp_agent::mcp::config::{parse_server_list, ServersConfig};
use mcp_agent::providers::configs::DEFAULT_DATABRICKS_MODEL;
use mcp_agent::registry::RegistryOptions;
use serde::Deserialize;

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful AI assistant with access to various tools. \
Use the tools available to you to answer questions and complete tasks.";

/// The process environment as read by the `config` crate; keys are the
/// lowercased variable names.
#[derive(Debug, Deserialize)]
struct EnvSettings {
    #[serde(default)]
    databricks_workspace_url: Option<String>,
    #[serde(default)]
    databricks_host: Option<String>,
    #[serde(default)]
    databricks_config_profile: Option<String>,
    #[serde(default)]
    databricks_token: Option<String>,
    #[serde(default = "default_model")]
    databricks_model_name: String,
    #[serde(default)]
    databricks_mcp_servers: String,
    #[serde(default)]
    external_mcp_servers: String,
    #[serde(default = "default_system_prompt")]
    agent_system_prompt: String,
    #[serde(default = "default_max_steps")]
    agent_max_steps: usize,
    #[serde(default = "default_collision_policy")]
    mcp_tool_collision_policy: String,
    #[serde(default = "default_fetch_policy")]
    mcp_fetch_policy: String,
    #[serde(default)]
    agent_enable_tracing: bool,
    #[serde(default)]
    agent_trace_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub workspace_url: Option<String>,
    pub profile: Option<String>,
    pub token: Option<String>,
    pub model_name: String,
    /// Paths of workspace-managed servers, joined onto `workspace_url`
    pub databricks_mcp_servers: Vec<String>,
    pub external_mcp_servers: Vec<String>,
    pub system_prompt: String,
    pub max_steps: usize,
    pub registry: RegistryOptions,
    /// Record query spans to a trace file
    pub enable_tracing: bool,
    /// Where traces go instead of the default file
    pub trace_file: Option<PathBuf>,
}

impl Settings {
    /// Load settings from the environment
    pub fn new() -> AgentResult<Self> {
        let config = Config::builder()
            .add_source(
                Environment::default()
                    .ignore_empty(true)
                    .try_parsing(true),
            )
            .build()
            .map_err(config_error)?;

        let env: EnvSettings = config.try_deserialize().map_err(config_error)?;
        Self::from_env(env)
    }

    fn from_env(env: EnvSettings) -> AgentResult<Self> {
        if env.agent_max_steps == 0 {
            return Err(AgentError::ConfigurationError(
                "AGENT_MAX_STEPS must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            workspace_url: env.databricks_workspace_url.or(env.databricks_host),
            profile: env.databricks_config_profile,
            token: env.databricks_token,
            model_name: env.databricks_model_name,
            databricks_mcp_servers: parse_server_list(&env.databricks_mcp_servers),
            external_mcp_servers: parse_server_list(&env.external_mcp_servers),
            system_prompt: env.agent_system_prompt,
            max_steps: env.agent_max_steps,
            registry: RegistryOptions {
                collision: env.mcp_tool_collision_policy.parse()?,
                fetch: env.mcp_fetch_policy.parse()?,
            },
            enable_tracing: env.agent_enable_tracing,
            trace_file: env.agent_trace_file,
        })
    }

    pub fn workspace_url(&self) -> AgentResult<&str> {
        self.workspace_url.as_deref().ok_or_else(|| {
            AgentError::ConfigurationError(
                "DATABRICKS_WORKSPACE_URL (or DATABRICKS_HOST) is not set".to_string(),
            )
        })
    }

    /// Credentials shared by the model endpoint and workspace-managed servers
    pub fn workspace_auth(&self) -> AgentResult<Arc<dyn AuthProvider>> {
        match &self.token {
            Some(token) => Ok(Arc::new(BearerToken::new(token))),
            None => Ok(Arc::new(DatabricksCliAuth::new(
                self.workspace_url()?,
                self.profile.clone(),
            ))),
        }
    }

    pub fn servers(&self) -> ServersConfig {
        ServersConfig {
            workspace_url: self.workspace_url.clone(),
            managed_paths: self.databricks_mcp_servers.clone(),
            external_urls: self.external_mcp_servers.clone(),
        }
    }

    pub fn agent_config(&self) -> AgentConfig {
        AgentConfig {
            max_steps: self.max_steps,
            ..Default::default()
        }
    }

    /// Human readable lines describing where the agent will connect
    pub fn summary(&self) -> Vec<String> {
        let auth = match (&self.token, &self.profile) {
            (Some(_), _) => "personal access token".to_string(),
            (None, Some(profile)) => format!("databricks CLI (profile {})", profile),
            (None, None) => "databricks CLI".to_string(),
        };

        vec![
            format!(
                "Workspace: {}",
                self.workspace_url.as_deref().unwrap_or("(not set)")
            ),
            format!("Model: {}", self.model_name),
            format!("Auth: {}", auth),
            format!("Managed MCP servers: {}", list_or_none(&self.databricks_mcp_servers)),
            format!("External MCP servers: {}", list_or_none(&self.external_mcp_servers)),
            format!("Max steps: {}", self.max_steps),
            format!("Tracing: {}", if self.enable_tracing { "on" } else { "off" }),
        ]
    }
}

fn list_or_none(items: &[String]) -> String {
    if items.is_empty() {
        "none".to_string()
    } else {
        items.join(", ")
    }
}

fn config_error(e: config::ConfigError) -> AgentError {
    AgentError::ConfigurationError(e.to_string())
}

fn default_model() -> String {
    DEFAULT_DATABRICKS_MODEL.to_string()
}

fn default_system_prompt() -> String {
    DEFAULT_SYSTEM_PROMPT.to_string()
}

fn default_max_steps() -> usize {
    DEFAULT_MAX_STEPS
}

fn default_collision_policy() -> String {
    "last-write-wins".to_string()
}

fn default_fetch_policy() -> String {
    "strict".to_string()
}
