use std::sync::Arc;

use url::Url;

use super::auth::{AuthProvider, NoAuth};
use super::connection::{McpServer, ServerKind, ServerSpec, ToolServer};
use crate::errors::{AgentError, AgentResult};

/// Split a comma separated list, dropping blank entries
pub fn parse_server_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// Resolve managed server paths against the workspace base URL
pub fn build_workspace_server_urls(base: &str, paths: &[String]) -> Vec<String> {
    let base = base.trim_end_matches('/');
    paths
        .iter()
        .map(|path| format!("{}/{}", base, path.trim_start_matches('/')))
        .collect()
}

fn check_server_url(raw: &str) -> AgentResult<()> {
    let url = Url::parse(raw)
        .map_err(|e| AgentError::ConfigurationError(format!("invalid server URL '{}': {}", raw, e)))?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        scheme => Err(AgentError::ConfigurationError(format!(
            "unsupported scheme '{}' in server URL '{}'",
            scheme, raw
        ))),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServersConfig {
    pub workspace_url: Option<String>,
    pub managed_paths: Vec<String>,
    pub external_urls: Vec<String>,
}

impl ServersConfig {
    pub fn is_empty(&self) -> bool {
        self.managed_paths.is_empty() && self.external_urls.is_empty()
    }

    /// Managed servers first, then external ones, numbered in that order
    pub fn server_specs(&self) -> AgentResult<Vec<ServerSpec>> {
        let managed_urls = if self.managed_paths.is_empty() {
            Vec::new()
        } else {
            let base = self.workspace_url.as_deref().ok_or_else(|| {
                AgentError::ConfigurationError(
                    "a workspace URL is required for workspace MCP servers".to_string(),
                )
            })?;
            build_workspace_server_urls(base, &self.managed_paths)
        };

        let managed = managed_urls
            .into_iter()
            .map(|url| (url, ServerKind::Managed));
        let external = self
            .external_urls
            .iter()
            .cloned()
            .map(|url| (url, ServerKind::External));

        managed
            .chain(external)
            .enumerate()
            .map(|(index, (url, kind))| {
                check_server_url(&url)?;
                Ok(ServerSpec::new(index, url, kind))
            })
            .collect()
    }

    /// Create one connection per configured server.
    ///
    /// Managed servers share `workspace_auth`; external ones send no credentials.
    pub fn connect(
        &self,
        workspace_auth: Arc<dyn AuthProvider>,
    ) -> AgentResult<Vec<Arc<dyn ToolServer>>> {
        let specs = self.server_specs()?;
        if specs.is_empty() {
            return Err(AgentError::ConfigurationError(
                "no MCP servers configured".to_string(),
            ));
        }

        Ok(specs
            .into_iter()
            .map(|spec| {
                let auth: Arc<dyn AuthProvider> = match spec.kind {
                    ServerKind::Managed => Arc::clone(&workspace_auth),
                    ServerKind::External => Arc::new(NoAuth),
                };
                Arc::new(McpServer::connect(spec, auth)) as Arc<dyn ToolServer>
            })
            .collect())
    }
}
