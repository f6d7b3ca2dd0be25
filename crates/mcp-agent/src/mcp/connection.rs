use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use rmcp::model::CallToolRequestParam;
use rmcp::service::{RoleClient, RunningService, ServiceError, ServiceExt};
use rmcp::transport::streamable_http_client::StreamableHttpClientTransportConfig;
use rmcp::transport::StreamableHttpClientTransport;
use serde_json::{Map, Value};
use tokio::sync::Mutex;

use super::auth::AuthProvider;
use super::protocol::{CallToolResult, RemoteTool};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

type ClientService = RunningService<RoleClient, ()>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerKind {
    /// Hosted inside the workspace, authorized with workspace credentials
    Managed,
    /// Any other URL
    External,
}

/// Where a server lives and how it is referred to locally
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSpec {
    pub id: String,
    pub url: String,
    pub kind: ServerKind,
}

impl ServerSpec {
    pub fn new<S: Into<String>>(index: usize, url: S, kind: ServerKind) -> Self {
        Self {
            id: format!("server_{}", index),
            url: url.into(),
            kind,
        }
    }
}

/// A connection to one remote tool server
#[async_trait]
pub trait ToolServer: Send + Sync {
    /// Stable local identifier, used in logs and namespaced tool names
    fn id(&self) -> &str;

    fn url(&self) -> &str;

    fn kind(&self) -> ServerKind;

    /// The server's tool catalog
    async fn list_tools(&self) -> Result<Vec<RemoteTool>>;

    /// Invoke a tool by the name the server knows it under
    async fn call_tool(&self, name: &str, arguments: Map<String, Value>)
        -> Result<CallToolResult>;
}

/// A tool server reached over the streamable HTTP transport.
///
/// The session is opened lazily on the first request. A transport failure
/// drops it, so the next request runs a fresh handshake with fresh
/// credentials.
pub struct McpServer {
    spec: ServerSpec,
    auth: Arc<dyn AuthProvider>,
    timeout: Duration,
    session: Mutex<Option<Arc<ClientService>>>,
}

impl McpServer {
    pub fn connect(spec: ServerSpec, auth: Arc<dyn AuthProvider>) -> Self {
        Self::connect_with_timeout(spec, auth, DEFAULT_TIMEOUT)
    }

    pub fn connect_with_timeout(
        spec: ServerSpec,
        auth: Arc<dyn AuthProvider>,
        timeout: Duration,
    ) -> Self {
        Self {
            spec,
            auth,
            timeout,
            session: Mutex::new(None),
        }
    }

    pub fn spec(&self) -> &ServerSpec {
        &self.spec
    }

    async fn has_session(&self) -> bool {
        self.session.lock().await.is_some()
    }

    async fn session(&self) -> Result<Arc<ClientService>> {
        let mut slot = self.session.lock().await;
        if let Some(session) = slot.as_ref() {
            return Ok(Arc::clone(session));
        }

        let session = Arc::new(self.handshake().await?);
        *slot = Some(Arc::clone(&session));
        Ok(session)
    }

    async fn handshake(&self) -> Result<ClientService> {
        let mut config = StreamableHttpClientTransportConfig::with_uri(self.spec.url.as_str());
        config.auth_header = self.auth.bearer_token().await?;
        let transport = StreamableHttpClientTransport::from_config(config);

        let session = tokio::time::timeout(self.timeout, ().serve(transport))
            .await
            .map_err(|_| anyhow!("timed out after {:?}", self.timeout))
            .and_then(|result| result.map_err(anyhow::Error::new))
            .with_context(|| format!("failed to initialize MCP session with {}", self.spec.url))?;

        tracing::debug!(server = %self.spec.id, url = %self.spec.url, "initialized MCP session");
        Ok(session)
    }

    /// Forget `failed` unless another request already replaced it
    async fn reset(&self, failed: &Arc<ClientService>) {
        let mut slot = self.session.lock().await;
        if slot.as_ref().is_some_and(|s| Arc::ptr_eq(s, failed)) {
            tracing::debug!(server = %self.spec.id, "dropping MCP session");
            *slot = None;
        }
    }

    async fn request<T, F, Fut>(&self, method: &str, send: F) -> Result<T>
    where
        F: FnOnce(Arc<ClientService>) -> Fut,
        Fut: Future<Output = Result<T, ServiceError>>,
    {
        let session = self.session().await?;
        match tokio::time::timeout(self.timeout, send(Arc::clone(&session))).await {
            Ok(Ok(value)) => Ok(value),
            // The server answered, so the session is still good
            Ok(Err(ServiceError::McpError(error))) => {
                Err(anyhow!("{} failed: {}", method, error.message))
            }
            Ok(Err(e)) => {
                self.reset(&session).await;
                Err(anyhow::Error::new(e)
                    .context(format!("{} request to {} failed", method, self.spec.url)))
            }
            Err(_) => {
                self.reset(&session).await;
                Err(anyhow!(
                    "{} request to {} timed out after {:?}",
                    method,
                    self.spec.url,
                    self.timeout
                ))
            }
        }
    }

    async fn fetch_tools(&self) -> Result<Vec<RemoteTool>> {
        let tools = self
            .request("tools/list", |session| async move { session.list_all_tools().await })
            .await?;
        Ok(tools.into_iter().map(RemoteTool::from).collect())
    }
}

#[async_trait]
impl ToolServer for McpServer {
    fn id(&self) -> &str {
        &self.spec.id
    }

    fn url(&self) -> &str {
        &self.spec.url
    }

    fn kind(&self) -> ServerKind {
        self.spec.kind
    }

    async fn list_tools(&self) -> Result<Vec<RemoteTool>> {
        // Listing is safe to repeat, so a stale session gets one retry
        let reused = self.has_session().await;
        let tools = match self.fetch_tools().await {
            Ok(tools) => tools,
            Err(e) => {
                if !reused || self.has_session().await {
                    return Err(e);
                }
                tracing::debug!(server = %self.spec.id, error = %e, "retrying tools/list on a new session");
                self.fetch_tools().await?
            }
        };

        tracing::debug!(server = %self.spec.id, count = tools.len(), "listed remote tools");
        Ok(tools)
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: Map<String, Value>,
    ) -> Result<CallToolResult> {
        let param = CallToolRequestParam {
            name: name.to_string().into(),
            arguments: Some(arguments),
        };
        let result = self
            .request("tools/call", |session| async move { session.call_tool(param).await })
            .await?;
        CallToolResult::from_rmcp(&result)
    }
}
