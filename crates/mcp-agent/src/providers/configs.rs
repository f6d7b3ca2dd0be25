use std::sync::Arc;
use std::time::Duration;

use crate::mcp::auth::AuthProvider;

pub const DEFAULT_DATABRICKS_MODEL: &str = "databricks-meta-llama-3-1-70b-instruct";
pub const DEFAULT_PROVIDER_TIMEOUT: Duration = Duration::from_secs(600);

/// Settings for a model served from a Databricks serving endpoint
#[derive(Clone)]
pub struct DatabricksProviderConfig {
    pub host: String,
    pub model: String,
    pub auth: Arc<dyn AuthProvider>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<i32>,
    pub timeout: Duration,
}

impl DatabricksProviderConfig {
    pub fn new<H: Into<String>>(host: H, auth: Arc<dyn AuthProvider>) -> Self {
        Self {
            host: host.into(),
            model: DEFAULT_DATABRICKS_MODEL.to_string(),
            auth,
            temperature: None,
            max_tokens: None,
            timeout: DEFAULT_PROVIDER_TIMEOUT,
        }
    }

    pub fn with_model<M: Into<String>>(mut self, model: M) -> Self {
        self.model = model.into();
        self
    }

    pub fn endpoint(&self) -> String {
        format!(
            "{}/serving-endpoints/{}/invocations",
            self.host.trim_end_matches('/'),
            self.model
        )
    }
}

impl std::fmt::Debug for DatabricksProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabricksProviderConfig")
            .field("host", &self.host)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}
