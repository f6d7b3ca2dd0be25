use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use tokio::process::Command;
use tokio::sync::Mutex;

/// Supplies the `Authorization` header for outgoing requests
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// The full header value, or `None` to send no header at all
    async fn authorization(&self) -> Result<Option<String>>;

    /// The token alone, for clients that add the `Bearer` scheme themselves
    async fn bearer_token(&self) -> Result<Option<String>> {
        match self.authorization().await? {
            Some(header) => header
                .strip_prefix("Bearer ")
                .map(|token| Some(token.to_string()))
                .ok_or_else(|| anyhow!("only bearer authorization is supported")),
            None => Ok(None),
        }
    }
}

/// For servers that need no credentials
#[derive(Debug, Clone, Default)]
pub struct NoAuth;

#[async_trait]
impl AuthProvider for NoAuth {
    async fn authorization(&self) -> Result<Option<String>> {
        Ok(None)
    }
}

/// A static personal access token
#[derive(Clone)]
pub struct BearerToken(String);

impl BearerToken {
    pub fn new<S: Into<String>>(token: S) -> Self {
        Self(token.into())
    }
}

impl std::fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("BearerToken(***)")
    }
}

#[async_trait]
impl AuthProvider for BearerToken {
    async fn authorization(&self) -> Result<Option<String>> {
        Ok(Some(format!("Bearer {}", self.0)))
    }
}

// Tokens are refreshed this long before they expire
const EXPIRY_MARGIN_SECS: i64 = 60;

#[derive(Debug, Deserialize)]
struct CliToken {
    access_token: String,
    #[serde(default)]
    expiry: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: Option<DateTime<Utc>>,
}

impl CachedToken {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expires_at) => now + Duration::seconds(EXPIRY_MARGIN_SECS) < expires_at,
            None => true,
        }
    }
}

/// Workspace credentials obtained through the `databricks` CLI, which handles
/// the interactive login and token refresh on its own.
#[derive(Debug)]
pub struct DatabricksCliAuth {
    host: String,
    profile: Option<String>,
    program: String,
    cached: Mutex<Option<CachedToken>>,
}

impl DatabricksCliAuth {
    pub fn new<S: Into<String>>(host: S, profile: Option<String>) -> Self {
        Self {
            host: host.into(),
            profile,
            program: "databricks".to_string(),
            cached: Mutex::new(None),
        }
    }

    /// Use a different executable in place of `databricks`
    pub fn with_program<S: Into<String>>(mut self, program: S) -> Self {
        self.program = program.into();
        self
    }

    fn args(&self) -> Vec<String> {
        let mut args = vec![
            "auth".to_string(),
            "token".to_string(),
            "--host".to_string(),
            self.host.clone(),
        ];
        if let Some(profile) = &self.profile {
            args.push("--profile".to_string());
            args.push(profile.clone());
        }
        args
    }

    async fn fetch_token(&self) -> Result<CachedToken> {
        tracing::debug!(host = %self.host, "requesting token from databricks cli");
        let output = Command::new(&self.program)
            .args(self.args())
            .output()
            .await
            .with_context(|| format!("failed to run `{} auth token`", self.program))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!(
                "`{} auth token` exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            ));
        }

        parse_cli_token(&output.stdout)
    }
}

fn parse_cli_token(stdout: &[u8]) -> Result<CachedToken> {
    let token: CliToken =
        serde_json::from_slice(stdout).context("unexpected output from databricks cli")?;
    Ok(CachedToken {
        access_token: token.access_token,
        expires_at: token.expiry,
    })
}

#[async_trait]
impl AuthProvider for DatabricksCliAuth {
    async fn authorization(&self) -> Result<Option<String>> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref().filter(|t| t.is_fresh(Utc::now())) {
            return Ok(Some(format!("Bearer {}", token.access_token)));
        }

        let token = self.fetch_token().await?;
        let header = format!("Bearer {}", token.access_token);
        *cached = Some(token);
        Ok(Some(header))
    }
}
