use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use mcp_agent::agent::{Agent, AgentState};
use mcp_agent::errors::AgentError;
use mcp_agent::mcp::auth::NoAuth;
use mcp_agent::mcp::config::ServersConfig;
use mcp_agent::models::message::{Message, MessageContent};
use mcp_agent::models::role::Role;
use mcp_agent::models::tool::{Tool, ToolCall};
use mcp_agent::providers::base::{Provider, Usage};
use mcp_agent::registry::{RegistryOptions, ToolRegistry};
use serde_json::{json, Value};
use wiremock::matchers::{body_partial_json, method};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

/// Replays a fixed script of model turns
#[derive(Clone)]
struct ScriptedProvider {
    script: Arc<Mutex<Vec<Message>>>,
    seen_tools: Arc<Mutex<Vec<Vec<String>>>>,
}

impl ScriptedProvider {
    fn new(script: Vec<Message>) -> Self {
        Self {
            script: Arc::new(Mutex::new(script)),
            seen_tools: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    async fn complete(
        &self,
        _system: Option<&str>,
        _messages: &[Message],
        tools: &[Tool],
    ) -> Result<(Message, Usage)> {
        self.seen_tools
            .lock()
            .unwrap()
            .push(tools.iter().map(|t| t.name.clone()).collect());
        let mut script = self.script.lock().unwrap();
        Ok((script.remove(0), Usage::default()))
    }
}

/// Wraps a fixed result in a JSON-RPC response carrying the request's id
struct JsonRpcResult(Value);

impl Respond for JsonRpcResult {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let id = serde_json::from_slice::<Value>(&request.body)
            .ok()
            .and_then(|body| body.get("id").cloned())
            .unwrap_or(Value::Null);
        ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0", "id": id, "result": self.0
        }))
    }
}

async fn mcp_server(tools: Value, call_result: Value, expected_calls: u64) -> MockServer {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(body_partial_json(json!({"method": "initialize"})))
        .respond_with(JsonRpcResult(json!({
            "protocolVersion": "2025-03-26",
            "capabilities": {"tools": {}},
            "serverInfo": {"name": "mock", "version": "1.0.0"}
        })))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(body_partial_json(json!({"method": "notifications/initialized"})))
        .respond_with(ResponseTemplate::new(202))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(405))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(body_partial_json(json!({"method": "tools/list"})))
        .respond_with(JsonRpcResult(json!({"tools": tools})))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(body_partial_json(json!({"method": "tools/call"})))
        .respond_with(JsonRpcResult(call_result))
        .expect(expected_calls)
        .mount(&server)
        .await;

    server
}

fn search_tool(description: &str) -> Value {
    json!({
        "name": "search",
        "description": description,
        "inputSchema": {
            "type": "object",
            "properties": {"query": {"type": "string"}, "limit": {"type": "integer"}},
            "required": ["query"]
        }
    })
}

#[tokio::test]
async fn test_turn_against_mcp_servers() -> Result<()> {
    let first = mcp_server(
        json!([
            search_tool("first search"),
            {"name": "lookup", "inputSchema": {"type": "object", "properties": {"id": {"type": "string"}}, "required": ["id"]}}
        ]),
        json!({"content": [{"type": "text", "text": "from first"}]}),
        0,
    )
    .await;
    let second = mcp_server(
        json!([search_tool("second search")]),
        json!({"content": [{"type": "text", "text": "Rust is a systems language"}]}),
        1,
    )
    .await;

    let servers = ServersConfig {
        external_urls: vec![first.uri(), second.uri()],
        ..Default::default()
    }
    .connect(Arc::new(NoAuth))?;
    let registry = ToolRegistry::fetch_all(servers, &RegistryOptions::default()).await?;
    assert_eq!(registry.names(), vec!["search", "lookup"]);
    assert_eq!(registry.get("search").unwrap().server_id(), "server_1");

    let provider = ScriptedProvider::new(vec![
        Message::assistant()
            .with_tool_request(
                "call_1",
                Ok(ToolCall::new("search", json!({"query": "rust", "limit": "5"}))),
            )
            .with_tool_request("call_2", Ok(ToolCall::new("lookup", json!({})))),
        Message::assistant().with_text("Rust is a systems language."),
    ]);
    let agent = Agent::new(Box::new(provider.clone())).with_toolbox(Arc::new(registry));

    let mut state = AgentState::new();
    state.push_user_text("What is Rust?");
    agent.invoke(&mut state).await?;

    let roles: Vec<Role> = state.messages.iter().map(|m| m.role).collect();
    assert_eq!(
        roles,
        vec![Role::User, Role::Assistant, Role::Tool, Role::Tool, Role::Assistant]
    );

    match &state.messages[2].content[0] {
        MessageContent::ToolResponse(response) => {
            assert_eq!(response.id, "call_1");
            assert_eq!(
                response.tool_result.as_ref().unwrap()[0].as_text(),
                Some("Rust is a systems language")
            );
        }
        other => panic!("expected tool response, got {:?}", other),
    }
    match &state.messages[3].content[0] {
        MessageContent::ToolResponse(response) => {
            assert_eq!(response.id, "call_2");
            assert!(matches!(
                response.tool_result,
                Err(AgentError::InvalidArguments(_))
            ));
        }
        other => panic!("expected tool response, got {:?}", other),
    }

    assert_eq!(
        state.final_response().as_deref(),
        Some("Rust is a systems language.")
    );
    assert_eq!(
        provider.seen_tools.lock().unwrap()[0],
        vec!["search".to_string(), "lookup".to_string()]
    );
    Ok(())
}

#[tokio::test]
async fn test_validated_arguments_reach_server() -> Result<()> {
    let mounted = mcp_server(
        json!([search_tool("search")]),
        json!({"content": [], "structuredContent": {"hits": 2}}),
        0,
    )
    .await;

    // Only the supplied declared arguments are forwarded, coerced
    Mock::given(method("POST"))
        .and(body_partial_json(json!({
            "method": "tools/call",
            "params": {"name": "search", "arguments": {"query": "rust", "limit": 5}}
        })))
        .respond_with(JsonRpcResult(
            json!({"content": [], "structuredContent": {"hits": 2}}),
        ))
        .with_priority(1)
        .expect(1)
        .mount(&mounted)
        .await;

    let servers = ServersConfig {
        external_urls: vec![mounted.uri()],
        ..Default::default()
    }
    .connect(Arc::new(NoAuth))?;
    let registry = ToolRegistry::fetch_all(servers, &RegistryOptions::default()).await?;

    let output = registry
        .invoke("search", &json!({"query": "rust", "limit": "5", "extra": true}))
        .await?;
    assert_eq!(output, r#"{"hits":2}"#);
    Ok(())
}

#[tokio::test]
async fn test_unreachable_server_fails_startup() -> Result<()> {
    let servers = ServersConfig {
        external_urls: vec!["http://127.0.0.1:9/mcp".to_string()],
        ..Default::default()
    }
    .connect(Arc::new(NoAuth))?;

    let err = ToolRegistry::fetch_all(servers, &RegistryOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, AgentError::ToolFetchError { .. }));
    Ok(())
}

#[tokio::test]
async fn test_empty_configuration_fails_before_io() {
    let err = ServersConfig::default()
        .connect(Arc::new(NoAuth))
        .err()
        .unwrap();
    assert!(matches!(err, AgentError::ConfigurationError(_)));
}
