use anyhow::{anyhow, Result};
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{json, Value};

use crate::errors::AgentError;
use crate::models::message::{Message, MessageContent};
use crate::models::tool::{Tool, ToolCall};

const INVALID_CALL_NAME: &str = "invalid_tool_call";

lazy_static! {
    static ref INVALID_NAME_CHARS: Regex = Regex::new(r"[^a-zA-Z0-9_-]").unwrap();
    static ref VALID_NAME: Regex = Regex::new(r"^[a-zA-Z0-9_-]+$").unwrap();
}

/// Convert internal Message format to the OpenAI chat message specification.
///
/// Each tool response becomes its own `tool` message keyed by the call id.
pub fn messages_to_openai_spec(messages: &[Message]) -> Vec<Value> {
    let mut messages_spec = Vec::new();

    for message in messages {
        let mut converted = json!({
            "role": message.role
        });
        let mut tool_calls = Vec::new();
        let mut output = Vec::new();

        for content in &message.content {
            match content {
                MessageContent::Text(text) => {
                    if !text.text.is_empty() {
                        converted["content"] = json!(text.text);
                    }
                }
                MessageContent::ToolRequest(request) => {
                    // Unusable requests still need a call entry for their error response to answer
                    let (name, arguments) = match &request.tool_call {
                        Ok(tool_call) => (
                            sanitize_function_name(&tool_call.name),
                            tool_call.arguments.to_string(),
                        ),
                        Err(_) => (INVALID_CALL_NAME.to_string(), "{}".to_string()),
                    };
                    tool_calls.push(json!({
                        "id": request.id,
                        "type": "function",
                        "function": {
                            "name": name,
                            "arguments": arguments,
                        }
                    }));
                }
                MessageContent::ToolResponse(response) => {
                    let text = match &response.tool_result {
                        Ok(contents) => contents
                            .iter()
                            .filter_map(|c| c.as_text())
                            .collect::<Vec<_>>()
                            .join("\n"),
                        // A tool error is shown as output so the model can interpret it
                        Err(e) => format!("The tool call returned the following error:\n{}", e),
                    };
                    output.push(json!({
                        "role": "tool",
                        "content": text,
                        "tool_call_id": response.id
                    }));
                }
            }
        }

        if !tool_calls.is_empty() {
            converted["tool_calls"] = json!(tool_calls);
        }
        if converted.get("content").is_some() || converted.get("tool_calls").is_some() {
            output.insert(0, converted);
        }
        messages_spec.extend(output);
    }

    messages_spec
}

/// Convert internal Tool format to OpenAI function declarations
pub fn tools_to_openai_spec(tools: &[Tool]) -> Result<Vec<Value>> {
    let mut tool_names = std::collections::HashSet::new();
    let mut result = Vec::new();

    for tool in tools {
        if !tool_names.insert(&tool.name) {
            return Err(anyhow!("Duplicate tool name: {}", tool.name));
        }

        result.push(json!({
            "type": "function",
            "function": {
                "name": tool.name,
                "description": tool.description,
                "parameters": tool.input_schema,
            }
        }));
    }

    Ok(result)
}

/// Convert an OpenAI chat completion response to an assistant Message.
///
/// Tool calls that cannot be used are kept as failed requests so the agent
/// can report the problem back to the model.
pub fn openai_response_to_message(response: &Value) -> Result<Message> {
    let original = response
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .ok_or_else(|| anyhow!("No message in response: {}", response))?;
    let mut message = Message::assistant();

    if let Some(text) = original.get("content").and_then(|t| t.as_str()) {
        message = message.with_text(text);
    }

    let tool_calls = original
        .get("tool_calls")
        .and_then(|t| t.as_array())
        .cloned()
        .unwrap_or_default();

    for tool_call in tool_calls {
        let id = tool_call["id"].as_str().unwrap_or_default().to_string();
        let function_name = tool_call["function"]["name"].as_str().unwrap_or_default();
        let arguments = tool_call["function"]["arguments"]
            .as_str()
            .unwrap_or_default();

        let request = if !is_valid_function_name(function_name) {
            Err(AgentError::ToolNotFound(format!(
                "The provided function name '{}' had invalid characters, it must match this regex [a-zA-Z0-9_-]+",
                function_name
            )))
        } else {
            parse_arguments(&id, arguments).map(|params| ToolCall::new(function_name, params))
        };
        message = message.with_tool_request(id, request);
    }

    Ok(message)
}

/// Folds the chunks of a streamed chat completion back into the body a
/// non-streamed request would have returned.
#[derive(Debug, Default)]
pub struct StreamedResponse {
    content: String,
    tool_calls: Vec<Value>,
    usage: Option<Value>,
}

impl StreamedResponse {
    /// Apply one chunk, returning the text it adds if any
    pub fn push(&mut self, chunk: &Value) -> Option<String> {
        if let Some(usage) = chunk.get("usage").filter(|u| !u.is_null()) {
            self.usage = Some(usage.clone());
        }
        let delta = chunk.get("choices")?.get(0)?.get("delta")?;

        // Tool calls arrive in fragments keyed by their position
        let calls = delta.get("tool_calls").and_then(Value::as_array);
        for call in calls.into_iter().flatten() {
            let index = call.get("index").and_then(Value::as_u64).unwrap_or(0) as usize;
            while self.tool_calls.len() <= index {
                self.tool_calls.push(json!({
                    "id": "",
                    "type": "function",
                    "function": {"name": "", "arguments": ""}
                }));
            }
            let slot = &mut self.tool_calls[index];
            if let Some(id) = call.get("id").and_then(Value::as_str) {
                slot["id"] = json!(id);
            }
            for field in ["name", "arguments"] {
                if let Some(fragment) = call["function"].get(field).and_then(Value::as_str) {
                    let joined = format!(
                        "{}{}",
                        slot["function"][field].as_str().unwrap_or_default(),
                        fragment
                    );
                    slot["function"][field] = json!(joined);
                }
            }
        }

        let text = delta
            .get("content")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())?;
        self.content.push_str(text);
        Some(text.to_string())
    }

    pub fn into_response(self) -> Value {
        let content = if self.content.is_empty() {
            Value::Null
        } else {
            json!(self.content)
        };
        let mut message = json!({"role": "assistant", "content": content});
        if !self.tool_calls.is_empty() {
            message["tool_calls"] = json!(self.tool_calls);
        }

        let mut response = json!({"choices": [{"message": message}]});
        if let Some(usage) = self.usage {
            response["usage"] = usage;
        }
        response
    }
}

// Some endpoints send an empty string for calls without arguments
fn parse_arguments(id: &str, arguments: &str) -> Result<Value, AgentError> {
    if arguments.trim().is_empty() {
        return Ok(json!({}));
    }
    serde_json::from_str::<Value>(arguments).map_err(|e| {
        AgentError::InvalidArguments(format!(
            "Could not interpret tool use parameters for id {}: {}",
            id, e
        ))
    })
}

pub fn sanitize_function_name(name: &str) -> String {
    INVALID_NAME_CHARS.replace_all(name, "_").to_string()
}

pub fn is_valid_function_name(name: &str) -> bool {
    VALID_NAME.is_match(name)
}

#[derive(Debug, thiserror::Error)]
#[error("Context length exceeded. Message: {0}")]
pub struct ContextLengthExceededError(String);

pub fn check_openai_context_length_error(error: &Value) -> Option<ContextLengthExceededError> {
    let code = error.get("code")?.as_str()?;
    if code == "context_length_exceeded" || code == "string_above_max_length" {
        let message = error
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("Unknown error")
            .to_string();
        Some(ContextLengthExceededError(message))
    } else {
        None
    }
}

pub fn check_bedrock_context_length_error(error: &Value) -> Option<ContextLengthExceededError> {
    let external_message = error
        .get("external_model_message")?
        .get("message")?
        .as_str()?;
    if external_message.to_lowercase().contains("too long") {
        Some(ContextLengthExceededError(external_message.to_string()))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::content::Content;
    use crate::models::role::Role;

    const OPENAI_TOOL_USE_RESPONSE: &str = r#"{
        "choices": [{
            "role": "assistant",
            "message": {
                "tool_calls": [{
                    "id": "1",
                    "function": {
                        "name": "example_fn",
                        "arguments": "{\"param\": \"value\"}"
                    }
                }]
            }
        }]
    }"#;

    #[test]
    fn test_messages_to_openai_spec() {
        let spec = messages_to_openai_spec(&[Message::user().with_text("Hello")]);

        assert_eq!(spec.len(), 1);
        assert_eq!(spec[0]["role"], "user");
        assert_eq!(spec[0]["content"], "Hello");
    }

    #[test]
    fn test_tool_exchange_conversion() {
        let messages = vec![
            Message::user().with_text("What is the answer?"),
            Message::assistant()
                .with_tool_request("call_1", Ok(ToolCall::new("toolA", json!({"q": 1}))))
                .with_tool_request("call_2", Ok(ToolCall::new("tool.b", json!({})))),
            Message::tool().with_tool_response("call_1", Ok(vec![Content::text("42")])),
            Message::tool().with_tool_response(
                "call_2",
                Err(AgentError::ToolNotFound("tool.b".into())),
            ),
        ];

        let spec = messages_to_openai_spec(&messages);

        assert_eq!(spec.len(), 4);
        assert_eq!(spec[1]["role"], "assistant");
        assert_eq!(spec[1]["tool_calls"][0]["id"], "call_1");
        assert_eq!(spec[1]["tool_calls"][0]["function"]["arguments"], r#"{"q":1}"#);
        assert_eq!(spec[1]["tool_calls"][1]["function"]["name"], "tool_b");
        assert_eq!(spec[2]["role"], "tool");
        assert_eq!(spec[2]["content"], "42");
        assert_eq!(spec[2]["tool_call_id"], "call_1");
        assert_eq!(
            spec[3]["content"],
            "The tool call returned the following error:\nTool not found: tool.b"
        );
    }

    #[test]
    fn test_failed_request_keeps_its_call_entry() {
        let messages = vec![
            Message::assistant().with_tool_request(
                "call_1",
                Err(AgentError::InvalidArguments("bad json".into())),
            ),
            Message::tool().with_tool_response(
                "call_1",
                Err(AgentError::InvalidArguments("bad json".into())),
            ),
        ];
        let spec = messages_to_openai_spec(&messages);

        assert_eq!(spec.len(), 2);
        assert_eq!(spec[0]["tool_calls"][0]["id"], "call_1");
        assert_eq!(spec[0]["tool_calls"][0]["function"]["name"], "invalid_tool_call");
        assert_eq!(spec[1]["tool_call_id"], "call_1");
        assert_eq!(
            spec[1]["content"],
            "The tool call returned the following error:\nInvalid arguments: bad json"
        );
    }

    #[test]
    fn test_tools_to_openai_spec() -> Result<()> {
        let tool = Tool::new(
            "test_tool",
            "A test tool",
            json!({
                "type": "object",
                "properties": {"input": {"type": "string"}},
                "required": ["input"]
            }),
        );

        let spec = tools_to_openai_spec(&[tool.clone()])?;
        assert_eq!(spec.len(), 1);
        assert_eq!(spec[0]["type"], "function");
        assert_eq!(spec[0]["function"]["name"], "test_tool");
        assert_eq!(spec[0]["function"]["parameters"]["required"], json!(["input"]));

        let duplicate = tools_to_openai_spec(&[tool.clone(), tool]);
        assert!(duplicate
            .unwrap_err()
            .to_string()
            .contains("Duplicate tool name"));
        assert!(tools_to_openai_spec(&[])?.is_empty());
        Ok(())
    }

    #[test]
    fn test_function_names() {
        assert_eq!(sanitize_function_name("hello-world"), "hello-world");
        assert_eq!(sanitize_function_name("hello world"), "hello_world");
        assert!(is_valid_function_name("server_0__search"));
        assert!(!is_valid_function_name("hello@world"));
        assert!(!is_valid_function_name(""));
    }

    #[test]
    fn test_openai_response_to_message_text() -> Result<()> {
        let response = json!({
            "choices": [{"message": {"role": "assistant", "content": "Hello!"}}]
        });

        let message = openai_response_to_message(&response)?;
        assert_eq!(message.role, Role::Assistant);
        assert_eq!(message.text(), "Hello!");
        assert!(!message.has_tool_requests());

        assert!(openai_response_to_message(&json!({"choices": []})).is_err());
        Ok(())
    }

    #[test]
    fn test_openai_response_to_message_tool_requests() -> Result<()> {
        let response: Value = serde_json::from_str(OPENAI_TOOL_USE_RESPONSE)?;
        let message = openai_response_to_message(&response)?;

        let requests = message.tool_requests();
        assert_eq!(requests.len(), 1);
        let tool_call = requests[0].tool_call.as_ref().unwrap();
        assert_eq!(tool_call.name, "example_fn");
        assert_eq!(tool_call.arguments, json!({"param": "value"}));

        let mut invalid_name = response.clone();
        invalid_name["choices"][0]["message"]["tool_calls"][0]["function"]["name"] =
            json!("invalid fn");
        let message = openai_response_to_message(&invalid_name)?;
        assert!(matches!(
            message.tool_requests()[0].tool_call,
            Err(AgentError::ToolNotFound(_))
        ));

        let mut invalid_args = response.clone();
        invalid_args["choices"][0]["message"]["tool_calls"][0]["function"]["arguments"] =
            json!("invalid json {");
        let message = openai_response_to_message(&invalid_args)?;
        match &message.tool_requests()[0].tool_call {
            Err(AgentError::InvalidArguments(msg)) => {
                assert!(msg.starts_with("Could not interpret tool use parameters"))
            }
            other => panic!("Expected InvalidArguments, got {:?}", other),
        }

        let mut empty_args = response;
        empty_args["choices"][0]["message"]["tool_calls"][0]["function"]["arguments"] = json!("");
        let message = openai_response_to_message(&empty_args)?;
        assert_eq!(
            message.tool_requests()[0].tool_call.as_ref().unwrap().arguments,
            json!({})
        );
        Ok(())
    }

    #[test]
    fn test_streamed_response_assembly() -> Result<()> {
        let chunks = [
            json!({"choices": [{"delta": {"role": "assistant", "content": ""}}]}),
            json!({"choices": [{"delta": {"content": "Let me "}}]}),
            json!({"choices": [{"delta": {"content": "check."}}]}),
            json!({"choices": [{"delta": {"tool_calls": [
                {"index": 0, "id": "call_1", "function": {"name": "search", "arguments": ""}}
            ]}}]}),
            json!({"choices": [{"delta": {"tool_calls": [
                {"index": 0, "function": {"arguments": "{\"query\": "}}
            ]}}]}),
            json!({"choices": [{"delta": {"tool_calls": [
                {"index": 0, "function": {"arguments": "\"rust\"}"}}
            ]}}]}),
            json!({"choices": [], "usage": {"prompt_tokens": 5, "completion_tokens": 7, "total_tokens": 12}}),
        ];

        let mut streamed = StreamedResponse::default();
        let deltas: Vec<String> = chunks.iter().filter_map(|c| streamed.push(c)).collect();
        assert_eq!(deltas, vec!["Let me ", "check."]);

        let response = streamed.into_response();
        assert_eq!(response["usage"]["total_tokens"], 12);

        let message = openai_response_to_message(&response)?;
        assert_eq!(message.text(), "Let me check.");
        let requests = message.tool_requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].id, "call_1");
        assert_eq!(
            requests[0].tool_call,
            Ok(ToolCall::new("search", json!({"query": "rust"})))
        );
        Ok(())
    }

    #[test]
    fn test_context_length_errors() {
        let error = json!({"code": "context_length_exceeded", "message": "This message is too long"});
        assert_eq!(
            check_openai_context_length_error(&error).unwrap().to_string(),
            "Context length exceeded. Message: This message is too long"
        );
        assert!(check_openai_context_length_error(&json!({"code": "other"})).is_none());

        let error = json!({
            "error": "Received error from amazon-bedrock",
            "external_model_message": {"message": "Input is too long for requested model."}
        });
        assert!(check_bedrock_context_length_error(&error).is_some());
        assert!(check_bedrock_context_length_error(&json!({"error": "x"})).is_none());
    }
}
