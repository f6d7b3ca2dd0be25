use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use reqwest::{Client, Response, StatusCode};
use serde_json::{json, Value};

use super::base::{CompletionChunk, CompletionStream, Provider, Usage};
use super::configs::DatabricksProviderConfig;
use super::utils::{
    check_bedrock_context_length_error, check_openai_context_length_error,
    messages_to_openai_spec, openai_response_to_message, tools_to_openai_spec, StreamedResponse,
};
use crate::models::message::Message;
use crate::models::tool::Tool;

/// Chat model hosted on a Databricks serving endpoint, spoken to in the
/// OpenAI chat completions format
pub struct DatabricksProvider {
    client: Client,
    config: DatabricksProviderConfig,
}

impl DatabricksProvider {
    pub fn new(config: DatabricksProviderConfig) -> Result<Self> {
        let client = Client::builder().timeout(config.timeout).build()?;

        Ok(Self { client, config })
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    fn get_usage(data: &Value) -> Usage {
        let Some(usage) = data.get("usage") else {
            return Usage::default();
        };

        let input_tokens = usage
            .get("prompt_tokens")
            .and_then(|v| v.as_i64())
            .map(|v| v as i32);

        let output_tokens = usage
            .get("completion_tokens")
            .and_then(|v| v.as_i64())
            .map(|v| v as i32);

        let total_tokens = usage
            .get("total_tokens")
            .and_then(|v| v.as_i64())
            .map(|v| v as i32)
            .or_else(|| match (input_tokens, output_tokens) {
                (Some(input), Some(output)) => Some(input + output),
                _ => None,
            });

        Usage::new(input_tokens, output_tokens, total_tokens)
    }

    fn payload(&self, system: Option<&str>, messages: &[Message], tools: &[Tool]) -> Result<Value> {
        let mut messages_array = Vec::new();
        if let Some(system) = system {
            messages_array.push(json!({ "role": "system", "content": system }));
        }
        messages_array.extend(messages_to_openai_spec(messages));

        let mut payload = json!({ "messages": messages_array });
        if !tools.is_empty() {
            payload["tools"] = json!(tools_to_openai_spec(tools)?);
        }
        if let Some(temp) = self.config.temperature {
            payload["temperature"] = json!(temp);
        }
        if let Some(tokens) = self.config.max_tokens {
            payload["max_tokens"] = json!(tokens);
        }
        Ok(payload)
    }

    async fn post(&self, payload: &Value) -> Result<Response> {
        let mut request = self.client.post(self.config.endpoint()).json(payload);
        if let Some(auth_header) = self.config.auth.authorization().await? {
            request = request.header("Authorization", auth_header);
        }

        let response = request.send().await?;
        match response.status() {
            StatusCode::OK => Ok(response),
            StatusCode::BAD_REQUEST => {
                // Context length errors come back as 400s with an error body
                let body: Value = response.json().await.unwrap_or_default();
                match body.get("error") {
                    Some(error) => Err(api_error(error)),
                    None => Err(anyhow!("Request failed: 400 Bad Request: {}", body)),
                }
            }
            status if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() => {
                Err(anyhow!("Server error: {}", status))
            }
            status => {
                let err_text = response.text().await.unwrap_or_default();
                Err(anyhow!("Request failed: {}: {}", status, err_text))
            }
        }
    }
}

/// Raise a specific error if the context length is exceeded
fn api_error(error: &Value) -> anyhow::Error {
    if let Some(err) = check_openai_context_length_error(error) {
        err.into()
    } else if let Some(err) = check_bedrock_context_length_error(error) {
        err.into()
    } else {
        anyhow!("Databricks API error: {}", error)
    }
}

/// Read a `text/event-stream` completion, yielding text as it arrives and
/// the assembled message once the stream ends
fn completion_chunks(response: Response) -> impl Stream<Item = Result<CompletionChunk>> + Send {
    async_stream::try_stream! {
        let mut body = response.bytes_stream();
        let mut buffer: Vec<u8> = Vec::new();
        let mut streamed = StreamedResponse::default();

        'read: while let Some(bytes) = body.next().await {
            buffer.extend_from_slice(&bytes?);
            while let Some(end) = buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=end).collect();
                let line = String::from_utf8_lossy(&line);
                let data = match line.trim().strip_prefix("data:") {
                    Some(data) => data.trim(),
                    None => continue,
                };
                if data == "[DONE]" {
                    break 'read;
                }

                let chunk: Value = serde_json::from_str(data)?;
                if let Some(error) = chunk.get("error") {
                    Err::<(), _>(api_error(error))?;
                }
                if let Some(text) = streamed.push(&chunk) {
                    yield CompletionChunk::Delta(text);
                }
            }
        }

        let response = streamed.into_response();
        let message = openai_response_to_message(&response)?;
        let usage = DatabricksProvider::get_usage(&response);
        yield CompletionChunk::Done(message, usage);
    }
}

#[async_trait]
impl Provider for DatabricksProvider {
    async fn complete(
        &self,
        system: Option<&str>,
        messages: &[Message],
        tools: &[Tool],
    ) -> Result<(Message, Usage)> {
        let payload = self.payload(system, messages, tools)?;

        tracing::debug!(model = %self.config.model, messages = messages.len(), tools = tools.len(), "requesting completion");
        let response: Value = self.post(&payload).await?.json().await?;

        if let Some(error) = response.get("error") {
            return Err(api_error(error));
        }

        let message = openai_response_to_message(&response)?;
        let usage = Self::get_usage(&response);

        Ok((message, usage))
    }

    async fn stream(
        &self,
        system: Option<&str>,
        messages: &[Message],
        tools: &[Tool],
    ) -> Result<CompletionStream> {
        let mut payload = self.payload(system, messages, tools)?;
        payload["stream"] = json!(true);

        tracing::debug!(model = %self.config.model, messages = messages.len(), tools = tools.len(), "requesting streamed completion");
        let response = self.post(&payload).await?;
        Ok(Box::pin(completion_chunks(response)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::auth::BearerToken;
    use crate::models::tool::ToolCall;
    use crate::providers::utils::ContextLengthExceededError;
    use std::sync::Arc;
    use wiremock::matchers::{body_json, body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider_for(server: &MockServer) -> Result<DatabricksProvider> {
        let config =
            DatabricksProviderConfig::new(server.uri(), Arc::new(BearerToken::new("test_token")))
                .with_model("my-databricks-model");
        DatabricksProvider::new(config)
    }

    #[tokio::test]
    async fn test_databricks_completion_with_token() -> Result<()> {
        let mock_server = MockServer::start().await;

        let mock_response = json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": "Hello!"
                }
            }],
            "usage": {
                "prompt_tokens": 10,
                "completion_tokens": 25,
                "total_tokens": 35
            }
        });

        let system = "You are a helpful assistant.";
        let expected_request_body = json!({
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": "Hello"}
            ]
        });

        Mock::given(method("POST"))
            .and(path("/serving-endpoints/my-databricks-model/invocations"))
            .and(header("Authorization", "Bearer test_token"))
            .and(body_json(expected_request_body))
            .respond_with(ResponseTemplate::new(200).set_body_json(mock_response))
            .expect(1)
            .mount(&mock_server)
            .await;

        let provider = provider_for(&mock_server)?;
        let messages = vec![Message::user().with_text("Hello")];
        let (reply_message, reply_usage) = provider.complete(Some(system), &messages, &[]).await?;

        assert_eq!(reply_message.text(), "Hello!");
        assert_eq!(reply_usage.total_tokens, Some(35));
        Ok(())
    }

    #[tokio::test]
    async fn test_databricks_tool_calls() -> Result<()> {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(body_partial_json(json!({
                "tools": [{"type": "function", "function": {"name": "search"}}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{
                    "message": {
                        "role": "assistant",
                        "content": null,
                        "tool_calls": [{
                            "id": "call_1",
                            "type": "function",
                            "function": {"name": "search", "arguments": "{\"query\": \"rust\"}"}
                        }]
                    }
                }]
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let provider = provider_for(&mock_server)?;
        let tools = vec![Tool::new(
            "search",
            "Search things",
            json!({"type": "object", "properties": {"query": {"type": "string"}}}),
        )];
        let (message, usage) = provider
            .complete(None, &[Message::user().with_text("find rust")], &tools)
            .await?;

        let requests = message.tool_requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].id, "call_1");
        assert_eq!(
            requests[0].tool_call,
            Ok(ToolCall::new("search", json!({"query": "rust"})))
        );
        assert_eq!(usage, Usage::default());
        Ok(())
    }

    #[tokio::test]
    async fn test_databricks_context_length_error() -> Result<()> {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": {"code": "context_length_exceeded", "message": "too many tokens"}
            })))
            .mount(&mock_server)
            .await;

        let provider = provider_for(&mock_server)?;
        let err = provider
            .complete(None, &[Message::user().with_text("Hello")], &[])
            .await
            .unwrap_err();
        assert!(err.downcast_ref::<ContextLengthExceededError>().is_some());
        Ok(())
    }

    #[tokio::test]
    async fn test_databricks_streamed_completion() -> Result<()> {
        use futures::TryStreamExt;

        let mock_server = MockServer::start().await;

        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\",\"content\":\"Hel\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"lo!\"}}]}\n\n",
            "data: {\"choices\":[],\"usage\":{\"prompt_tokens\":3,\"completion_tokens\":2}}\n\n",
            "data: [DONE]\n\n"
        );
        Mock::given(method("POST"))
            .and(path("/serving-endpoints/my-databricks-model/invocations"))
            .and(body_partial_json(json!({"stream": true})))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
            .expect(1)
            .mount(&mock_server)
            .await;

        let provider = provider_for(&mock_server)?;
        let chunks: Vec<CompletionChunk> = provider
            .stream(None, &[Message::user().with_text("Hi")], &[])
            .await?
            .try_collect()
            .await?;

        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0], CompletionChunk::Delta("Hel".into()));
        assert_eq!(chunks[1], CompletionChunk::Delta("lo!".into()));
        match &chunks[2] {
            CompletionChunk::Done(message, usage) => {
                assert_eq!(message.text(), "Hello!");
                assert_eq!(usage.total_tokens, Some(5));
            }
            other => panic!("expected the finished message, got {:?}", other),
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_databricks_stream_error_event() -> Result<()> {
        use futures::StreamExt;

        let mock_server = MockServer::start().await;
        let body = "data: {\"error\":{\"code\":\"context_length_exceeded\",\"message\":\"too long\"}}\n\n";
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
            .mount(&mock_server)
            .await;

        let provider = provider_for(&mock_server)?;
        let mut chunks = provider
            .stream(None, &[Message::user().with_text("Hi")], &[])
            .await?;
        let err = chunks.next().await.unwrap().unwrap_err();
        assert!(err.downcast_ref::<ContextLengthExceededError>().is_some());
        Ok(())
    }

    #[tokio::test]
    async fn test_databricks_server_error() -> Result<()> {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&mock_server)
            .await;

        let provider = provider_for(&mock_server)?;
        let err = provider
            .complete(None, &[Message::user().with_text("Hello")], &[])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("503"));
        Ok(())
    }
}
