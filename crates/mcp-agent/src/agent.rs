use std::sync::Arc;

use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::field::Empty;
use tracing::{Instrument, Span};

use crate::errors::{AgentError, AgentResult};
use crate::models::content::Content;
use crate::models::message::{Message, ToolRequest};
use crate::models::role::Role;
use crate::models::tool::Tool;
use crate::providers::base::{CompletionChunk, Provider, Usage};
use crate::toolbox::Toolbox;

pub const DEFAULT_MAX_STEPS: usize = 25;

/// The conversation a turn runs over. History only ever grows.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentState {
    pub messages: Vec<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_inputs: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_outputs: Option<Map<String, Value>>,
}

impl AgentState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Continue from an existing history
    pub fn from_messages(messages: Vec<Message>) -> Self {
        Self {
            messages,
            ..Default::default()
        }
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn push_user_text<S: Into<String>>(&mut self, text: S) {
        self.push(Message::user().with_text(text));
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Text of the most recent assistant message
    pub fn final_response(&self) -> Option<String> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::Assistant)
            .map(Message::text)
    }
}

/// What a streamed turn reports as it runs
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    /// More text of the assistant message being generated
    TextDelta(String),
    /// A message appended to the conversation
    Message(Message),
}

/// Position in the control loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Node {
    Agent,
    Tools,
    End,
}

/// How failed tool calls affect a turn
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ToolErrorPolicy {
    /// Record the failure as the call's result and let the model react to it
    #[default]
    Report,
    /// Abort the turn with the error
    Propagate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentConfig {
    /// Model calls allowed per turn
    pub max_steps: usize,
    pub tool_errors: ToolErrorPolicy,
    /// Dispatch the calls of one model message concurrently
    pub parallel_tools: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_steps: DEFAULT_MAX_STEPS,
            tool_errors: ToolErrorPolicy::default(),
            parallel_tools: true,
        }
    }
}

/// Agent drives a model and the tools it may call until the model answers
pub struct Agent {
    provider: Box<dyn Provider>,
    toolbox: Option<Arc<dyn Toolbox>>,
    system_prompt: Option<String>,
    config: AgentConfig,
}

impl Agent {
    /// Create a new Agent with the specified provider
    pub fn new(provider: Box<dyn Provider>) -> Self {
        Self {
            provider,
            toolbox: None,
            system_prompt: None,
            config: AgentConfig::default(),
        }
    }

    pub fn with_toolbox(mut self, toolbox: Arc<dyn Toolbox>) -> Self {
        self.toolbox = Some(toolbox);
        self
    }

    /// Swap in a rebuilt toolbox between turns
    pub fn set_toolbox(&mut self, toolbox: Arc<dyn Toolbox>) {
        self.toolbox = Some(toolbox);
    }

    pub fn with_system_prompt<S: Into<String>>(mut self, prompt: S) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_config(mut self, config: AgentConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn toolbox(&self) -> Option<&Arc<dyn Toolbox>> {
        self.toolbox.as_ref()
    }

    /// Run the loop to completion, appending every message to `state`.
    ///
    /// If the turn fails or the future is dropped, `state` keeps everything
    /// appended up to that point.
    pub async fn invoke(&self, state: &mut AgentState) -> AgentResult<()> {
        let span = query_span(state);
        self.run(state).instrument(span).await
    }

    async fn run(&self, state: &mut AgentState) -> AgentResult<()> {
        let mut node = Node::Agent;
        let mut steps = 0;

        loop {
            match node {
                Node::End => {
                    Span::current().record("steps", steps);
                    return Ok(());
                }
                Node::Agent => {
                    if steps >= self.config.max_steps {
                        tracing::warn!(max_steps = self.config.max_steps, "step limit reached");
                        return Err(AgentError::StepLimitExceeded(self.config.max_steps));
                    }
                    steps += 1;
                }
                Node::Tools => {}
            }
            node = self.step(node, state).await?;
        }
    }

    /// Answer a single query in a fresh conversation
    pub async fn invoke_query(&self, query: &str) -> AgentResult<AgentState> {
        let mut state = AgentState::new();
        state.push_user_text(query);
        self.invoke(&mut state).await?;
        Ok(state)
    }

    /// Create a stream that yields each message as it's appended to the conversation.
    /// This includes both the assistant's responses and any tool responses.
    pub fn reply(&self, state: AgentState) -> BoxStream<'_, AgentResult<Message>> {
        Box::pin(self.reply_events(state).try_filter_map(|event| async move {
            Ok(match event {
                AgentEvent::Message(message) => Some(message),
                AgentEvent::TextDelta(_) => None,
            })
        }))
    }

    /// Like [`Agent::reply`], but the model's text also arrives piecewise as
    /// [`AgentEvent::TextDelta`]s ahead of the message that completes it.
    pub fn reply_events(&self, state: AgentState) -> BoxStream<'_, AgentResult<AgentEvent>> {
        Box::pin(async_stream::try_stream! {
            let query = query_span(&state);
            let mut state = state;
            let mut node = Node::Agent;
            let mut steps = 0;

            while node != Node::End {
                let seen = state.messages.len();
                let next = match node {
                    Node::Agent => {
                        if steps >= self.config.max_steps {
                            Err::<(), _>(AgentError::StepLimitExceeded(self.config.max_steps))?;
                        }
                        steps += 1;

                        let tools = self.declared_tools();
                        let span = model_span(&query, &state, &tools);
                        let mut chunks = self
                            .provider
                            .stream(self.system_prompt.as_deref(), &state.messages, &tools)
                            .instrument(span.clone())
                            .await
                            .map_err(provider_error)?;

                        let mut response = None;
                        while let Some(chunk) = chunks.next().instrument(span.clone()).await {
                            match chunk.map_err(provider_error)? {
                                CompletionChunk::Delta(text) => yield AgentEvent::TextDelta(text),
                                CompletionChunk::Done(message, usage) => {
                                    response = Some(finish_response(&span, message, usage));
                                }
                            }
                        }
                        let response = response.ok_or_else(|| {
                            AgentError::ProviderError("completion ended without a message".to_string())
                        })?;

                        let next = if response.has_tool_requests() {
                            Node::Tools
                        } else {
                            Node::End
                        };
                        state.push(response);
                        Ok(next)
                    }
                    other => self.step(other, &mut state).instrument(query.clone()).await,
                };

                for message in state.messages[seen..].to_vec() {
                    yield AgentEvent::Message(message);
                }
                node = next?;

                // Ensures the messages above reach the consumer before
                // potentially long-running tool calls start
                tokio::task::yield_now().await;
            }
            query.record("steps", steps);
        })
    }

    /// Execute one node and return the node that follows it
    pub async fn step(&self, node: Node, state: &mut AgentState) -> AgentResult<Node> {
        match node {
            Node::Agent => {
                let response = self.call_model(state).await?;
                let next = if response.has_tool_requests() {
                    Node::Tools
                } else {
                    Node::End
                };
                state.push(response);
                Ok(next)
            }
            Node::Tools => {
                self.run_tools(state).await?;
                Ok(Node::Agent)
            }
            Node::End => Ok(Node::End),
        }
    }

    fn declared_tools(&self) -> Vec<Tool> {
        self.toolbox
            .as_ref()
            .map(|toolbox| toolbox.tools())
            .unwrap_or_default()
    }

    async fn call_model(&self, state: &AgentState) -> AgentResult<Message> {
        let tools = self.declared_tools();
        let span = model_span(&Span::current(), state, &tools);

        let (response, usage) = self
            .provider
            .complete(self.system_prompt.as_deref(), &state.messages, &tools)
            .instrument(span.clone())
            .await
            .map_err(provider_error)?;

        Ok(finish_response(&span, response, usage))
    }

    async fn run_tools(&self, state: &mut AgentState) -> AgentResult<()> {
        let requests: Vec<ToolRequest> = state
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::Assistant)
            .map(|m| m.tool_requests().into_iter().cloned().collect())
            .unwrap_or_default();
        if requests.is_empty() {
            return Ok(());
        }

        let toolbox = self.toolbox.as_ref().ok_or_else(|| {
            AgentError::AgentNotInitialized(
                "the model requested a tool but no tools are configured".to_string(),
            )
        })?;

        if self.config.parallel_tools {
            let futures: Vec<_> = requests
                .iter()
                .map(|request| dispatch_request(toolbox.as_ref(), request))
                .collect();
            // Results come back in request order whatever order they finish in
            let outputs = futures::future::join_all(futures).await;
            for (request, output) in requests.iter().zip(outputs) {
                self.record_result(state, request, output)?;
            }
        } else {
            for request in &requests {
                let output = dispatch_request(toolbox.as_ref(), request).await;
                self.record_result(state, request, output)?;
            }
        }

        Ok(())
    }

    fn record_result(
        &self,
        state: &mut AgentState,
        request: &ToolRequest,
        output: AgentResult<Vec<Content>>,
    ) -> AgentResult<()> {
        if let Err(e) = &output {
            if self.config.tool_errors == ToolErrorPolicy::Propagate || !e.is_tool_local() {
                return Err(e.clone());
            }
            tracing::info!(call_id = %request.id, error = %e, "tool call failed");
        }

        state.push(Message::tool().with_tool_response(request.id.clone(), output));
        Ok(())
    }
}

fn query_span(state: &AgentState) -> Span {
    tracing::info_span!("agent_query", messages = state.messages.len(), steps = Empty)
}

fn model_span(parent: &Span, state: &AgentState, tools: &[Tool]) -> Span {
    tracing::info_span!(
        parent: parent,
        "model_call",
        messages = state.messages.len(),
        tools = tools.len(),
        tool_requests = Empty,
        total_tokens = Empty
    )
}

fn finish_response(span: &Span, mut response: Message, usage: Usage) -> Message {
    let tool_requests = response.tool_requests().len();
    span.record("tool_requests", tool_requests);
    if let Some(total) = usage.total_tokens {
        span.record("total_tokens", total);
    }

    tracing::debug!(tool_requests, total_tokens = ?usage.total_tokens, "model responded");
    response.role = Role::Assistant;
    response
}

fn provider_error(error: anyhow::Error) -> AgentError {
    AgentError::ProviderError(format!("{:#}", error))
}

async fn dispatch_request(
    toolbox: &dyn Toolbox,
    request: &ToolRequest,
) -> AgentResult<Vec<Content>> {
    let call = request.tool_call.clone()?;
    let span = tracing::info_span!("tool_call", tool = %call.name, call_id = %request.id, error = Empty);

    let result = toolbox.dispatch(call).instrument(span.clone()).await;
    if let Err(e) = &result {
        span.record("error", tracing::field::display(e));
    }
    result
}
