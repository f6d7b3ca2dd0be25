use anyhow::Result;
use futures::StreamExt;
use std::path::PathBuf;

use crate::prompt::{InputType, Prompt};
use mcp_agent::agent::{Agent, AgentEvent, AgentState};
use mcp_agent::models::message::{Message, MessageContent};
use mcp_agent::models::role::Role;

pub mod session_file;

use session_file::{load_messages, persist_messages};

pub struct Session<'a> {
    agent: &'a Agent,
    prompt: Box<dyn Prompt + 'a>,
    session_file: Option<PathBuf>,
    messages: Vec<Message>,
    stream: bool,
}

impl<'a> Session<'a> {
    /// Start or resume a conversation, recorded to `session_file` when given
    pub fn new(
        agent: &'a Agent,
        prompt: Box<dyn Prompt + 'a>,
        session_file: Option<PathBuf>,
    ) -> Result<Self> {
        let messages = match &session_file {
            Some(path) => load_messages(path)?,
            None => Vec::new(),
        };

        Ok(Session {
            agent,
            prompt,
            session_file,
            messages,
            stream: true,
        })
    }

    /// Render every intermediate message, or only the final answer
    pub fn with_streaming(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub async fn start(&mut self) -> Result<()> {
        self.setup_session();

        loop {
            let input = self.prompt.get_input()?;
            match input.input_type {
                InputType::Message => {
                    if let Some(content) = input.content {
                        self.messages.push(Message::user().with_text(content));
                        self.persist();
                    }
                }
                InputType::Exit => break,
                InputType::AskAgain => continue,
            }

            self.prompt.show_busy();
            self.agent_process_messages().await;
            self.prompt.hide_busy();
        }
        self.close_session();
        Ok(())
    }

    /// Answer a single message without prompting
    pub async fn headless_start(&mut self, initial_message: String) -> Result<()> {
        self.messages.push(Message::user().with_text(initial_message));
        self.persist();

        self.stream = false;
        self.agent_process_messages().await;
        Ok(())
    }

    async fn agent_process_messages(&mut self) {
        if self.stream {
            self.stream_turn().await
        } else {
            self.complete_turn().await
        }
    }

    async fn stream_turn(&mut self) {
        let agent = self.agent;
        let mut stream = agent.reply_events(AgentState::from_messages(self.messages.clone()));
        let mut streamed_text = false;
        loop {
            tokio::select! {
                response = stream.next() => {
                    match response {
                        Some(Ok(AgentEvent::TextDelta(text))) => {
                            self.prompt.hide_busy();
                            self.prompt.render_delta(&text);
                            streamed_text = true;
                        }
                        Some(Ok(AgentEvent::Message(message))) => {
                            self.messages.push(message.clone());
                            self.persist();
                            self.prompt.hide_busy();
                            let message = if std::mem::take(&mut streamed_text) {
                                without_text(message)
                            } else {
                                message
                            };
                            self.prompt.render(Box::new(message));
                        }
                        Some(Err(e)) => {
                            self.prompt.hide_busy();
                            self.prompt.render_error(&e.to_string());
                            break;
                        }
                        None => break,
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    drop(stream);
                    self.interrupt();
                    break;
                }
            }
        }
    }

    async fn complete_turn(&mut self) {
        let agent = self.agent;
        let mut state = AgentState::from_messages(self.messages.clone());
        let outcome = tokio::select! {
            result = agent.invoke(&mut state) => Some(result),
            _ = tokio::signal::ctrl_c() => None,
        };

        self.prompt.hide_busy();
        match outcome {
            Some(result) => {
                // History up to a failure is kept
                self.messages = state.messages;
                self.persist();
                match result {
                    Ok(()) => {
                        if let Some(answer) = self.messages.last().filter(|m| m.role == Role::Assistant) {
                            self.prompt.render(Box::new(answer.clone()));
                        }
                    }
                    Err(e) => self.prompt.render_error(&e.to_string()),
                }
            }
            None => self.interrupt(),
        }
    }

    fn interrupt(&mut self) {
        rewind_to_last_user_message(&mut self.messages);
        self.persist();
        self.prompt.render(raw_message(
            " Interrupt: Resetting conversation to before the last sent message...\n",
        ));
    }

    fn persist(&self) {
        if let Some(path) = &self.session_file {
            persist_messages(path, &self.messages)
                .unwrap_or_else(|e| tracing::warn!("Failed to persist messages: {}", e));
        }
    }

    fn setup_session(&mut self) {
        if let Some(path) = &self.session_file {
            let text = if self.messages.is_empty() {
                format!("Starting session. Recording to {}\n", path.display())
            } else {
                format!(
                    "Resuming session with {} messages. Recording to {}\n",
                    self.messages.len(),
                    path.display()
                )
            };
            self.prompt.render(raw_message(&text));
        }

        let names = self
            .agent
            .toolbox()
            .map(|toolbox| toolbox.tools())
            .unwrap_or_default();
        let names: Vec<&str> = names.iter().map(|tool| tool.name.as_str()).collect();
        self.prompt.agent_ready(&names);
    }

    fn close_session(&mut self) {
        if let Some(path) = &self.session_file {
            self.prompt.render(raw_message(&format!(
                "Closing session. Recorded to {}\n",
                path.display()
            )));
        }
        self.prompt.close();
    }
}

/// Drop everything after, and including, the most recent user message
fn rewind_to_last_user_message(messages: &mut Vec<Message>) {
    while let Some(message) = messages.pop() {
        if message.role == Role::User {
            break;
        }
    }
}

/// What is left to show of a message whose text was already streamed
fn without_text(mut message: Message) -> Message {
    message
        .content
        .retain(|content| !matches!(content, MessageContent::Text(_)));
    message
}

fn raw_message(content: &str) -> Box<Message> {
    Box::new(Message::assistant().with_text(content))
}
