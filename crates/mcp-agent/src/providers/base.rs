use anyhow::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::models::message::Message;
use crate::models::tool::Tool;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: Option<i32>,
    pub output_tokens: Option<i32>,
    pub total_tokens: Option<i32>,
}

impl Usage {
    pub fn new(
        input_tokens: Option<i32>,
        output_tokens: Option<i32>,
        total_tokens: Option<i32>,
    ) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens,
        }
    }
}

/// One piece of a completion as the model produces it
#[derive(Debug, Clone, PartialEq)]
pub enum CompletionChunk {
    /// More text of the message being generated
    Delta(String),
    /// The finished message, always the last chunk
    Done(Message, Usage),
}

pub type CompletionStream = BoxStream<'static, Result<CompletionChunk>>;

/// A language model that can produce the next message of a conversation
#[async_trait]
pub trait Provider: Send + Sync {
    /// Generate the next message given the history and the tools on offer.
    ///
    /// The system instruction travels separately from `messages` and is never
    /// part of the stored conversation.
    async fn complete(
        &self,
        system: Option<&str>,
        messages: &[Message],
        tools: &[Tool],
    ) -> Result<(Message, Usage)>;

    /// Like [`Provider::complete`], but yields text as it is generated.
    ///
    /// Providers without incremental output send the finished message alone.
    async fn stream(
        &self,
        system: Option<&str>,
        messages: &[Message],
        tools: &[Tool],
    ) -> Result<CompletionStream> {
        let (message, usage) = self.complete(system, messages, tools).await?;
        let done: Result<CompletionChunk> = Ok(CompletionChunk::Done(message, usage));
        Ok(Box::pin(futures::stream::iter([done])))
    }
}
