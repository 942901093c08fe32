use async_trait::async_trait;
use futures_util::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};

/// A single message in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".into(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".into(),
            content: content.into(),
        }
    }
}

/// Errors that can occur during streaming.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("HTTP error: {0}")]
    Http(reqwest::Error),

    #[error("JSON parse error: {0}")]
    Json(serde_json::Error),

    #[error("Invalid SSE format: {0}")]
    InvalidSse(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for streaming operations.
pub type StreamResult<T> = std::result::Result<T, StreamError>;

/// Ordered, finite sequence of text fragments from one model invocation.
pub type FragmentStream<'a> = BoxStream<'a, StreamResult<String>>;

#[async_trait]
pub trait Provider: Send + Sync {
    /// Short name used in logs and error messages.
    fn name(&self) -> &str;

    /// Send the conversation and wait for the whole reply.
    async fn chat(&self, messages: &[ChatMessage]) -> anyhow::Result<String>;

    /// Whether [`Provider::stream_chat`] yields incremental fragments.
    fn supports_streaming(&self) -> bool {
        false
    }

    /// Send the conversation and yield non-empty text fragments as they arrive.
    fn stream_chat(&self, _messages: &[ChatMessage]) -> FragmentStream<'static> {
        let name = self.name().to_string();
        stream::once(async move {
            Err(StreamError::Provider(format!(
                "{name} does not support streaming"
            )))
        })
        .boxed()
    }
}

/// Uniform fragment sequence over either call mode.
///
/// Streaming yields each non-empty fragment in arrival order. Non-streaming
/// yields exactly one fragment holding the full reply.
pub fn complete<'a>(
    provider: &'a dyn Provider,
    messages: &'a [ChatMessage],
    streaming: bool,
) -> FragmentStream<'a> {
    if streaming && provider.supports_streaming() {
        return provider
            .stream_chat(messages)
            .filter(|fragment| {
                let keep = !matches!(fragment, Ok(text) if text.is_empty());
                async move { keep }
            })
            .boxed();
    }

    stream::once(async move {
        provider
            .chat(messages)
            .await
            .map_err(|err| StreamError::Provider(err.to_string()))
    })
    .boxed()
}
