//! Provider trait: the abstraction over streaming completion sources.
//!
//! A Provider takes an ordered message list and returns a stream of text
//! chunks. Chunks may be empty; the stream either ends normally (channel
//! closed or a `done` chunk) or yields an error.
//!
//! Implementations: OpenAI-compatible endpoints, scripted test doubles.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::ProviderError;
use crate::message::Message;

/// Receiving half of a completion stream.
pub type ChunkReceiver = mpsc::Receiver<std::result::Result<StreamChunk, ProviderError>>;

/// Configuration for a completion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// The model to use (e.g., "gpt-4o-mini", "deepseek-chat")
    pub model: String,

    /// The conversation messages
    pub messages: Vec<Message>,

    /// Temperature (0.0 = deterministic, 1.0 = creative)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

fn default_temperature() -> f32 {
    0.7
}

impl CompletionRequest {
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature: default_temperature(),
            max_tokens: None,
        }
    }
}

/// Token usage information.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// A single chunk in a streaming response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamChunk {
    /// Text delta (may be empty)
    #[serde(default)]
    pub content: String,

    /// Whether this is the final chunk
    #[serde(default)]
    pub done: bool,

    /// Usage info (typically only in the final chunk)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl StreamChunk {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }

    pub fn done() -> Self {
        Self {
            done: true,
            ..Self::default()
        }
    }
}

/// The core Provider trait.
///
/// The orchestrator only ever calls `stream()`; it never runs two streams
/// for the same turn concurrently.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A human-readable name for this provider (e.g., "openai", "deepseek").
    fn name(&self) -> &str;

    /// Send a request and get a stream of response chunks.
    async fn stream(&self, request: CompletionRequest) -> std::result::Result<ChunkReceiver, ProviderError>;

    /// Send a request and collect the whole response text.
    ///
    /// Default implementation drains `stream()`.
    async fn complete(&self, request: CompletionRequest) -> std::result::Result<String, ProviderError> {
        let mut rx = self.stream(request).await?;
        let mut text = String::new();
        while let Some(chunk) = rx.recv().await {
            let chunk = chunk?;
            text.push_str(&chunk.content);
            if chunk.done {
                break;
            }
        }
        Ok(text)
    }
}
