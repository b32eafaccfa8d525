//! OpenAI-compatible streaming provider.
//!
//! Works with: OpenAI, DeepSeek, OpenRouter, Ollama, vLLM, SiliconFlow and
//! any endpoint exposing `/v1/chat/completions` with `stream: true`.
//!
//! Only text deltas are forwarded; tool use is expressed inside the model's
//! JSON envelope, not through native function calling.

use async_trait::async_trait;
use cabm_core::error::ProviderError;
use cabm_core::message::Message;
use cabm_core::provider::{ChunkReceiver, CompletionRequest, Provider, StreamChunk, Usage};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, trace, warn};

/// An OpenAI-compatible streaming completion source.
pub struct OpenAiCompatProvider {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    /// Create a new OpenAI-compatible provider.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| ProviderError::NotConfigured(format!("HTTP client: {e}")))?;

        Ok(Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client,
        })
    }

    /// Create an OpenAI provider (convenience constructor).
    pub fn openai(api_key: impl Into<String>) -> Result<Self, ProviderError> {
        Self::new("openai", "https://api.openai.com/v1", api_key)
    }

    /// Create an Ollama provider (convenience constructor).
    pub fn ollama(base_url: Option<&str>) -> Result<Self, ProviderError> {
        Self::new(
            "ollama",
            base_url.unwrap_or("http://localhost:11434/v1"),
            "ollama", // Ollama doesn't need a real key
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Convert our Message types to OpenAI API format.
    fn to_api_messages(messages: &[Message]) -> Vec<ApiMessage<'_>> {
        messages
            .iter()
            .map(|m| ApiMessage {
                role: m.role.as_str(),
                content: &m.content,
            })
            .collect()
    }

    fn request_body(request: &CompletionRequest) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": request.model,
            "messages": Self::to_api_messages(&request.messages),
            "temperature": request.temperature,
            "stream": true,
            "stream_options": { "include_usage": true },
        });

        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }

        body
    }
}

#[async_trait]
impl Provider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn stream(&self, request: CompletionRequest) -> Result<ChunkReceiver, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = Self::request_body(&request);

        debug!(
            provider = %self.name,
            model = %request.model,
            messages = request.messages.len(),
            "Sending streaming request"
        );

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .header("Accept", "text/event-stream")
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        match response.status().as_u16() {
            200 => {}
            429 => {
                let retry_after_secs = retry_after(response.headers()).unwrap_or(DEFAULT_RETRY_AFTER_SECS);
                warn!(provider = %self.name, retry_after_secs, "Rate limited");
                return Err(ProviderError::RateLimited { retry_after_secs });
            }
            status @ (401 | 403) => {
                return Err(ProviderError::Unauthorized(format!(
                    "{} rejected the API key (HTTP {status})",
                    self.name
                )));
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                warn!(provider = %self.name, status, body = %body, "Completion request failed");
                return Err(ProviderError::Status { status, body });
            }
        }

        let (tx, rx) = tokio::sync::mpsc::channel(64);
        let provider_name = self.name.clone();

        // Read the SSE byte stream and forward text deltas
        tokio::spawn(async move {
            let mut byte_stream = response.bytes_stream();
            let mut lines = LineBuffer::default();

            while let Some(chunk_result) = byte_stream.next().await {
                let bytes = match chunk_result {
                    Ok(b) => b,
                    Err(e) => {
                        let _ = tx
                            .send(Err(ProviderError::StreamInterrupted(e.to_string())))
                            .await;
                        return;
                    }
                };

                for line in lines.push(&bytes) {
                    match parse_sse_line(&line) {
                        SseLine::Skip => {}
                        SseLine::Done => {
                            let _ = tx.send(Ok(StreamChunk::done())).await;
                            return;
                        }
                        SseLine::Chunk(chunk) => {
                            let done = chunk.done;
                            if tx.send(Ok(chunk)).await.is_err() {
                                debug!(provider = %provider_name, "Stream receiver dropped");
                                return;
                            }
                            if done {
                                return;
                            }
                        }
                        SseLine::Unparseable(error) => {
                            trace!(
                                provider = %provider_name,
                                line = %line,
                                error = %error,
                                "Ignoring unparseable SSE chunk"
                            );
                        }
                    }
                }
            }

            // Stream ended without [DONE]
            let _ = tx.send(Ok(StreamChunk::done())).await;
        });

        Ok(rx)
    }
}

/// Splits a byte stream into lines without breaking multi-byte characters
/// that straddle network chunks.
#[derive(Default)]
struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw[..raw.len() - 1]);
            lines.push(line.trim_end_matches('\r').to_string());
        }
        lines
    }
}

#[derive(Debug)]
enum SseLine {
    Skip,
    Done,
    Chunk(StreamChunk),
    Unparseable(String),
}

fn parse_sse_line(line: &str) -> SseLine {
    // Skip empty lines, SSE comments and non-data fields
    let Some(data) = line.strip_prefix("data:") else {
        return SseLine::Skip;
    };
    let data = data.trim();
    if data.is_empty() {
        return SseLine::Skip;
    }
    if data == "[DONE]" {
        return SseLine::Done;
    }

    match serde_json::from_str::<StreamResponse>(data) {
        Ok(resp) => {
            let content = resp
                .choices
                .first()
                .and_then(|c| c.delta.content.clone())
                .unwrap_or_default();
            let usage = resp.usage.map(|u| Usage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            });
            // The usage frame (stream_options) is the last one before [DONE]
            let done = usage.is_some() && resp.choices.is_empty();
            SseLine::Chunk(StreamChunk {
                content,
                done,
                usage,
            })
        }
        Err(e) => SseLine::Unparseable(e.to_string()),
    }
}

const DEFAULT_RETRY_AFTER_SECS: u64 = 5;

/// Seconds from a numeric `Retry-After` header.
fn retry_after(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

// --- OpenAI API types (internal) ---

#[derive(Debug, Serialize)]
struct ApiMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

/// A single SSE `data: {...}` chunk from a streaming response.
#[derive(Debug, Deserialize)]
struct StreamResponse {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}
