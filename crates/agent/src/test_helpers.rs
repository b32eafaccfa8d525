//! Shared test doubles for orchestrator tests.

use async_trait::async_trait;
use cabm_core::character::Character;
use cabm_core::error::{Error, ProviderError, ToolError};
use cabm_core::message::Message;
use cabm_core::options::OptionGenerator;
use cabm_core::provider::{ChunkReceiver, CompletionRequest, Provider, StreamChunk};
use cabm_core::tool::{ToolArgument, ToolDescriptor, ToolRegistry};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;

/// What one completion call should do.
pub enum Script {
    /// Stream these chunks, then end normally.
    Chunks(Vec<String>),
    /// Stream these chunks, then fail.
    ChunksThenError(Vec<String>, ProviderError),
    /// Refuse the request outright.
    Fail(ProviderError),
    /// Open the stream and never send anything.
    Hang,
}

impl Script {
    /// Stream `text` in pieces of `size` characters.
    pub fn text(text: &str, size: usize) -> Self {
        Self::Chunks(split_chars(text, size))
    }
}

pub fn split_chars(text: &str, size: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(size.max(1))
        .map(|c| c.iter().collect())
        .collect()
}

/// A completion source that replays scripts in order and records every
/// request it receives.
pub struct ScriptedProvider {
    scripts: Mutex<Vec<Script>>,
    requests: Mutex<Vec<CompletionRequest>>,
    // Keeps hung streams open
    parked: Mutex<Vec<mpsc::Sender<Result<StreamChunk, ProviderError>>>>,
}

impl ScriptedProvider {
    pub fn new(scripts: Vec<Script>) -> Self {
        Self {
            scripts: Mutex::new(scripts),
            requests: Mutex::new(Vec::new()),
            parked: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn stream(&self, request: CompletionRequest) -> Result<ChunkReceiver, ProviderError> {
        self.requests.lock().unwrap().push(request);
        let script = {
            let mut scripts = self.scripts.lock().unwrap();
            if scripts.is_empty() {
                return Err(ProviderError::NotConfigured("script exhausted".into()));
            }
            scripts.remove(0)
        };

        let (chunks, error) = match script {
            Script::Fail(e) => return Err(e),
            Script::Hang => {
                let (tx, rx) = mpsc::channel(1);
                self.parked.lock().unwrap().push(tx);
                return Ok(rx);
            }
            Script::Chunks(chunks) => (chunks, None),
            Script::ChunksThenError(chunks, e) => (chunks, Some(e)),
        };

        let (tx, rx) = mpsc::channel(chunks.len() + 2);
        for chunk in chunks {
            let _ = tx.try_send(Ok(StreamChunk::text(chunk)));
        }
        match error {
            Some(e) => {
                let _ = tx.try_send(Err(e));
            }
            None => {
                let _ = tx.try_send(Ok(StreamChunk::done()));
            }
        }
        Ok(rx)
    }
}

/// How a scripted tool answers.
#[derive(Clone)]
pub enum ToolBehavior {
    Returns(Value),
    Fails(String),
    Sleeps(Duration),
    Panics,
}

/// A tool registry with canned answers that records every call.
#[derive(Default)]
pub struct ScriptedTools {
    behaviors: HashMap<String, ToolBehavior>,
    calls: Mutex<Vec<(String, Map<String, Value>)>>,
}

impl ScriptedTools {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, behavior: ToolBehavior) -> Self {
        self.behaviors.insert(name.to_string(), behavior);
        self
    }

    pub fn calls(&self) -> Vec<(String, Map<String, Value>)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ToolRegistry for ScriptedTools {
    fn descriptors(&self) -> Vec<ToolDescriptor> {
        let mut names: Vec<&String> = self.behaviors.keys().collect();
        names.sort();
        names
            .into_iter()
            .map(|name| ToolDescriptor {
                name: name.clone(),
                description: format!("scripted {name}"),
                arguments: vec![ToolArgument::new("q", "query")],
            })
            .collect()
    }

    async fn call(&self, name: &str, args: &Map<String, Value>) -> Result<Value, ToolError> {
        self.calls
            .lock()
            .unwrap()
            .push((name.to_string(), args.clone()));
        match self.behaviors.get(name) {
            None => Err(ToolError::NotFound(name.to_string())),
            Some(ToolBehavior::Returns(v)) => Ok(v.clone()),
            Some(ToolBehavior::Fails(reason)) => Err(ToolError::Failed {
                tool: name.to_string(),
                reason: reason.clone(),
            }),
            Some(ToolBehavior::Sleeps(d)) => {
                tokio::time::sleep(*d).await;
                Ok(Value::Null)
            }
            Some(ToolBehavior::Panics) => panic!("scripted tool {name} blew up"),
        }
    }
}

/// Option generator double: fixed answer, counts calls.
pub struct FixedOptions {
    answer: Result<Vec<String>, String>,
    stalls: bool,
    calls: Mutex<Vec<String>>,
}

impl FixedOptions {
    pub fn ok(options: &[&str]) -> Self {
        Self {
            answer: Ok(options.iter().map(|s| s.to_string()).collect()),
            stalls: false,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            answer: Err("option service down".into()),
            stalls: false,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Never answers.
    pub fn stalled() -> Self {
        Self {
            answer: Ok(Vec::new()),
            stalls: true,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// The `last_user_message` of every call.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl OptionGenerator for FixedOptions {
    async fn suggest(
        &self,
        _history: &[Message],
        _character: &Character,
        last_user_message: &str,
    ) -> Result<Vec<String>, Error> {
        self.calls
            .lock()
            .unwrap()
            .push(last_user_message.to_string());
        if self.stalls {
            std::future::pending::<()>().await;
        }
        self.answer.clone().map_err(Error::Internal)
    }
}
