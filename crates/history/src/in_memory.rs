//! In-memory history, useful for testing and ephemeral sessions.

use async_trait::async_trait;
use cabm_core::error::HistoryError;
use cabm_core::history::HistoryStore;
use cabm_core::message::Message;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Keeps the conversation in a Vec. Nothing survives a restart.
#[derive(Clone, Default)]
pub struct InMemoryHistory {
    messages: Arc<RwLock<Vec<Message>>>,
}

impl InMemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every stored message, oldest first.
    pub async fn all(&self) -> Vec<Message> {
        self.messages.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.messages.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.messages.read().await.is_empty()
    }
}

#[async_trait]
impl HistoryStore for InMemoryHistory {
    fn name(&self) -> &str {
        "memory"
    }

    async fn append(&self, message: Message) -> Result<(), HistoryError> {
        self.messages.write().await.push(message);
        Ok(())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<Message>, HistoryError> {
        let messages = self.messages.read().await;
        let start = messages.len().saturating_sub(limit);
        Ok(messages[start..].to_vec())
    }

    async fn clear(&self) -> Result<(), HistoryError> {
        self.messages.write().await.clear();
        Ok(())
    }
}
