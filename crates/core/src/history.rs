//! History store trait: durable, append-only chat history.

use async_trait::async_trait;

use crate::error::HistoryError;
use crate::message::{Message, Role};

/// Durable chat history shared by all turns.
///
/// Implementations must tolerate concurrent appends from independent turns;
/// the orchestrator performs no locking of its own.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// A human-readable backend name (e.g., "memory", "file").
    fn name(&self) -> &str;

    /// Append a message to the history.
    async fn append(&self, message: Message) -> Result<(), HistoryError>;

    /// The most recent `limit` messages, oldest first.
    async fn recent(&self, limit: usize) -> Result<Vec<Message>, HistoryError>;

    /// Remove every message.
    async fn clear(&self) -> Result<(), HistoryError>;

    /// Convenience wrapper over [`append`](Self::append).
    async fn append_text(&self, role: Role, content: &str) -> Result<(), HistoryError> {
        self.append(Message::new(role, content)).await
    }
}
