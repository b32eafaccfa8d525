//! File-based history: persistent JSON-lines storage.
//!
//! Each line is a JSON-encoded `Message`. The file is read once on open and
//! every append writes a single line, so a crash loses at most the message
//! being written.
//!
//! Default location: `~/.cabm/history.jsonl`

use async_trait::async_trait;
use cabm_core::error::HistoryError;
use cabm_core::history::HistoryStore;
use cabm_core::message::Message;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// A file-backed history using JSONL (one message per line).
///
/// Messages are cached in memory; the write lock is held across the disk
/// append so lines from concurrent turns never interleave.
pub struct FileHistory {
    path: PathBuf,
    messages: Arc<RwLock<Vec<Message>>>,
}

impl FileHistory {
    /// Open (or lazily create) the history file at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, HistoryError> {
        let path = path.into();
        let messages = Self::load_from_disk(&path)?;
        debug!(path = %path.display(), count = messages.len(), "File history loaded");
        Ok(Self {
            path,
            messages: Arc::new(RwLock::new(messages)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load_from_disk(path: &Path) -> Result<Vec<Message>, HistoryError> {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(HistoryError::Io(format!(
                    "Failed to read history file: {e}"
                )));
            }
        };

        Ok(content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match serde_json::from_str::<Message>(line) {
                Ok(message) => Some(message),
                Err(e) => {
                    warn!(error = %e, "Skipping corrupted history line");
                    None
                }
            })
            .collect())
    }

    async fn ensure_parent(&self) -> Result<(), HistoryError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                HistoryError::Io(format!("Failed to create history directory: {e}"))
            })?;
        }
        Ok(())
    }
}

#[async_trait]
impl HistoryStore for FileHistory {
    fn name(&self) -> &str {
        "file"
    }

    async fn append(&self, message: Message) -> Result<(), HistoryError> {
        let mut line = serde_json::to_string(&message)
            .map_err(|e| HistoryError::Encode(format!("Failed to serialize message: {e}")))?;
        line.push('\n');

        let mut messages = self.messages.write().await;
        self.ensure_parent().await?;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| HistoryError::Io(format!("Failed to open history file: {e}")))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| HistoryError::Io(format!("Failed to write history file: {e}")))?;
        file.flush()
            .await
            .map_err(|e| HistoryError::Io(format!("Failed to flush history file: {e}")))?;

        messages.push(message);
        Ok(())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<Message>, HistoryError> {
        let messages = self.messages.read().await;
        let start = messages.len().saturating_sub(limit);
        Ok(messages[start..].to_vec())
    }

    async fn clear(&self) -> Result<(), HistoryError> {
        let mut messages = self.messages.write().await;
        self.ensure_parent().await?;
        tokio::fs::write(&self.path, b"")
            .await
            .map_err(|e| HistoryError::Io(format!("Failed to truncate history file: {e}")))?;
        messages.clear();
        Ok(())
    }
}
