//! Chat history stores for CABM.
//!
//! Both backends implement `cabm_core::HistoryStore` and are safe to share
//! between concurrently running turns.

pub mod file_backend;
pub mod in_memory;

pub use file_backend::FileHistory;
pub use in_memory::InMemoryHistory;

use std::sync::Arc;

use cabm_config::HistoryConfig;
use cabm_core::error::HistoryError;
use cabm_core::history::HistoryStore;

/// Open the history backend named in configuration.
pub fn open_from_config(config: &HistoryConfig) -> Result<Arc<dyn HistoryStore>, HistoryError> {
    match config.backend.as_str() {
        "memory" => Ok(Arc::new(InMemoryHistory::new())),
        "file" => Ok(Arc::new(FileHistory::open(config.resolved_path())?)),
        other => Err(HistoryError::UnknownBackend(other.to_string())),
    }
}
