//! Error types for the CABM domain.
//!
//! One `thiserror` enum per collaborator boundary; [`Error`] aggregates them
//! for callers that cross more than one.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("History error: {0}")]
    History(#[from] HistoryError),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Failures of the streaming completion source. Every variant ends a turn.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("Completion endpoint returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

/// Failures reported by a tool. The orchestrator shows the model the text
/// and the user only that the tool failed.
#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    NotFound(String),

    #[error("{tool} failed: {reason}")]
    Failed { tool: String, reason: String },

    #[error("{tool} gave up after {secs}s")]
    Timeout { tool: String, secs: u64 },

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),
}

#[derive(Debug, Clone, Error)]
pub enum HistoryError {
    #[error("History I/O failed: {0}")]
    Io(String),

    #[error("Could not encode history entry: {0}")]
    Encode(String),

    #[error("Unknown history backend '{0}' (expected 'memory' or 'file')")]
    UnknownBackend(String),
}
