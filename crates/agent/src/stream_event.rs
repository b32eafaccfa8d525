//! Turn-level streaming events.
//!
//! `TurnEvent` is what a turn pushes to its caller, in production order.
//! Each event serializes to the single-key object the chat front-end
//! expects on one `data:` line:
//! - `{"mood": ".."}`       mood changed
//! - `{"content": ".."}`    content delta (or a full replacement)
//! - `{"system": ".."}`     tool notice
//! - `{"options": [..]}`    follow-up suggestions
//! - `{"error": ".."}`      the turn failed
//! - `[DONE]`               terminal sentinel

use serde::{Deserialize, Serialize};

/// Events emitted by the orchestrator during a turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnEvent {
    Mood(String),
    Content(String),
    System(String),
    Options(Vec<String>),
    Error(String),
    /// Always the last event of a turn.
    Done,
}

impl TurnEvent {
    /// Payload for one SSE `data:` line.
    pub fn sse_data(&self) -> String {
        match self {
            Self::Done => "[DONE]".to_string(),
            // Externally tagged newtype variants serialize as {"tag": value}
            other => serde_json::to_string(other).unwrap_or_else(|e| {
                serde_json::json!({ "error": format!("event serialization failed: {e}") })
                    .to_string()
            }),
        }
    }

    /// Short name for logs.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Mood(_) => "mood",
            Self::Content(_) => "content",
            Self::System(_) => "system",
            Self::Options(_) => "options",
            Self::Error(_) => "error",
            Self::Done => "done",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done)
    }
}
