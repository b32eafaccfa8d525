//! The Envelope: the single JSON object a model response must carry.
//!
//! `{ "content": string, "mood"?: string, "tool_request"?: { name, args, reason } }`
//!
//! `content` is cumulative: every re-parse during streaming sees the full
//! text so far, not a delta.

use serde_json::{Map, Value};
use tracing::warn;

/// A parsed model envelope. Every field is optional while streaming.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Envelope {
    pub content: Option<String>,
    pub mood: Option<String>,
    pub tool_request: Option<ToolRequest>,
}

/// A request to invoke a named tool, embedded in an envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolRequest {
    pub name: String,
    pub args: Map<String, Value>,
    pub reason: String,
}

impl Envelope {
    /// Parse an extracted JSON object. Returns `None` unless `json` is a
    /// JSON object.
    pub fn parse(json: &str) -> Option<Self> {
        match serde_json::from_str::<Value>(json) {
            Ok(Value::Object(map)) => Some(Self::from_object(&map)),
            _ => None,
        }
    }

    fn from_object(map: &Map<String, Value>) -> Self {
        let text = |key: &str| map.get(key).and_then(Value::as_str).map(str::to_string);

        let tool_request = map
            .get("tool_request")
            .or_else(|| map.get("toolRequest"))
            .and_then(ToolRequest::from_value);

        Self {
            content: text("content"),
            mood: text("mood"),
            tool_request,
        }
    }
}

impl ToolRequest {
    /// A request only counts when it names a tool.
    fn from_value(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        let name = obj.get("name").and_then(Value::as_str)?.trim();
        if name.is_empty() {
            return None;
        }

        let args = match obj.get("args") {
            Some(Value::Object(args)) => args.clone(),
            None | Some(Value::Null) => Map::new(),
            Some(other) => {
                warn!(tool = name, args = %other, "Tool args are not an object; calling with no args");
                Map::new()
            }
        };

        let reason = obj
            .get("reason")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        Some(Self {
            name: name.to_string(),
            args,
            reason,
        })
    }
}
