//! `read_file`: read a window of lines from a text file.

use async_trait::async_trait;
use cabm_core::error::ToolError;
use cabm_core::tool::{Tool, ToolArgument};
use serde_json::{Map, Value};
use tracing::debug;

use crate::{integer_arg, required_str};

/// Largest window a single call may read.
pub const MAX_LINES: u64 = 200;

/// Reads lines `start_line..=end_line` (1-based) from a UTF-8 file.
pub struct ReadFileTool;

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read part of a text file. Returns the requested lines or an error description."
    }

    fn arguments(&self) -> Vec<ToolArgument> {
        vec![
            ToolArgument::new("file_path", "string, absolute or relative path"),
            ToolArgument::new("start_line", "first line to read, 1-based (number or string)"),
            ToolArgument::new(
                "end_line",
                format!("last line to read, inclusive (at most {MAX_LINES} lines per call)"),
            ),
        ]
    }

    async fn execute(&self, arguments: &Map<String, Value>) -> Result<Value, ToolError> {
        let path = required_str(arguments, "file_path")?;
        let start = integer_arg(arguments, "start_line")?.unwrap_or(1).max(1);
        let end = integer_arg(arguments, "end_line")?
            .unwrap_or_else(|| start.saturating_add(MAX_LINES - 1));

        if end < start {
            return Err(ToolError::InvalidArguments(format!(
                "end_line ({end}) is before start_line ({start})"
            )));
        }
        let requested = end - start + 1;
        if requested > MAX_LINES {
            return Err(ToolError::Failed {
                tool: self.name().into(),
                reason: format!("range too large (limit {MAX_LINES}, requested {requested})"),
            });
        }

        debug!(path = %path, start, end, "Reading file");

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ToolError::Failed {
                tool: self.name().into(),
                reason: format!("Failed to read file: {e}"),
            })?;

        let skip = usize::try_from(start - 1).unwrap_or(usize::MAX);
        let window: Vec<&str> = content
            .lines()
            .skip(skip)
            .take(requested as usize)
            .collect();

        Ok(Value::String(window.join("\n")))
    }
}
