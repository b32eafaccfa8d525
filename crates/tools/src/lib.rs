//! Built-in tool implementations for CABM.
//!
//! Tools let the model read and edit local files and run short shell
//! commands. They are registered explicitly at startup; nothing is
//! discovered at runtime.

pub mod file_read;
pub mod file_write;
pub mod shell;

use std::sync::Arc;

use cabm_core::error::ToolError;
use cabm_core::tool::ToolSet;
use serde_json::{Map, Value};

pub use file_read::ReadFileTool;
pub use file_write::{AppendFileTool, UpdateFileTool};
pub use shell::RunShellTool;

/// Create a tool set with every built-in tool.
///
/// The shell tool only runs a single allowlisted inspection command
/// (ls, cat, echo, pwd, ...); chained or redirected command lines are
/// refused.
pub fn default_registry() -> ToolSet {
    let safe_commands = [
        "ls", "dir", "cat", "head", "tail", "echo", "pwd", "date", "whoami", "wc", "grep",
        "which", "uname",
    ]
    .into_iter()
    .map(String::from)
    .collect();

    ToolSet::new()
        .with(Arc::new(ReadFileTool))
        .with(Arc::new(UpdateFileTool))
        .with(Arc::new(AppendFileTool))
        .with(Arc::new(RunShellTool::new(safe_commands)))
}

/// A required string argument.
pub(crate) fn required_str<'a>(
    args: &'a Map<String, Value>,
    key: &str,
) -> Result<&'a str, ToolError> {
    args.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| ToolError::InvalidArguments(format!("Missing '{key}' argument")))
}

/// A non-negative integer given either as a JSON number or a numeric string.
pub(crate) fn integer_arg(args: &Map<String, Value>, key: &str) -> Result<Option<u64>, ToolError> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_u64()
            .map(Some)
            .ok_or_else(|| ToolError::InvalidArguments(format!("'{key}' must be a non-negative integer"))),
        Some(Value::String(s)) => s
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| ToolError::InvalidArguments(format!("'{key}' is not a number: {s}"))),
        Some(other) => Err(ToolError::InvalidArguments(format!(
            "'{key}' has unsupported type: {other}"
        ))),
    }
}
