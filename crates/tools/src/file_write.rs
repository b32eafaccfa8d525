//! `update_file` and `append_file`: write text to files.

use async_trait::async_trait;
use cabm_core::error::ToolError;
use cabm_core::tool::{Tool, ToolArgument};
use serde_json::{Map, Value};
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::required_str;

async fn ensure_parent(tool: &str, path: &str) -> Result<(), ToolError> {
    if let Some(parent) = Path::new(path).parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| ToolError::Failed {
                tool: tool.into(),
                reason: format!("Failed to create directory: {e}"),
            })?;
    }
    Ok(())
}

fn path_and_content(args: &Map<String, Value>) -> Result<(&str, &str), ToolError> {
    Ok((required_str(args, "file_path")?, required_str(args, "content")?))
}

/// Overwrites a file with the given content, creating it if needed.
pub struct UpdateFileTool;

#[async_trait]
impl Tool for UpdateFileTool {
    fn name(&self) -> &str {
        "update_file"
    }

    fn description(&self) -> &str {
        "Overwrite a file with the given content. Creates the file if it doesn't exist."
    }

    fn arguments(&self) -> Vec<ToolArgument> {
        vec![
            ToolArgument::new("file_path", "string, file path"),
            ToolArgument::new("content", "the complete text to write"),
        ]
    }

    async fn execute(&self, arguments: &Map<String, Value>) -> Result<Value, ToolError> {
        let (path, content) = path_and_content(arguments)?;
        ensure_parent(self.name(), path).await?;

        debug!(path = %path, bytes = content.len(), "Overwriting file");

        tokio::fs::write(path, content)
            .await
            .map_err(|e| ToolError::Failed {
                tool: self.name().into(),
                reason: format!("Failed to write file: {e}"),
            })?;

        Ok(Value::String(format!(
            "Wrote {} bytes to {path}",
            content.len()
        )))
    }
}

/// Appends content to the end of a file, creating it if needed.
pub struct AppendFileTool;

#[async_trait]
impl Tool for AppendFileTool {
    fn name(&self) -> &str {
        "append_file"
    }

    fn description(&self) -> &str {
        "Append content to the end of a file. Creates the file if it doesn't exist."
    }

    fn arguments(&self) -> Vec<ToolArgument> {
        vec![
            ToolArgument::new("file_path", "string, file path"),
            ToolArgument::new("content", "text to append"),
        ]
    }

    async fn execute(&self, arguments: &Map<String, Value>) -> Result<Value, ToolError> {
        let (path, content) = path_and_content(arguments)?;
        ensure_parent(self.name(), path).await?;

        debug!(path = %path, bytes = content.len(), "Appending to file");

        let failed = |e: std::io::Error| ToolError::Failed {
            tool: "append_file".into(),
            reason: format!("Failed to append to file: {e}"),
        };
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(failed)?;
        file.write_all(content.as_bytes()).await.map_err(failed)?;
        file.flush().await.map_err(failed)?;

        Ok(Value::String(format!(
            "Appended {} bytes to {path}",
            content.len()
        )))
    }
}
