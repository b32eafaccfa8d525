//! `run_shell`: execute a system command with a timeout.
//!
//! Supports command allowlisting. With an allowlist set, a command line may
//! not contain shell control characters, so it runs exactly one program. A
//! non-zero exit status is a tool failure.

use async_trait::async_trait;
use cabm_core::error::ToolError;
use cabm_core::tool::{Tool, ToolArgument};
use serde_json::{Map, Value};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::{integer_arg, required_str};

/// Characters that chain, substitute or redirect in `sh` and `cmd`.
const SHELL_METACHARACTERS: &[char] = &[';', '&', '|', '$', '`', '>', '<', '(', ')', '\n', '\r'];

/// Default per-command timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 5;

/// Execute shell commands with safety constraints.
pub struct RunShellTool {
    /// If non-empty, only these commands are allowed.
    allowed_commands: Vec<String>,
}

impl RunShellTool {
    pub fn new(allowed_commands: Vec<String>) -> Self {
        Self { allowed_commands }
    }

    /// No allowlist: every command may run.
    pub fn unrestricted() -> Self {
        Self::new(Vec::new())
    }

    fn is_command_allowed(&self, command: &str) -> bool {
        if self.allowed_commands.is_empty() {
            return true;
        }

        if command.contains(SHELL_METACHARACTERS) {
            return false;
        }
        let base_cmd = command.split_whitespace().next().unwrap_or("");
        self.allowed_commands.iter().any(|a| a == base_cmd)
    }

    fn failed(reason: impl Into<String>) -> ToolError {
        ToolError::Failed {
            tool: "run_shell".into(),
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl Tool for RunShellTool {
    fn name(&self) -> &str {
        "run_shell"
    }

    fn description(&self) -> &str {
        "Run a shell command and return its output. Commands are killed after the timeout."
    }

    fn arguments(&self) -> Vec<ToolArgument> {
        vec![
            ToolArgument::new("command", "the command line to execute"),
            ToolArgument::new(
                "timeout",
                format!("optional, seconds, default {DEFAULT_TIMEOUT_SECS}"),
            ),
        ]
    }

    async fn execute(&self, arguments: &Map<String, Value>) -> Result<Value, ToolError> {
        let command = required_str(arguments, "command")?;
        let timeout_secs = integer_arg(arguments, "timeout")?
            .unwrap_or(DEFAULT_TIMEOUT_SECS)
            .max(1);

        if !self.is_command_allowed(command) {
            let reason = if command.contains(SHELL_METACHARACTERS) {
                "Command chaining, substitution and redirection are not allowed".to_string()
            } else {
                format!(
                    "Command '{}' not in allowlist",
                    command.split_whitespace().next().unwrap_or("")
                )
            };
            return Err(Self::failed(reason));
        }

        debug!(command = %command, timeout_secs, "Executing shell command");

        let mut cmd = if cfg!(target_os = "windows") {
            let mut c = Command::new("cmd");
            c.args(["/C", command]);
            c
        } else {
            let mut c = Command::new("sh");
            c.args(["-c", command]);
            c
        };
        cmd.kill_on_drop(true);

        let output = match tokio::time::timeout(Duration::from_secs(timeout_secs), cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(Self::failed(e.to_string())),
            Err(_) => {
                warn!(command = %command, timeout_secs, "Command timed out");
                return Err(ToolError::Timeout {
                    tool: "run_shell".into(),
                    secs: timeout_secs,
                });
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

        if output.status.success() {
            let text = if stdout.is_empty() {
                "(command succeeded with no output)".to_string()
            } else {
                stdout
            };
            Ok(Value::String(text))
        } else {
            let code = output.status.code().unwrap_or(-1);
            warn!(command = %command, exit_code = code, "Command failed");
            let detail = if stderr.is_empty() { stdout } else { stderr };
            Err(Self::failed(format!("exit code {code}: {detail}")))
        }
    }
}
