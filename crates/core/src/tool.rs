//! Tool traits: the abstraction over agent capabilities.
//!
//! The orchestrator only sees [`ToolRegistry`]: a name → result contract.
//! [`ToolSet`] is the standard registry, populated by explicit registration
//! at startup.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::ToolError;

/// One argument accepted by a tool, as described to the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolArgument {
    pub name: String,
    pub hint: String,
}

impl ToolArgument {
    pub fn new(name: impl Into<String>, hint: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            hint: hint.into(),
        }
    }
}

/// Prompt-facing description of a registered tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub arguments: Vec<ToolArgument>,
}

/// A single executable tool.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "read_file", "run_shell").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the model).
    fn description(&self) -> &str;

    /// The arguments this tool accepts, in the order they are documented.
    fn arguments(&self) -> Vec<ToolArgument>;

    /// Execute the tool with the given arguments.
    async fn execute(&self, arguments: &Map<String, Value>) -> std::result::Result<Value, ToolError>;

    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: self.name().to_string(),
            description: self.description().to_string(),
            arguments: self.arguments(),
        }
    }
}

/// The orchestrator's view of tool execution.
///
/// Implementations must be safe for concurrent use by independent turns.
#[async_trait]
pub trait ToolRegistry: Send + Sync {
    /// Descriptors of every available tool (used for the tool guide).
    fn descriptors(&self) -> Vec<ToolDescriptor>;

    /// Invoke `name` with `args`. Unknown tools yield [`ToolError::NotFound`].
    async fn call(&self, name: &str, args: &Map<String, Value>) -> std::result::Result<Value, ToolError>;
}

/// A registry of tools keyed by name.
#[derive(Default, Clone)]
pub struct ToolSet {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        self.tools.insert(name, tool);
    }

    /// Builder-style [`register`](Self::register).
    pub fn with(mut self, tool: Arc<dyn Tool>) -> Self {
        self.register(tool);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    /// List all registered tool names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[async_trait]
impl ToolRegistry for ToolSet {
    fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.names()
            .into_iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| tool.descriptor())
            .collect()
    }

    async fn call(&self, name: &str, args: &Map<String, Value>) -> std::result::Result<Value, ToolError> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;
        tool.execute(args).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// A simple test tool for unit tests.
    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str { "echo" }
        fn description(&self) -> &str { "Echoes back the input" }
        fn arguments(&self) -> Vec<ToolArgument> {
            vec![ToolArgument::new("text", "text to echo")]
        }
        async fn execute(&self, arguments: &Map<String, Value>) -> std::result::Result<Value, ToolError> {
            arguments
                .get("text")
                .cloned()
                .ok_or_else(|| ToolError::InvalidArguments("missing 'text'".into()))
        }
    }

    fn args(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn register_and_lookup() {
        let set = ToolSet::new().with(Arc::new(EchoTool));
        assert!(set.get("echo").is_some());
        assert!(set.get("nonexistent").is_none());
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn descriptors_carry_arguments() {
        let set = ToolSet::new().with(Arc::new(EchoTool));
        let descriptors = set.descriptors();
        assert_eq!(descriptors.len(), 1);
        assert_eq!(descriptors[0].name, "echo");
        assert_eq!(descriptors[0].arguments[0].name, "text");
    }

    #[tokio::test]
    async fn call_registered_tool() {
        let set = ToolSet::new().with(Arc::new(EchoTool));
        let out = set.call("echo", &args(json!({"text": "hello"}))).await.unwrap();
        assert_eq!(out, json!("hello"));
    }

    #[tokio::test]
    async fn call_missing_tool() {
        let set = ToolSet::new();
        let err = set.call("nonexistent", &Map::new()).await.unwrap_err();
        assert!(matches!(err, ToolError::NotFound(_)));
    }
}
