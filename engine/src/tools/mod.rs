//! Tool registry
//!
//! Tools are the only way the agent acts on the world. Each tool takes a JSON
//! argument object and returns text that is recorded as the action output.

pub mod filesystem;
pub mod workspace;

pub use filesystem::{ListDirTool, ReadFileTool, WriteFileTool};
pub use workspace::Workspace;

use async_trait::async_trait;
use sdk::errors::{EngineError, Result};
use std::sync::Arc;
use tracing::{debug, warn};

/// A capability the agent can invoke by name
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    /// One-line description shown to the model
    fn description(&self) -> &str;

    /// Example argument object shown to the model
    fn arguments_hint(&self) -> &str {
        "{}"
    }

    async fn execute(&self, args: serde_json::Value) -> Result<String>;
}

/// Tools available to the scheduler, in registration order
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the workspace-scoped filesystem tools
    pub fn with_filesystem(workspace: Arc<Workspace>) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(ReadFileTool::new(workspace.clone())));
        registry.register(Arc::new(ListDirTool::new(workspace.clone())));
        registry.register(Arc::new(WriteFileTool::new(workspace)));
        registry
    }

    /// Add a tool; a tool with the same name is replaced
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.retain(|t| t.name() != tool.name());
        self.tools.push(tool);
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Prompt block describing the call format and every tool
    pub fn describe(&self) -> String {
        if self.tools.is_empty() {
            return "No tools are available. Respond with reasoning only.".to_string();
        }

        let mut parts = vec![
            "To call tools, include one JSON object per call:".to_string(),
            r#"{"function": "tool_name", "arguments": {"arg1": "value1"}}"#.to_string(),
            "Several calls in one response run concurrently. Never invent tool output."
                .to_string(),
            String::new(),
            "Available tools:".to_string(),
        ];

        for tool in &self.tools {
            parts.push(String::new());
            parts.push(format!("## {}", tool.name()));
            parts.push(tool.description().to_string());
            parts.push(format!("Arguments: {}", tool.arguments_hint()));
        }

        parts.join("\n")
    }

    /// Run a tool by name with JSON-encoded arguments
    pub async fn dispatch(&self, name: &str, arguments_json: &str) -> Result<String> {
        debug!("Dispatching tool '{}' with args: {}", name, arguments_json);

        let Some(tool) = self.tools.iter().find(|t| t.name() == name) else {
            warn!("Unknown tool requested: {}", name);
            return Err(EngineError::ToolNotFound(format!(
                "'{}'. Available tools: {}",
                name,
                self.names().join(", ")
            )));
        };

        let args = if arguments_json.trim().is_empty() {
            serde_json::Value::Object(Default::default())
        } else {
            serde_json::from_str(arguments_json).map_err(|e| {
                EngineError::ToolError(format!("Failed to parse arguments JSON: {}", e))
            })?
        };

        tool.execute(args).await
    }
}

/// Required string argument
pub(crate) fn str_arg<'a>(args: &'a serde_json::Value, key: &str) -> Result<&'a str> {
    args.get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| EngineError::ToolError(format!("Missing string argument '{}'", key)))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl Tool for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Echo the text argument"
        }

        async fn execute(&self, args: serde_json::Value) -> Result<String> {
            Ok(str_arg(&args, "text")?.to_string())
        }
    }

    #[tokio::test]
    async fn test_dispatch() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(Echo));

        let out = registry.dispatch("echo", r#"{"text": "hi"}"#).await.unwrap();
        assert_eq!(out, "hi");

        let missing = registry.dispatch("echo", "{}").await;
        assert!(matches!(missing, Err(EngineError::ToolError(_))));

        let unknown = registry.dispatch("nope", "{}").await;
        assert!(matches!(unknown, Err(EngineError::ToolNotFound(_))));

        let bad_json = registry.dispatch("echo", "{not json").await;
        assert!(matches!(bad_json, Err(EngineError::ToolError(_))));
    }

    #[test]
    fn test_register_replaces_by_name() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(Echo));
        registry.register(Arc::new(Echo));
        assert_eq!(registry.names(), vec!["echo"]);
        assert!(registry.describe().contains("## echo"));
    }

    #[test]
    fn test_empty_registry_description() {
        assert!(ToolRegistry::new().describe().contains("No tools"));
    }
}
