//! Tool trait and registry — the abstraction over local capabilities.
//!
//! Tools are what the model can act through: file reads and writes, shell
//! commands, searches. Concrete implementations live outside this engine;
//! here we define the contract they plug into and the registry the
//! tool-cycle engine looks them up in.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::cancel::CancelToken;
use crate::error::ToolError;

/// A tool invocation as decoded from a provider turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Name of the tool to execute
    pub name: String,

    /// Parameters as a JSON object (may be empty when the provider's
    /// argument JSON failed to parse)
    pub parameters: serde_json::Value,
}

/// The outcome of one tool execution.
///
/// An outcome with `error` set is still a successful return from the
/// engine's point of view: it becomes ordinary conversation content for the
/// model to react to, never a thrown fault.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutput {
    pub name: String,

    /// The text handed back to the model
    pub text: String,

    /// Set when the execution itself failed (unknown tool, defensive error)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolOutput {
    pub fn ok(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            text: text.into(),
            error: None,
        }
    }

    pub fn failed(name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            text: String::new(),
            error: Some(error.into()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// The content for the tool_result block: the result text, or the
    /// error rendered as `Error: ...` content.
    pub fn content(&self) -> String {
        match &self.error {
            Some(error) => format!("Error: {error}"),
            None => self.text.clone(),
        }
    }
}

/// A tool definition as advertised to the provider: name, description and
/// parameter schema only. The executor never leaves the process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// The contract every local capability implements.
///
/// Expected failures (missing parameter, file not found) must come back as
/// descriptive result text, not as `Err`; returning `Err` is reserved for
/// cancellation observed mid-execution.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g. "read_file", "bash_command").
    fn name(&self) -> &str;

    /// What this tool does, sent to the model.
    fn description(&self) -> &str;

    /// JSON Schema (`{type, properties, required}`) for the parameters.
    fn input_schema(&self) -> serde_json::Value;

    /// Run the tool. Implementations should check `cancel` around any
    /// long-running work and return `ToolError::Cancelled` when observed.
    async fn execute(
        &self,
        params: &serde_json::Value,
        cancel: &CancelToken,
    ) -> std::result::Result<String, ToolError>;

    /// The provider-facing definition of this tool.
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: self.input_schema(),
        }
    }
}

/// A registry of available tools.
///
/// Registered once at startup and immutable for the process lifetime. All
/// access happens on the single orchestration path, so a plain map is
/// enough.
pub struct ToolRegistry {
    tools: HashMap<String, Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool, replacing any existing tool with the same name.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        let name = tool.name().to_string();
        self.tools.insert(name, tool);
    }

    /// Look up a tool by name. An unknown name is a data-level miss, not an
    /// error; callers turn it into a tool-result message.
    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|t| t.as_ref())
    }

    /// All registered tools.
    pub fn list(&self) -> Vec<&dyn Tool> {
        self.tools.values().map(|t| t.as_ref()).collect()
    }

    /// Provider-facing definitions for every registered tool.
    pub fn describe_for_provider(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|t| t.definition()).collect()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
