//! Tool registry — named lookup and dispatch.
//!
//! Mutation happens only during startup (the agent loop is the sole owner);
//! after that the registry is read-only. Contextual tools are tracked
//! separately so the loop can set conversation context on all of them
//! before each round.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::{info, warn};

use picoclaw_core::types::ToolDefinition;

use super::base::{ContextualTool, Tool, ToolResult};

/// Stores tools keyed by name and dispatches calls.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    contextual: Vec<Arc<dyn ContextualTool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            contextual: Vec::new(),
        }
    }

    /// Register a tool. Overwrites any previous tool with the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        info!(tool = tool.name(), "registered tool");
        self.tools.insert(tool.name().to_string(), tool);
    }

    /// Register a contextual tool: dispatchable by name and included in
    /// per-round context updates.
    pub fn register_contextual<T: ContextualTool + 'static>(&mut self, tool: Arc<T>) {
        self.contextual.push(tool.clone());
        self.register(tool);
    }

    /// Set the conversation context on every contextual tool.
    pub async fn set_context_all(&self, channel: &str, chat_id: &str) {
        for tool in &self.contextual {
            tool.set_context(channel, chat_id).await;
        }
    }

    pub fn has(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    /// Names of all registered tools, sorted for determinism.
    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// LLM-facing definitions for all registered tools, sorted by name.
    pub fn get_definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self.tools.values().map(|t| t.to_definition()).collect();
        defs.sort_by(|a, b| a.function.name.cmp(&b.function.name));
        defs
    }

    /// Execute a tool by name. Unknown tools and failures both come back as
    /// error results so the model always gets feedback.
    pub async fn execute(&self, name: &str, params: HashMap<String, Value>) -> ToolResult {
        let tool = match self.tools.get(name) {
            Some(t) => t,
            None => {
                warn!(tool = name, "tool not found");
                return ToolResult::error(format!("Error: Tool '{name}' not found"));
            }
        };

        let result = tool.execute(params).await;
        if result.is_error {
            warn!(tool = name, error = %result.for_llm, "tool execution failed");
        }
        result
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
