//! Tool trait and result type — the invocation contract every agent tool
//! implements.
//!
//! A tool returns a [`ToolResult`] with separate payloads for the model
//! (`for_llm`) and the user (`for_user`). Tools that need to know the
//! current conversation implement [`ContextualTool`]; the agent loop sets
//! their context before every round.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;

use picoclaw_core::types::ToolDefinition;

// ─────────────────────────────────────────────
// ToolResult
// ─────────────────────────────────────────────

/// Outcome of a tool invocation.
///
/// `for_llm` is non-empty whenever the tool at least started; on failure it
/// carries the machine-readable error so the model can react.
#[derive(Clone, Debug, Default)]
pub struct ToolResult {
    /// Text fed back to the model as the tool-role message.
    pub for_llm: String,
    /// Optional user-facing text published outbound by the loop.
    pub for_user: Option<String>,
    /// Suppress any user-facing output.
    pub silent: bool,
    /// The tool failed.
    pub is_error: bool,
    /// The tool started background work; completion arrives later on the
    /// `system` channel.
    pub async_task: bool,
    /// Media refs (`media://…`) to publish outbound.
    pub media: Vec<String>,
}

impl ToolResult {
    /// A normal result: the model sees it, the user does not (the model
    /// decides what to relay).
    pub fn ok(for_llm: impl Into<String>) -> Self {
        ToolResult {
            for_llm: for_llm.into(),
            silent: true,
            ..Default::default()
        }
    }

    /// A result with distinct user-facing text.
    pub fn with_user(for_llm: impl Into<String>, for_user: impl Into<String>) -> Self {
        ToolResult {
            for_llm: for_llm.into(),
            for_user: Some(for_user.into()),
            ..Default::default()
        }
    }

    /// A failed invocation; the message doubles as the model feedback.
    pub fn error(message: impl Into<String>) -> Self {
        ToolResult {
            for_llm: message.into(),
            is_error: true,
            silent: true,
            ..Default::default()
        }
    }

    /// Placeholder for a background task that reports later via the
    /// `system` channel.
    pub fn async_started(for_llm: impl Into<String>) -> Self {
        ToolResult {
            for_llm: for_llm.into(),
            silent: true,
            async_task: true,
            ..Default::default()
        }
    }

    /// Attach media refs.
    pub fn with_media(mut self, media: Vec<String>) -> Self {
        self.media = media;
        self
    }
}

// ─────────────────────────────────────────────
// Tool traits
// ─────────────────────────────────────────────

/// Every agent tool implements this trait.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique name used by the LLM to call this tool.
    fn name(&self) -> &str;

    /// Description shown to the LLM.
    fn description(&self) -> &str;

    /// JSON Schema of the parameters:
    /// `{"type": "object", "properties": {...}, "required": [...]}`.
    fn parameters(&self) -> Value;

    /// Execute the tool. Failures are reported inside the result, not as
    /// `Err` — the model must see them.
    async fn execute(&self, params: HashMap<String, Value>) -> ToolResult;

    /// Build the `ToolDefinition` sent to the LLM.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition::new(self.name(), self.description(), self.parameters())
    }
}

/// Capability interface for tools that act on the current conversation
/// (`message`, `spawn`, …). The loop calls `set_context` before each round.
#[async_trait]
pub trait ContextualTool: Tool {
    async fn set_context(&self, channel: &str, chat_id: &str);
}

// ─────────────────────────────────────────────
// Param helpers
// ─────────────────────────────────────────────

/// Extract a required string param.
pub fn require_string(params: &HashMap<String, Value>, key: &str) -> Result<String, String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| format!("Missing required parameter: {key}"))
}

/// Extract an optional string param.
pub fn optional_string(params: &HashMap<String, Value>, key: &str) -> Option<String> {
    params.get(key).and_then(|v| v.as_str()).map(|s| s.to_string())
}

/// Extract an optional integer param.
pub fn optional_i64(params: &HashMap<String, Value>, key: &str) -> Option<i64> {
    params.get(key).and_then(|v| v.as_i64())
}

/// Extract an optional boolean param (defaults to `false`).
pub fn optional_bool(params: &HashMap<String, Value>, key: &str) -> bool {
    params.get(key).and_then(|v| v.as_bool()).unwrap_or(false)
}
