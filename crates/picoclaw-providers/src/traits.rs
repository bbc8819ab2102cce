//! LLM provider trait — the contract the core requires of every backend.
//!
//! Provider implementations are opaque to the core: it needs only `chat`
//! plus an optional `close` for stateful providers. Failures come back as
//! [`ProviderError`] so the fallback chain can classify them.

use async_trait::async_trait;

use picoclaw_core::types::{LlmResponse, Message, ToolDefinition};

use crate::error::ProviderError;

/// Per-call request options.
#[derive(Clone, Debug)]
pub struct ChatOptions {
    /// Maximum tokens to generate.
    pub max_tokens: u32,
    /// Sampling temperature.
    pub temperature: f64,
}

impl Default for ChatOptions {
    fn default() -> Self {
        Self {
            max_tokens: 4096,
            temperature: 0.7,
        }
    }
}

/// Trait that all LLM providers implement.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Send a chat completion request.
    ///
    /// # Arguments
    /// * `messages` — Conversation in OpenAI format.
    /// * `tools`    — Optional tool definitions the model can call.
    /// * `model`    — Model identifier.
    /// * `options`  — Temperature, max_tokens.
    async fn chat(
        &self,
        messages: &[Message],
        tools: Option<&[ToolDefinition]>,
        model: &str,
        options: &ChatOptions,
    ) -> Result<LlmResponse, ProviderError>;

    /// The default model for this provider instance.
    fn default_model(&self) -> &str;

    /// Display name for logging.
    fn display_name(&self) -> &str;

    /// Release held resources (connections, local runtimes). Default no-op.
    async fn close(&self) {}
}
