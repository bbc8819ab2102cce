//! Generic HTTP provider for OpenAI-compatible `/chat/completions` APIs.
//!
//! One `HttpProvider` per `model_list` entry. Covers OpenAI, Anthropic,
//! DeepSeek, Groq, OpenRouter, ZhiPu, Moonshot, vLLM, and any other endpoint
//! speaking the same wire format. Failures come back as typed
//! [`ProviderError`]s for the classifier.

use async_trait::async_trait;
use tracing::debug;

use picoclaw_core::config::schema::ModelEntry;
use picoclaw_core::types::{
    ChatCompletionRequest, ChatCompletionResponse, LlmResponse, Message, ToolDefinition,
};

use crate::error::ProviderError;
use crate::traits::{ChatOptions, LlmProvider};

/// Default per-request timeout in seconds.
const DEFAULT_REQUEST_TIMEOUT_S: u64 = 120;

/// Known protocol → default API base.
fn default_api_base(protocol: &str) -> &'static str {
    match protocol {
        "anthropic" => "https://api.anthropic.com/v1",
        "deepseek" => "https://api.deepseek.com/v1",
        "groq" => "https://api.groq.com/openai/v1",
        "openrouter" => "https://openrouter.ai/api/v1",
        "zhipu" => "https://open.bigmodel.cn/api/paas/v4",
        "moonshot" => "https://api.moonshot.cn/v1",
        "gemini" => "https://generativelanguage.googleapis.com/v1beta/openai",
        _ => "https://api.openai.com/v1",
    }
}

/// A provider instance bound to one configured endpoint.
pub struct HttpProvider {
    client: reqwest::Client,
    api_base: String,
    api_key: String,
    default_model: String,
    display_name: String,
}

impl std::fmt::Debug for HttpProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpProvider")
            .field("api_base", &self.api_base)
            .field("default_model", &self.default_model)
            .finish()
    }
}

impl HttpProvider {
    /// Build a provider from a `model_list` entry.
    pub fn from_entry(entry: &ModelEntry) -> Result<Self, ProviderError> {
        let api_base = entry
            .api_base
            .clone()
            .unwrap_or_else(|| default_api_base(entry.protocol()).to_string());

        let timeout = entry.request_timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT_S);

        let mut builder =
            reqwest::Client::builder().timeout(std::time::Duration::from_secs(timeout));
        if let Some(proxy_url) = &entry.proxy {
            let proxy = reqwest::Proxy::all(proxy_url)
                .map_err(|e| ProviderError::Network(format!("invalid proxy: {e}")))?;
            builder = builder.proxy(proxy);
        }
        let client = builder
            .build()
            .map_err(|e| ProviderError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(HttpProvider {
            client,
            api_base,
            api_key: entry.api_key.clone().unwrap_or_default(),
            default_model: entry.model_id().to_string(),
            display_name: entry.model_name.clone(),
        })
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.api_base.trim_end_matches('/'))
    }
}

#[async_trait]
impl LlmProvider for HttpProvider {
    async fn chat(
        &self,
        messages: &[Message],
        tools: Option<&[ToolDefinition]>,
        model: &str,
        options: &ChatOptions,
    ) -> Result<LlmResponse, ProviderError> {
        debug!(
            provider = %self.display_name,
            model = %model,
            messages = messages.len(),
            tools = tools.map_or(0, |t| t.len()),
            "calling LLM"
        );

        let request_body = ChatCompletionRequest {
            model: model.to_string(),
            messages: messages.to_vec(),
            tools: tools.map(|t| t.to_vec()),
            tool_choice: tools.map(|_| "auto".to_string()),
            max_tokens: Some(options.max_tokens),
            temperature: Some(options.temperature),
        };

        let response = self
            .client
            .post(self.completions_url())
            .bearer_auth(&self.api_key)
            .json(&request_body)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "failed to read error body".to_string());
            return Err(ProviderError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let chat_resp: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Malformed(e.to_string()))?;

        let llm_resp: LlmResponse = chat_resp
            .try_into()
            .map_err(|e: &str| ProviderError::Malformed(e.to_string()))?;

        debug!(
            provider = %self.display_name,
            has_content = llm_resp.content.is_some(),
            tool_calls = llm_resp.tool_calls.len(),
            "LLM response received"
        );
        Ok(llm_resp)
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }

    fn display_name(&self) -> &str {
        &self.display_name
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
