//! Configuration schema — typed model of the `config.json` document.
//!
//! All keys are snake_case on disk (serde's default), so no rename
//! attributes are needed. Every section defaults so partial configs load.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::router::{Binding, DmScope};

// ─────────────────────────────────────────────
// Root config
// ─────────────────────────────────────────────

/// Root configuration — loaded from `config.json` + `PICOCLAW_*` env vars.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub agents: AgentsConfig,
    pub bindings: Vec<Binding>,
    pub session: SessionConfig,
    pub channels: HashMap<String, ChannelConfig>,
    /// Legacy flat provider table; superseded by `model_list`.
    pub providers: HashMap<String, LegacyProviderConfig>,
    pub model_list: Vec<ModelEntry>,
    pub gateway: GatewayConfig,
    pub tools: ToolsConfig,
    pub heartbeat: HeartbeatConfig,
    pub devices: DevicesConfig,
}

impl Config {
    /// Model-list entries matching a `model_name`, preserving order.
    /// Multiple entries with the same name are round-robined by the caller.
    pub fn model_entries(&self, model_name: &str) -> Vec<&ModelEntry> {
        self.model_list
            .iter()
            .filter(|e| e.model_name.eq_ignore_ascii_case(model_name))
            .collect()
    }

    /// The configured default agent: first entry flagged `default`, else the
    /// first listed agent, else the built-in `"main"`.
    pub fn default_agent_id(&self) -> String {
        self.agents
            .list
            .iter()
            .find(|a| a.default)
            .or_else(|| self.agents.list.first())
            .map(|a| a.id.clone())
            .unwrap_or_else(|| "main".to_string())
    }
}

// ─────────────────────────────────────────────
// Agents
// ─────────────────────────────────────────────

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentsConfig {
    pub defaults: AgentDefaults,
    pub list: Vec<AgentEntry>,
}

/// Defaults applied to every agent unless its entry overrides them.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentDefaults {
    /// Workspace directory (tilde-expanded at use).
    pub workspace: String,
    /// Default model name (a `model_list` alias or `provider/model`).
    pub model: String,
    /// Sampling temperature.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /// Maximum tokens to generate per response.
    pub max_tokens: u32,
    /// Maximum tool-calling loop iterations before forcing a response.
    pub max_tool_iterations: u32,
    /// Context window size in tokens (drives summarization thresholds).
    pub context_window: u32,
    /// Whether file/exec tools are sandboxed to the workspace.
    pub restrict_to_workspace: bool,
}

impl Default for AgentDefaults {
    fn default() -> Self {
        Self {
            workspace: "~/.picoclaw/workspace".to_string(),
            model: String::new(),
            temperature: None,
            max_tokens: 8192,
            max_tool_iterations: 20,
            context_window: 128_000,
            restrict_to_workspace: true,
        }
    }
}

/// An agent's model policy: a primary ref plus ordered fallbacks.
///
/// Serializes as a bare string when there are no fallbacks, and accepts
/// both the string and the `{ "primary": …, "fallbacks": […] }` forms.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AgentModelConfig {
    pub primary: String,
    pub fallbacks: Vec<String>,
}

impl AgentModelConfig {
    pub fn new(primary: impl Into<String>) -> Self {
        Self {
            primary: primary.into(),
            fallbacks: Vec::new(),
        }
    }

    pub fn with_fallbacks(primary: impl Into<String>, fallbacks: Vec<String>) -> Self {
        Self {
            primary: primary.into(),
            fallbacks,
        }
    }
}

impl Serialize for AgentModelConfig {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if self.fallbacks.is_empty() {
            serializer.serialize_str(&self.primary)
        } else {
            use serde::ser::SerializeStruct;
            let mut s = serializer.serialize_struct("AgentModelConfig", 2)?;
            s.serialize_field("primary", &self.primary)?;
            s.serialize_field("fallbacks", &self.fallbacks)?;
            s.end()
        }
    }
}

impl<'de> Deserialize<'de> for AgentModelConfig {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Primary(String),
            Full {
                primary: String,
                #[serde(default)]
                fallbacks: Vec<String>,
            },
        }

        Ok(match Repr::deserialize(deserializer)? {
            Repr::Primary(primary) => AgentModelConfig::new(primary),
            Repr::Full { primary, fallbacks } => AgentModelConfig { primary, fallbacks },
        })
    }
}

/// A configured agent identity.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentEntry {
    /// Identifier (normalized to lowercase, spaces → "-").
    pub id: String,
    /// Display name; falls back to the id.
    pub name: String,
    /// Per-agent workspace override.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace: Option<String>,
    /// Per-agent model policy (primary + fallbacks).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<AgentModelConfig>,
    /// Skill slugs this agent may load; empty = all.
    pub skills: Vec<String>,
    /// Agent ids this agent may spawn subagents for; empty = only itself.
    pub allow_agents: Vec<String>,
    /// Marks the default agent for unbound messages.
    pub default: bool,
}

// ─────────────────────────────────────────────
// Session / routing
// ─────────────────────────────────────────────

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub dm_scope: DmScope,
    /// canonical name → list of `platform:id` (or bare) aliases.
    pub identity_links: HashMap<String, Vec<String>>,
}

// ─────────────────────────────────────────────
// Channels
// ─────────────────────────────────────────────

/// Per-transport channel configuration. Transport-specific keys (tokens,
/// URLs, app ids) live in `extra` and are interpreted by the adapter.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    pub enabled: bool,
    /// Sender allowlist; empty = allow everyone. Entries: bare id,
    /// `@username`, `id|username`, or canonical `platform:id`.
    pub allow_from: Vec<String>,
    /// Group-chat trigger settings.
    pub group_trigger: GroupTriggerConfig,
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

/// When the agent responds in group chats.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupTriggerConfig {
    /// Require an @-mention of the bot.
    pub require_mention: bool,
    /// Alternative trigger prefixes, stripped from content on match.
    pub prefixes: Vec<String>,
}

impl Default for GroupTriggerConfig {
    fn default() -> Self {
        Self {
            require_mention: true,
            prefixes: Vec::new(),
        }
    }
}

// ─────────────────────────────────────────────
// Providers / model list
// ─────────────────────────────────────────────

/// Legacy flat provider config (`providers.<name>`).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LegacyProviderConfig {
    pub api_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_base: Option<String>,
    /// Default model for this provider.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl LegacyProviderConfig {
    pub fn is_configured(&self) -> bool {
        !self.api_key.is_empty() || self.api_base.is_some()
    }
}

/// One endpoint in the preferred `model_list` form.
///
/// `model` is `protocol/model-id`; the protocol defaults to `openai`.
/// Multiple entries may share a `model_name` — the core round-robins them.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelEntry {
    pub model_name: String,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_base: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connect_mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace: Option<String>,
    /// Requests-per-minute budget, advisory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rpm: Option<u32>,
    /// Request-body field name for the token limit, when non-standard.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens_field: Option<String>,
    /// Per-request timeout in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_timeout: Option<u64>,
}

impl ModelEntry {
    /// Wire protocol segment of `model` ("openai" when unspecified).
    pub fn protocol(&self) -> &str {
        match self.model.split_once('/') {
            Some((protocol, _)) => protocol,
            None => "openai",
        }
    }

    /// Model-id segment of `model`.
    pub fn model_id(&self) -> &str {
        match self.model.split_once('/') {
            Some((_, id)) => id,
            None => &self.model,
        }
    }
}

// ─────────────────────────────────────────────
// Gateway / tools / heartbeat / devices
// ─────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 18790,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub web: WebToolsConfig,
    pub exec: ExecToolConfig,
    pub cron: CronToolConfig,
    pub skills: SkillsToolConfig,
    pub media_cleanup: MediaCleanupConfig,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WebToolsConfig {
    pub search: WebSearchConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct WebSearchConfig {
    pub api_key: String,
    pub max_results: u32,
}

impl Default for WebSearchConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            max_results: 5,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecToolConfig {
    /// Timeout in seconds for shell commands.
    pub timeout: u64,
    /// Regex patterns that reject a command outright.
    pub deny_patterns: Vec<String>,
}

impl Default for ExecToolConfig {
    fn default() -> Self {
        Self {
            timeout: 60,
            deny_patterns: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CronToolConfig {
    pub enabled: bool,
}

impl Default for CronToolConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SkillsToolConfig {
    pub enabled: bool,
}

impl Default for SkillsToolConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// TTL cleanup of the media store. Zero values disable it.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaCleanupConfig {
    pub max_age_minutes: u64,
    pub interval_minutes: u64,
}

/// Minimum allowed heartbeat interval.
pub const MIN_HEARTBEAT_INTERVAL_MINUTES: u64 = 5;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    pub enabled: bool,
    pub interval_minutes: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_minutes: 30,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DevicesConfig {
    pub enabled: bool,
    pub monitor_usb: bool,
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.agents.defaults.max_tokens, 8192);
        assert_eq!(config.agents.defaults.max_tool_iterations, 20);
        assert_eq!(config.gateway.port, 18790);
        assert!(config.agents.defaults.restrict_to_workspace);
        assert_eq!(config.default_agent_id(), "main");
    }

    #[test]
    fn test_config_uses_snake_case() {
        let config = Config::default();
        let json = serde_json::to_value(&config).unwrap();
        assert!(json["agents"]["defaults"].get("max_tokens").is_some());
        assert!(json["agents"]["defaults"].get("maxTokens").is_none());
        assert!(json["gateway"].get("port").is_some());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: Config = serde_json::from_str(r#"{"gateway": {"port": 9090}}"#).unwrap();
        assert_eq!(config.gateway.port, 9090);
        assert_eq!(config.gateway.host, "0.0.0.0");
        assert_eq!(config.agents.defaults.max_tokens, 8192);
    }

    #[test]
    fn test_agents_list_and_default() {
        let json = serde_json::json!({
            "agents": {
                "list": [
                    {"id": "support", "model": "gpt-4o"},
                    {"id": "main", "default": true,
                     "model": {"primary": "smart", "fallbacks": ["backup-model"]}}
                ]
            }
        });
        let config: Config = serde_json::from_value(json).unwrap();
        assert_eq!(config.default_agent_id(), "main");

        let support = config.agents.list[0].model.as_ref().unwrap();
        assert_eq!(support.primary, "gpt-4o");
        assert!(support.fallbacks.is_empty());

        let main = config.agents.list[1].model.as_ref().unwrap();
        assert_eq!(main.primary, "smart");
        assert_eq!(main.fallbacks, vec!["backup-model"]);
    }

    #[test]
    fn test_agent_model_config_round_trips_both_forms() {
        // Lone primary marshals as a bare string
        let lone = AgentModelConfig::new("gpt-4o");
        let json = serde_json::to_value(&lone).unwrap();
        assert_eq!(json, serde_json::json!("gpt-4o"));
        let back: AgentModelConfig = serde_json::from_value(json).unwrap();
        assert_eq!(back, lone);

        // With fallbacks it marshals as an object
        let full = AgentModelConfig::with_fallbacks("smart", vec!["fast".into()]);
        let json = serde_json::to_value(&full).unwrap();
        assert_eq!(json["primary"], "smart");
        assert_eq!(json["fallbacks"][0], "fast");
        let back: AgentModelConfig = serde_json::from_value(json).unwrap();
        assert_eq!(back, full);
    }

    #[test]
    fn test_default_agent_falls_back_to_first() {
        let json = serde_json::json!({
            "agents": { "list": [ {"id": "alpha"}, {"id": "beta"} ] }
        });
        let config: Config = serde_json::from_value(json).unwrap();
        assert_eq!(config.default_agent_id(), "alpha");
    }

    #[test]
    fn test_bindings_parse() {
        let json = serde_json::json!({
            "bindings": [
                {"agent": "support", "match": {"channel": "slack", "team_id": "T1"}}
            ]
        });
        let config: Config = serde_json::from_value(json).unwrap();
        assert_eq!(config.bindings.len(), 1);
        assert_eq!(config.bindings[0].agent, "support");
        assert_eq!(config.bindings[0].criteria.channel.as_deref(), Some("slack"));
    }

    #[test]
    fn test_session_config_parse() {
        let json = serde_json::json!({
            "session": {
                "dm_scope": "per-channel-peer",
                "identity_links": { "alice": ["telegram:1", "discord:2"] }
            }
        });
        let config: Config = serde_json::from_value(json).unwrap();
        assert_eq!(config.session.dm_scope, DmScope::PerChannelPeer);
        assert_eq!(config.session.identity_links["alice"].len(), 2);
    }

    #[test]
    fn test_channel_config_extra_keys() {
        let json = serde_json::json!({
            "channels": {
                "telegram": {
                    "enabled": true,
                    "allow_from": ["@alice", "12345"],
                    "token": "bot123:ABC"
                }
            }
        });
        let config: Config = serde_json::from_value(json).unwrap();
        let tg = &config.channels["telegram"];
        assert!(tg.enabled);
        assert_eq!(tg.allow_from, vec!["@alice", "12345"]);
        assert_eq!(tg.extra["token"], "bot123:ABC");
        assert!(tg.group_trigger.require_mention);
    }

    #[test]
    fn test_model_entry_protocol_split() {
        let entry = ModelEntry {
            model_name: "fast".into(),
            model: "anthropic/claude-sonnet-4".into(),
            ..Default::default()
        };
        assert_eq!(entry.protocol(), "anthropic");
        assert_eq!(entry.model_id(), "claude-sonnet-4");
    }

    #[test]
    fn test_model_entry_default_protocol() {
        let entry = ModelEntry {
            model_name: "plain".into(),
            model: "gpt-4o".into(),
            ..Default::default()
        };
        assert_eq!(entry.protocol(), "openai");
        assert_eq!(entry.model_id(), "gpt-4o");
    }

    #[test]
    fn test_model_entries_round_robin_group() {
        let json = serde_json::json!({
            "model_list": [
                {"model_name": "fast", "model": "openai/gpt-4o-mini", "api_key": "k1"},
                {"model_name": "fast", "model": "openai/gpt-4o-mini", "api_key": "k2"},
                {"model_name": "smart", "model": "anthropic/claude-opus-4"}
            ]
        });
        let config: Config = serde_json::from_value(json).unwrap();
        assert_eq!(config.model_entries("fast").len(), 2);
        assert_eq!(config.model_entries("FAST").len(), 2);
        assert_eq!(config.model_entries("smart").len(), 1);
        assert!(config.model_entries("missing").is_empty());
    }

    #[test]
    fn test_legacy_provider_config() {
        let json = serde_json::json!({
            "providers": {
                "openai": {"api_key": "sk-123"},
                "vllm": {"api_base": "http://localhost:8000/v1"}
            }
        });
        let config: Config = serde_json::from_value(json).unwrap();
        assert!(config.providers["openai"].is_configured());
        assert!(config.providers["vllm"].is_configured());
    }

    #[test]
    fn test_config_round_trip() {
        let mut config = Config::default();
        config.model_list.push(ModelEntry {
            model_name: "fast".into(),
            model: "openai/gpt-4o-mini".into(),
            api_key: Some("k".into()),
            request_timeout: Some(30),
            ..Default::default()
        });
        let json = serde_json::to_string_pretty(&config).unwrap();
        let back: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(back.model_list.len(), 1);
        assert_eq!(back.model_list[0].request_timeout, Some(30));
    }
}
