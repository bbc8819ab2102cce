//! Config loader — reads `config.json`, migrates legacy sections, and
//! applies `PICOCLAW_*` environment overrides.
//!
//! # Loading precedence
//! 1. Defaults (from `Config::default()`)
//! 2. JSON file
//! 3. Environment variables `PICOCLAW_<SECTION>_<FIELD>` (override JSON)

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use super::schema::{Config, ModelEntry, MIN_HEARTBEAT_INTERVAL_MINUTES};
use crate::utils;

/// Default config file path (`~/.picoclaw/config.json`).
pub fn get_config_path() -> PathBuf {
    utils::get_data_path().join("config.json")
}

/// Load configuration from `path` (or the default location) plus env vars.
///
/// Returns an error only on unreadable/unparseable files; a missing file
/// yields defaults.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    let config_path = path.map(PathBuf::from).unwrap_or_else(get_config_path);
    load_config_from_path(&config_path)
}

fn load_config_from_path(path: &Path) -> anyhow::Result<Config> {
    let mut config = if path.exists() {
        debug!(path = %path.display(), "loading config");
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read config {}: {e}", path.display()))?;
        serde_json::from_str::<Config>(&content)
            .map_err(|e| anyhow::anyhow!("failed to parse config {}: {e}", path.display()))?
    } else {
        info!(path = %path.display(), "no config file, using defaults");
        Config::default()
    };

    migrate_legacy_providers(&mut config);
    apply_env_overrides(&mut config);
    clamp_limits(&mut config);
    Ok(config)
}

/// Save configuration to disk (pretty-printed, atomic).
pub fn save_config(config: &Config, path: Option<&Path>) -> std::io::Result<()> {
    let config_path = path.map(PathBuf::from).unwrap_or_else(get_config_path);
    utils::atomic_write_json(&config_path, config)
}

/// Synthesize `model_list` entries from the legacy `providers.*` table.
///
/// Runs only when `model_list` is empty; when both forms are present,
/// `model_list` wins and `providers` is left untouched.
fn migrate_legacy_providers(config: &mut Config) {
    if !config.model_list.is_empty() {
        return;
    }

    let default_model_id = config
        .agents
        .defaults
        .model
        .rsplit('/')
        .next()
        .filter(|m| !m.is_empty())
        .map(|m| m.to_string());

    let mut names: Vec<String> = config.providers.keys().cloned().collect();
    names.sort();

    for name in names {
        let provider = match config.providers.get(&name) {
            Some(p) => p.clone(),
            None => continue,
        };
        if !provider.is_configured() {
            continue;
        }
        let model_id = provider
            .model
            .clone()
            .or_else(|| default_model_id.clone())
            .unwrap_or_else(|| "default".to_string());

        config.model_list.push(ModelEntry {
            model_name: name.clone(),
            model: format!("{}/{}", name, model_id),
            api_base: provider.api_base.clone(),
            api_key: if provider.api_key.is_empty() {
                None
            } else {
                Some(provider.api_key.clone())
            },
            ..Default::default()
        });
        debug!(provider = %name, "migrated legacy provider to model_list");
    }
}

/// Apply `PICOCLAW_*` environment overrides.
///
/// Variable names follow the config path, all uppercase, `_`-joined:
/// `PICOCLAW_AGENTS_DEFAULTS_MODEL`, `PICOCLAW_GATEWAY_PORT`, and so on.
/// Booleans accept `true/1`; lists are comma-separated.
fn apply_env_overrides(config: &mut Config) {
    fn var(name: &str) -> Option<String> {
        std::env::var(name).ok().filter(|v| !v.is_empty())
    }

    // Agent defaults
    if let Some(v) = var("PICOCLAW_AGENTS_DEFAULTS_WORKSPACE") {
        config.agents.defaults.workspace = v;
    }
    if let Some(v) = var("PICOCLAW_AGENTS_DEFAULTS_MODEL") {
        config.agents.defaults.model = v;
    }
    if let Some(v) = var("PICOCLAW_AGENTS_DEFAULTS_MAX_TOKENS") {
        if let Ok(n) = v.parse() {
            config.agents.defaults.max_tokens = n;
        }
    }
    if let Some(v) = var("PICOCLAW_AGENTS_DEFAULTS_TEMPERATURE") {
        if let Ok(t) = v.parse() {
            config.agents.defaults.temperature = Some(t);
        }
    }
    if let Some(v) = var("PICOCLAW_AGENTS_DEFAULTS_MAX_TOOL_ITERATIONS") {
        if let Ok(n) = v.parse() {
            config.agents.defaults.max_tool_iterations = n;
        }
    }
    if let Some(v) = var("PICOCLAW_AGENTS_DEFAULTS_RESTRICT_TO_WORKSPACE") {
        config.agents.defaults.restrict_to_workspace = parse_bool(&v);
    }

    // Gateway
    if let Some(v) = var("PICOCLAW_GATEWAY_HOST") {
        config.gateway.host = v;
    }
    if let Some(v) = var("PICOCLAW_GATEWAY_PORT") {
        if let Ok(p) = v.parse() {
            config.gateway.port = p;
        }
    }

    // Tools
    if let Some(v) = var("PICOCLAW_TOOLS_EXEC_TIMEOUT") {
        if let Ok(t) = v.parse() {
            config.tools.exec.timeout = t;
        }
    }
    if let Some(v) = var("PICOCLAW_TOOLS_EXEC_DENY_PATTERNS") {
        config.tools.exec.deny_patterns = split_list(&v);
    }
    if let Some(v) = var("PICOCLAW_TOOLS_WEB_SEARCH_API_KEY") {
        config.tools.web.search.api_key = v;
    }

    // Heartbeat
    if let Some(v) = var("PICOCLAW_HEARTBEAT_ENABLED") {
        config.heartbeat.enabled = parse_bool(&v);
    }
    if let Some(v) = var("PICOCLAW_HEARTBEAT_INTERVAL_MINUTES") {
        if let Ok(m) = v.parse() {
            config.heartbeat.interval_minutes = m;
        }
    }

    // Devices
    if let Some(v) = var("PICOCLAW_DEVICES_ENABLED") {
        config.devices.enabled = parse_bool(&v);
    }
}

fn parse_bool(v: &str) -> bool {
    matches!(v.trim(), "true" | "1" | "yes")
}

fn split_list(v: &str) -> Vec<String> {
    v.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Enforce configured minimums after all overrides.
fn clamp_limits(config: &mut Config) {
    if config.heartbeat.interval_minutes < MIN_HEARTBEAT_INTERVAL_MINUTES {
        warn!(
            requested = config.heartbeat.interval_minutes,
            minimum = MIN_HEARTBEAT_INTERVAL_MINUTES,
            "heartbeat interval below minimum, clamping"
        );
        config.heartbeat.interval_minutes = MIN_HEARTBEAT_INTERVAL_MINUTES;
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_temp_json(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_load_missing_file_gives_defaults() {
        let config = load_config_from_path(Path::new("/nonexistent/config.json")).unwrap();
        assert_eq!(config.agents.defaults.max_tokens, 8192);
        assert_eq!(config.gateway.port, 18790);
    }

    #[test]
    fn test_load_invalid_json_is_error() {
        let file = write_temp_json("not valid json {{{");
        assert!(load_config_from_path(file.path()).is_err());
    }

    #[test]
    fn test_load_valid_json() {
        let file = write_temp_json(
            r#"{
            "agents": {
                "defaults": { "model": "fast", "max_tokens": 2048 }
            },
            "model_list": [
                {"model_name": "fast", "model": "openai/gpt-4o-mini", "api_key": "k"}
            ]
        }"#,
        );
        let config = load_config_from_path(file.path()).unwrap();
        assert_eq!(config.agents.defaults.model, "fast");
        assert_eq!(config.agents.defaults.max_tokens, 2048);
        assert_eq!(config.model_list.len(), 1);
    }

    #[test]
    fn test_legacy_providers_populate_model_list() {
        let file = write_temp_json(
            r#"{
            "providers": {
                "openai": {"api_key": "sk-123", "model": "gpt-4o"},
                "deepseek": {"api_key": "ds-456"}
            }
        }"#,
        );
        let config = load_config_from_path(file.path()).unwrap();
        assert_eq!(config.model_list.len(), 2);

        let openai = config
            .model_list
            .iter()
            .find(|e| e.model_name == "openai")
            .unwrap();
        assert_eq!(openai.model, "openai/gpt-4o");
        assert_eq!(openai.api_key.as_deref(), Some("sk-123"));

        // Legacy section is preserved verbatim
        assert_eq!(config.providers["openai"].api_key, "sk-123");
    }

    #[test]
    fn test_model_list_wins_over_legacy_providers() {
        let file = write_temp_json(
            r#"{
            "providers": { "openai": {"api_key": "sk-legacy"} },
            "model_list": [
                {"model_name": "fast", "model": "openai/gpt-4o-mini", "api_key": "sk-new"}
            ]
        }"#,
        );
        let config = load_config_from_path(file.path()).unwrap();
        assert_eq!(config.model_list.len(), 1);
        assert_eq!(config.model_list[0].model_name, "fast");
        // providers untouched
        assert_eq!(config.providers["openai"].api_key, "sk-legacy");
    }

    #[test]
    fn test_unconfigured_legacy_providers_skipped() {
        let file = write_temp_json(r#"{ "providers": { "openai": {} } }"#);
        let config = load_config_from_path(file.path()).unwrap();
        assert!(config.model_list.is_empty());
    }

    #[test]
    fn test_env_override_model() {
        std::env::set_var("PICOCLAW_AGENTS_DEFAULTS_MODEL", "env-model");
        let mut config = Config::default();
        apply_env_overrides(&mut config);
        assert_eq!(config.agents.defaults.model, "env-model");
        std::env::remove_var("PICOCLAW_AGENTS_DEFAULTS_MODEL");
    }

    #[test]
    fn test_env_override_gateway_port() {
        std::env::set_var("PICOCLAW_GATEWAY_PORT", "9999");
        let mut config = Config::default();
        apply_env_overrides(&mut config);
        assert_eq!(config.gateway.port, 9999);
        std::env::remove_var("PICOCLAW_GATEWAY_PORT");
    }

    #[test]
    fn test_env_override_bool_and_list() {
        std::env::set_var("PICOCLAW_HEARTBEAT_ENABLED", "1");
        std::env::set_var("PICOCLAW_TOOLS_EXEC_DENY_PATTERNS", "rm -rf, mkfs ,dd");
        let mut config = Config::default();
        apply_env_overrides(&mut config);
        assert!(config.heartbeat.enabled);
        assert_eq!(
            config.tools.exec.deny_patterns,
            vec!["rm -rf", "mkfs", "dd"]
        );
        std::env::remove_var("PICOCLAW_HEARTBEAT_ENABLED");
        std::env::remove_var("PICOCLAW_TOOLS_EXEC_DENY_PATTERNS");
    }

    #[test]
    fn test_heartbeat_interval_clamped() {
        let file = write_temp_json(r#"{ "heartbeat": {"enabled": true, "interval_minutes": 1} }"#);
        let config = load_config_from_path(file.path()).unwrap();
        assert_eq!(config.heartbeat.interval_minutes, MIN_HEARTBEAT_INTERVAL_MINUTES);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let mut config = Config::default();
        config.agents.defaults.model = "smart".to_string();
        save_config(&config, Some(&path)).unwrap();

        let reloaded = load_config_from_path(&path).unwrap();
        assert_eq!(reloaded.agents.defaults.model, "smart");
    }
}
