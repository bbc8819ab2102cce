//! Shared runtime construction for the `agent` and `gateway` commands.
//!
//! Wires config → bus → provider registry → agent registry → router →
//! state → media store, in dependency order. The gateway adds channels,
//! cron, and heartbeat on top.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};

use picoclaw_agent::{AgentLoop, AgentRegistry};
use picoclaw_core::bus::MessageBus;
use picoclaw_core::config::Config;
use picoclaw_core::media::MediaStore;
use picoclaw_core::router::Router;
use picoclaw_core::state::StateManager;
use picoclaw_core::utils::expand_home;
use picoclaw_providers::{resolve_candidates, LlmProvider, ProviderLookup, ProviderRegistry};

/// Everything the agent loop needs, built once at startup.
pub struct Runtime {
    pub bus: Arc<MessageBus>,
    pub providers: Arc<ProviderRegistry>,
    pub agents: Arc<AgentRegistry>,
    pub agent_loop: Arc<AgentLoop>,
    pub state: Arc<StateManager>,
    pub media: MediaStore,
    pub workspace: PathBuf,
}

/// The provider name applied to bare model refs: the first `model_list`
/// group, falling back to `openai`.
pub fn default_provider_name(config: &Config) -> String {
    config
        .model_list
        .first()
        .map(|e| e.model_name.to_lowercase())
        .unwrap_or_else(|| "openai".to_string())
}

/// Build the core runtime (no channels/cron/heartbeat — the gateway wires
/// those separately). The bus is injected so services created before the
/// runtime (cron) share it.
pub fn build_runtime(
    config: &Config,
    bus: Arc<MessageBus>,
    media: MediaStore,
    cron: Option<Arc<picoclaw_cron::CronService>>,
    channel_names: Vec<String>,
    reasoning: Option<picoclaw_agent::ReasoningLookup>,
) -> Result<Runtime> {
    let workspace = expand_home(&config.agents.defaults.workspace);
    std::fs::create_dir_all(&workspace)
        .with_context(|| format!("failed to create workspace {}", workspace.display()))?;

    let providers = Arc::new(ProviderRegistry::from_config(config));
    if providers.is_empty() {
        anyhow::bail!(
            "no providers configured — add a model_list entry (or legacy providers.*) to the config"
        );
    }

    let default_provider = default_provider_name(config);
    let subagent_provider = resolve_subagent_provider(config, &providers, &default_provider)?;

    let agents = Arc::new(
        AgentRegistry::from_config(config, bus.clone(), subagent_provider, cron)
            .context("failed to build agents")?,
    );

    let router = Router::new(
        config.bindings.clone(),
        &config.default_agent_id(),
        config.session.dm_scope,
        &config.session.identity_links,
    );

    let state = Arc::new(StateManager::new(&workspace));

    let mut agent_loop = AgentLoop::new(
        bus.clone(),
        agents.clone(),
        router,
        providers.clone(),
        state.clone(),
        media.clone(),
        default_provider,
    )
    .with_channel_names(channel_names);
    if let Some(reasoning) = reasoning {
        agent_loop = agent_loop.with_reasoning_lookup(reasoning);
    }
    let agent_loop = Arc::new(agent_loop);

    Ok(Runtime {
        bus,
        providers,
        agents,
        agent_loop,
        state,
        media,
        workspace,
    })
}

/// The provider backing subagent tasks: the default agent's primary
/// candidate.
fn resolve_subagent_provider(
    config: &Config,
    providers: &Arc<ProviderRegistry>,
    default_provider: &str,
) -> Result<Arc<dyn LlmProvider>> {
    let lookup = |alias: &str| providers.alias_candidate(alias);
    let candidates = resolve_candidates(
        &config.agents.defaults.model,
        &[],
        default_provider,
        Some(&lookup),
    );
    let candidate = candidates
        .first()
        .ok_or_else(|| anyhow::anyhow!("agents.defaults.model is empty"))?;
    ProviderLookup::get(providers.as_ref(), &candidate.provider)
        .ok_or_else(|| anyhow::anyhow!("no provider configured for '{}'", candidate.provider))
}

#[cfg(test)]
mod tests {
    use super::*;
    use picoclaw_core::config::schema::ModelEntry;

    fn config(dir: &std::path::Path) -> Config {
        let mut config = Config::default();
        config.agents.defaults.workspace = dir.to_string_lossy().to_string();
        config.agents.defaults.model = "fast".into();
        config.model_list.push(ModelEntry {
            model_name: "fast".into(),
            model: "openai/gpt-4o-mini".into(),
            api_key: Some("k".into()),
            ..Default::default()
        });
        config
    }

    #[test]
    fn test_build_runtime() {
        let dir = tempfile::tempdir().unwrap();
        let bus = Arc::new(MessageBus::new());
        let runtime =
            build_runtime(&config(dir.path()), bus, MediaStore::new(), None, Vec::new(), None)
                .unwrap();
        assert_eq!(runtime.agents.default_id(), "main");
        assert_eq!(runtime.workspace, dir.path());
    }

    #[test]
    fn test_build_runtime_requires_providers() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path());
        config.model_list.clear();
        let bus = Arc::new(MessageBus::new());
        assert!(
            build_runtime(&config, bus, MediaStore::new(), None, Vec::new(), None).is_err()
        );
    }

    #[test]
    fn test_default_provider_name() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(default_provider_name(&config(dir.path())), "fast");
        assert_eq!(default_provider_name(&Config::default()), "openai");
    }
}
