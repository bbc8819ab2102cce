//! Agent instances and the registry.
//!
//! One `AgentInstance` per configured agent: its workspace, session store,
//! context builder, tool registry, and model policy. Instances are built at
//! startup and immutable afterwards except for the current model (which the
//! `/switch model` command changes).

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tracing::info;

use picoclaw_core::bus::MessageBus;
use picoclaw_core::config::schema::{AgentDefaults, AgentEntry, Config};
use picoclaw_core::router::normalize_agent_id;
use picoclaw_core::session::SessionStore;
use picoclaw_providers::{ChatOptions, LlmProvider};

use crate::context::ContextBuilder;
use crate::subagent::{SubagentManager, SubagentSettings};
use crate::tools::cron_tool::CronTool;
use crate::tools::filesystem::{
    AppendFileTool, EditFileTool, ListDirTool, ReadFileTool, Sandbox, WriteFileTool,
};
use crate::tools::memory_tool::MemoryTool;
use crate::tools::message::{MessageTool, SendCallback};
use crate::tools::registry::ToolRegistry;
use crate::tools::shell::ExecTool;
use crate::tools::skills_tool::SkillsTool;
use crate::tools::spawn::{SpawnChecker, SpawnTool};
use crate::tools::web::{WebFetchTool, WebSearchTool};
use crate::memory::MemoryStore;
use crate::skills::SkillsLoader;

/// A configured agent identity with its whole runtime surface.
pub struct AgentInstance {
    pub id: String,
    pub name: String,
    pub workspace: PathBuf,
    /// Current model ref; switchable at runtime.
    model: Mutex<String>,
    pub fallbacks: Vec<String>,
    pub max_iterations: usize,
    pub context_window: u32,
    pub options: ChatOptions,
    pub restrict_to_workspace: bool,
    pub sessions: Arc<SessionStore>,
    pub context: ContextBuilder,
    pub tools: ToolRegistry,
    pub message_tool: Arc<MessageTool>,
}

impl AgentInstance {
    /// Current model ref.
    pub fn model(&self) -> String {
        self.model.lock().unwrap().clone()
    }

    /// Switch the model ref.
    pub fn set_model(&self, model: impl Into<String>) {
        *self.model.lock().unwrap() = model.into();
    }
}

/// Immutable-after-startup registry of agent instances.
pub struct AgentRegistry {
    agents: HashMap<String, Arc<AgentInstance>>,
    default_id: String,
}

impl AgentRegistry {
    pub fn get(&self, id: &str) -> Option<Arc<AgentInstance>> {
        self.agents.get(&normalize_agent_id(id)).cloned()
    }

    pub fn default_agent(&self) -> Arc<AgentInstance> {
        self.agents[&self.default_id].clone()
    }

    pub fn default_id(&self) -> &str {
        &self.default_id
    }

    /// Agent ids, sorted.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.agents.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Build all agents from config. `subagent_provider` backs background
    /// tasks; `cron` is registered as a tool when present.
    pub fn from_config(
        config: &Config,
        bus: Arc<MessageBus>,
        subagent_provider: Arc<dyn LlmProvider>,
        cron: Option<Arc<picoclaw_cron::CronService>>,
    ) -> anyhow::Result<Self> {
        let mut entries = config.agents.list.clone();
        if entries.is_empty() {
            entries.push(AgentEntry {
                id: "main".into(),
                default: true,
                ..Default::default()
            });
        }

        let mut agents = HashMap::new();
        for entry in &entries {
            let instance = build_instance(
                entry,
                &config.agents.defaults,
                config,
                bus.clone(),
                subagent_provider.clone(),
                cron.clone(),
            )?;
            info!(agent = %instance.id, workspace = %instance.workspace.display(), "agent ready");
            agents.insert(instance.id.clone(), Arc::new(instance));
        }

        let default_id = normalize_agent_id(&config.default_agent_id());
        let default_id = if agents.contains_key(&default_id) {
            default_id
        } else {
            agents.keys().next().cloned().unwrap_or_default()
        };

        Ok(Self { agents, default_id })
    }
}

fn build_instance(
    entry: &AgentEntry,
    defaults: &AgentDefaults,
    config: &Config,
    bus: Arc<MessageBus>,
    subagent_provider: Arc<dyn LlmProvider>,
    cron: Option<Arc<picoclaw_cron::CronService>>,
) -> anyhow::Result<AgentInstance> {
    let id = normalize_agent_id(&entry.id);
    if id.is_empty() {
        anyhow::bail!("agent entry with empty id");
    }
    let name = if entry.name.is_empty() {
        id.clone()
    } else {
        entry.name.clone()
    };

    let workspace_raw = entry
        .workspace
        .clone()
        .unwrap_or_else(|| defaults.workspace.clone());
    let workspace = picoclaw_core::utils::expand_home(&workspace_raw);
    std::fs::create_dir_all(&workspace)?;

    let (model, fallbacks) = match &entry.model {
        Some(m) => (m.primary.clone(), m.fallbacks.clone()),
        None => (defaults.model.clone(), Vec::new()),
    };
    let options = ChatOptions {
        max_tokens: defaults.max_tokens,
        temperature: defaults.temperature.unwrap_or(0.7),
    };

    let sessions = Arc::new(SessionStore::new(workspace.join("sessions"))?);
    let context = ContextBuilder::new(&workspace, &name, entry.skills.clone());

    // Tools
    let sandbox = if defaults.restrict_to_workspace {
        Sandbox::rooted(workspace.clone())
    } else {
        Sandbox::open()
    };

    let mut tools = ToolRegistry::new();
    tools.register(Arc::new(ReadFileTool::new(sandbox.clone())));
    tools.register(Arc::new(WriteFileTool::new(sandbox.clone())));
    tools.register(Arc::new(EditFileTool::new(sandbox.clone())));
    tools.register(Arc::new(AppendFileTool::new(sandbox.clone())));
    tools.register(Arc::new(ListDirTool::new(sandbox)));
    tools.register(Arc::new(ExecTool::new(
        workspace.clone(),
        config.tools.exec.timeout,
        &config.tools.exec.deny_patterns,
        defaults.restrict_to_workspace,
    )));
    tools.register(Arc::new(WebSearchTool::new(
        Some(config.tools.web.search.api_key.clone()),
        config.tools.web.search.max_results,
    )));
    tools.register(Arc::new(WebFetchTool::new()));
    tools.register(Arc::new(MemoryTool::new(Arc::new(MemoryStore::new(
        &workspace,
    )))));
    if config.tools.skills.enabled {
        tools.register(Arc::new(SkillsTool::new(Arc::new(SkillsLoader::new(
            &workspace,
            entry.skills.clone(),
        )))));
    }

    // Message tool publishes straight onto the bus.
    let send_bus = bus.clone();
    let send_callback: SendCallback = Arc::new(move |msg| {
        let bus = send_bus.clone();
        Box::pin(async move {
            bus.publish_outbound(msg);
            Ok(())
        })
    });
    let message_tool = Arc::new(MessageTool::new(Some(send_callback)));
    tools.register_contextual(message_tool.clone());

    // Subagents: spawn authorization is a one-way checker over the
    // configured allowlist (own id is always permitted).
    let subagent_manager = Arc::new(SubagentManager::new(
        subagent_provider,
        bus,
        SubagentSettings {
            workspace: workspace.clone(),
            model: model.clone(),
            options: options.clone(),
            restrict_to_workspace: defaults.restrict_to_workspace,
            exec_timeout_s: config.tools.exec.timeout,
            exec_deny_patterns: config.tools.exec.deny_patterns.clone(),
            search_api_key: Some(config.tools.web.search.api_key.clone()),
            search_max_results: config.tools.web.search.max_results,
        },
    ));
    let own_id = id.clone();
    let allowed: Vec<String> = entry.allow_agents.iter().map(|a| normalize_agent_id(a)).collect();
    let checker: SpawnChecker = Arc::new(move |agent: &str| {
        let agent = normalize_agent_id(agent);
        agent == own_id || allowed.contains(&agent)
    });
    tools.register_contextual(Arc::new(SpawnTool::new(subagent_manager, Some(checker))));

    if let (Some(cron), true) = (cron, config.tools.cron.enabled) {
        tools.register_contextual(Arc::new(CronTool::new(cron)));
    }

    Ok(AgentInstance {
        id,
        name,
        workspace,
        model: Mutex::new(model),
        fallbacks,
        max_iterations: defaults.max_tool_iterations as usize,
        context_window: defaults.context_window,
        options,
        restrict_to_workspace: defaults.restrict_to_workspace,
        sessions,
        context,
        tools,
        message_tool,
    })
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use picoclaw_core::types::{LlmResponse, Message, ToolDefinition};
    use picoclaw_providers::ProviderError;

    struct NullProvider;

    #[async_trait]
    impl LlmProvider for NullProvider {
        async fn chat(
            &self,
            _messages: &[Message],
            _tools: Option<&[ToolDefinition]>,
            _model: &str,
            _options: &ChatOptions,
        ) -> Result<LlmResponse, ProviderError> {
            Ok(LlmResponse::default())
        }
        fn default_model(&self) -> &str {
            "null"
        }
        fn display_name(&self) -> &str {
            "null"
        }
    }

    fn config_in(dir: &std::path::Path) -> Config {
        let mut config = Config::default();
        config.agents.defaults.workspace = dir.to_string_lossy().to_string();
        config.agents.defaults.model = "mock-model".into();
        config
    }

    fn build(config: &Config) -> AgentRegistry {
        AgentRegistry::from_config(
            config,
            Arc::new(MessageBus::new()),
            Arc::new(NullProvider),
            None,
        )
        .unwrap()
    }

    #[test]
    fn test_empty_list_synthesizes_main() {
        let dir = tempfile::tempdir().unwrap();
        let registry = build(&config_in(dir.path()));

        assert_eq!(registry.ids(), vec!["main"]);
        assert_eq!(registry.default_id(), "main");
        assert_eq!(registry.default_agent().model(), "mock-model");
    }

    #[test]
    fn test_agent_ids_normalized() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config_in(dir.path());
        config.agents.list.push(AgentEntry {
            id: "Support Agent".into(),
            default: true,
            ..Default::default()
        });
        let registry = build(&config);

        assert!(registry.get("support-agent").is_some());
        assert!(registry.get("Support Agent").is_some());
        assert_eq!(registry.default_id(), "support-agent");
    }

    #[test]
    fn test_shared_tools_registered() {
        let dir = tempfile::tempdir().unwrap();
        let registry = build(&config_in(dir.path()));
        let agent = registry.default_agent();

        for tool in [
            "read_file",
            "write_file",
            "edit_file",
            "append_file",
            "list_dir",
            "exec",
            "web_search",
            "web_fetch",
            "memory",
            "skills",
            "message",
            "spawn",
        ] {
            assert!(agent.tools.has(tool), "missing tool {tool}");
        }
    }

    #[test]
    fn test_model_switch() {
        let dir = tempfile::tempdir().unwrap();
        let registry = build(&config_in(dir.path()));
        let agent = registry.default_agent();

        agent.set_model("other-model");
        assert_eq!(agent.model(), "other-model");
    }

    #[test]
    fn test_per_agent_overrides() {
        use picoclaw_core::config::schema::AgentModelConfig;

        let dir = tempfile::tempdir().unwrap();
        let mut config = config_in(dir.path());
        let agent_ws = dir.path().join("custom");
        config.agents.list.push(AgentEntry {
            id: "custom".into(),
            model: Some(AgentModelConfig::with_fallbacks(
                "special-model",
                vec!["backup".into()],
            )),
            workspace: Some(agent_ws.to_string_lossy().to_string()),
            ..Default::default()
        });
        let registry = build(&config);
        let agent = registry.get("custom").unwrap();

        assert_eq!(agent.model(), "special-model");
        assert_eq!(agent.workspace, agent_ws);
        assert_eq!(agent.fallbacks, vec!["backup"]);
    }
}
