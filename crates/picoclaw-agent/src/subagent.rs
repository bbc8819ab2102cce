//! Subagent manager — background task delegation.
//!
//! A subagent runs as its own tokio task with a task-focused system prompt,
//! a limited tool registry (filesystem, shell, web — no message, no spawn),
//! and an ephemeral history. It never talks to the user directly: on
//! completion it publishes a `system`-channel inbound message addressed to
//! the originating conversation, and the main agent decides whether and how
//! to notify.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, error, info};

use picoclaw_core::bus::{InboundMessage, MessageBus};
use picoclaw_core::types::Message;
use picoclaw_core::utils;
use picoclaw_providers::{ChatOptions, LlmProvider};

use crate::tools::filesystem::{ListDirTool, ReadFileTool, Sandbox, WriteFileTool};
use crate::tools::registry::ToolRegistry;
use crate::tools::shell::ExecTool;
use crate::tools::web::{WebFetchTool, WebSearchTool};

/// Maximum LLM ↔ tool iterations for a subagent task.
const SUBAGENT_MAX_ITERATIONS: usize = 15;

/// Metadata about a running subagent task.
#[derive(Clone, Debug)]
pub struct TaskInfo {
    pub id: String,
    pub label: String,
    pub task: String,
    pub origin_channel: String,
    pub origin_chat_id: String,
}

/// Settings a subagent inherits from its parent agent.
#[derive(Clone)]
pub struct SubagentSettings {
    pub workspace: PathBuf,
    pub model: String,
    pub options: ChatOptions,
    pub restrict_to_workspace: bool,
    pub exec_timeout_s: u64,
    pub exec_deny_patterns: Vec<String>,
    pub search_api_key: Option<String>,
    pub search_max_results: u32,
}

/// Manages the lifecycle of background subagent tasks.
pub struct SubagentManager {
    provider: Arc<dyn LlmProvider>,
    bus: Arc<MessageBus>,
    settings: SubagentSettings,
    running_tasks: RwLock<HashMap<String, TaskInfo>>,
}

impl SubagentManager {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        bus: Arc<MessageBus>,
        settings: SubagentSettings,
    ) -> Self {
        Self {
            provider,
            bus,
            settings,
            running_tasks: RwLock::new(HashMap::new()),
        }
    }

    /// Number of currently running tasks.
    pub async fn task_count(&self) -> usize {
        self.running_tasks.read().await.len()
    }

    /// Snapshot of running tasks.
    pub async fn list_tasks(&self) -> Vec<TaskInfo> {
        self.running_tasks.read().await.values().cloned().collect()
    }

    /// Spawn a subagent task in the background. Returns an immediate
    /// confirmation string; the result arrives later as a system message.
    pub async fn spawn(
        self: &Arc<Self>,
        task: String,
        label: Option<String>,
        origin_channel: String,
        origin_chat_id: String,
    ) -> String {
        let task_id = utils::random_hex_id(4);
        let display_label = label.unwrap_or_else(|| utils::truncate(&task, 30));

        let info = TaskInfo {
            id: task_id.clone(),
            label: display_label.clone(),
            task: task.clone(),
            origin_channel: origin_channel.clone(),
            origin_chat_id: origin_chat_id.clone(),
        };

        {
            let mut tasks = self.running_tasks.write().await;
            tasks.insert(task_id.clone(), info);
        }

        let mgr = Arc::clone(self);
        let tid = task_id.clone();
        let lbl = display_label.clone();
        let task_text = task.clone();

        tokio::spawn(async move {
            let body = match mgr.run_subagent(&tid, &task_text).await {
                Ok(response) => response,
                Err(e) => {
                    error!(task_id = %tid, error = %e, "subagent task failed");
                    format!("Task failed: {e}")
                }
            };

            mgr.announce_result(&lbl, &body, &origin_channel, &origin_chat_id);

            let mut tasks = mgr.running_tasks.write().await;
            tasks.remove(&tid);
            debug!(task_id = %tid, "subagent task cleaned up");
        });

        format!("Started background task '{display_label}' (id {task_id}). The result will arrive as a system message.")
    }

    /// Run the LLM ↔ tool loop for one subagent task.
    async fn run_subagent(&self, task_id: &str, task: &str) -> anyhow::Result<String> {
        info!(task_id = %task_id, "subagent started");

        let tools = self.build_tools();
        let tool_defs = tools.get_definitions();

        let mut messages = vec![
            Message::system(format!(
                "You are a focused background worker. Complete the following task \
                 using the available tools, then reply with a concise result summary.\n\n\
                 Workspace: {}",
                self.settings.workspace.display()
            )),
            Message::user(task),
        ];

        for _ in 0..SUBAGENT_MAX_ITERATIONS {
            let response = self
                .provider
                .chat(
                    &messages,
                    Some(&tool_defs),
                    &self.settings.model,
                    &self.settings.options,
                )
                .await?;

            if !response.has_tool_calls() {
                return Ok(response
                    .content
                    .unwrap_or_else(|| "(task produced no summary)".into()));
            }

            messages.push(Message::assistant_tool_calls(
                response.content.clone(),
                response.tool_calls.clone(),
            ));

            for call in &response.tool_calls {
                let params: HashMap<String, serde_json::Value> =
                    serde_json::from_str(&call.function.arguments).unwrap_or_default();
                let result = tools.execute(&call.function.name, params).await;
                messages.push(Message::tool_result(&call.id, &result.for_llm));
            }
        }

        Ok("(task hit the iteration limit before finishing)".into())
    }

    /// Limited tool set: no message, no spawn, no cron.
    fn build_tools(&self) -> ToolRegistry {
        let sandbox = if self.settings.restrict_to_workspace {
            Sandbox::rooted(self.settings.workspace.clone())
        } else {
            Sandbox::open()
        };

        let mut tools = ToolRegistry::new();
        tools.register(Arc::new(ReadFileTool::new(sandbox.clone())));
        tools.register(Arc::new(WriteFileTool::new(sandbox.clone())));
        tools.register(Arc::new(ListDirTool::new(sandbox)));
        tools.register(Arc::new(ExecTool::new(
            self.settings.workspace.clone(),
            self.settings.exec_timeout_s,
            &self.settings.exec_deny_patterns,
            self.settings.restrict_to_workspace,
        )));
        tools.register(Arc::new(WebSearchTool::new(
            self.settings.search_api_key.clone(),
            self.settings.search_max_results,
        )));
        tools.register(Arc::new(WebFetchTool::new()));
        tools
    }

    /// Publish the completion as a `system` inbound message. The agent
    /// loop routes it back to the originating conversation.
    fn announce_result(&self, label: &str, body: &str, origin_channel: &str, origin_chat_id: &str) {
        let mut msg = InboundMessage::new(
            "system",
            "subagent",
            format!("{origin_channel}:{origin_chat_id}"),
            format!("Task '{label}' completed.\n\nResult:\n{body}"),
        );
        msg.session_key = None;
        self.bus.publish_inbound(msg);
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
