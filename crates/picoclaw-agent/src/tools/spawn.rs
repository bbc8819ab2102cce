//! Spawn tool — delegates work to background subagents.
//!
//! Authorization goes through a one-way allowlist checker callback instead
//! of a back-reference into the agent registry, so there is no cycle
//! between the tool and the agents it spawns for.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Mutex;

use super::base::{optional_string, require_string, ContextualTool, Tool, ToolResult};
use crate::subagent::SubagentManager;

/// Checks whether the current agent may spawn on behalf of `agent_id`.
pub type SpawnChecker = Arc<dyn Fn(&str) -> bool + Send + Sync>;

pub struct SpawnTool {
    manager: Arc<SubagentManager>,
    checker: Option<SpawnChecker>,
    context: Mutex<(String, String)>,
}

impl SpawnTool {
    pub fn new(manager: Arc<SubagentManager>, checker: Option<SpawnChecker>) -> Self {
        Self {
            manager,
            checker,
            context: Mutex::new(("cli".into(), "direct".into())),
        }
    }
}

#[async_trait]
impl Tool for SpawnTool {
    fn name(&self) -> &str {
        "spawn"
    }

    fn description(&self) -> &str {
        "Start a background subagent for a long-running task. Returns immediately; \
         the result arrives later as a system message."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "task": { "type": "string", "description": "Full task description for the subagent" },
                "label": { "type": "string", "description": "Short display label (optional)" },
                "agent": { "type": "string", "description": "Agent identity to run as (optional)" }
            },
            "required": ["task"]
        })
    }

    async fn execute(&self, params: HashMap<String, Value>) -> ToolResult {
        let task = match require_string(&params, "task") {
            Ok(t) => t,
            Err(e) => return ToolResult::error(e),
        };
        let label = optional_string(&params, "label");

        if let Some(agent) = optional_string(&params, "agent") {
            let allowed = self.checker.as_ref().map(|c| c(&agent)).unwrap_or(false);
            if !allowed {
                return ToolResult::error(format!("Not allowed to spawn as agent '{agent}'"));
            }
        }

        let (channel, chat_id) = {
            let ctx = self.context.lock().await;
            ctx.clone()
        };

        let confirmation = self.manager.spawn(task, label, channel, chat_id).await;
        ToolResult::async_started(confirmation)
    }
}

#[async_trait]
impl ContextualTool for SpawnTool {
    async fn set_context(&self, channel: &str, chat_id: &str) {
        let mut ctx = self.context.lock().await;
        *ctx = (channel.to_string(), chat_id.to_string());
    }
}
