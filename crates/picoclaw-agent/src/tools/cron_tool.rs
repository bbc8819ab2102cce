//! Cron tool — lets the agent schedule, list, and remove jobs.
//!
//! The delivery target defaults to the current conversation, so a reminder
//! scheduled from Telegram comes back on Telegram.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Mutex;

use picoclaw_core::utils;
use picoclaw_cron::{CronJob, CronPayload, CronSchedule, CronService};

use super::base::{
    optional_i64, optional_string, require_string, ContextualTool, Tool, ToolResult,
};

pub struct CronTool {
    service: Arc<CronService>,
    context: Mutex<(String, String)>,
}

impl CronTool {
    pub fn new(service: Arc<CronService>) -> Self {
        Self {
            service,
            context: Mutex::new(("cli".into(), "direct".into())),
        }
    }
}

#[async_trait]
impl Tool for CronTool {
    fn name(&self) -> &str {
        "cron"
    }

    fn description(&self) -> &str {
        "Manage scheduled jobs. Actions: add (with in_seconds, every_seconds, or cron_expr), list, remove."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "action": { "type": "string", "enum": ["add", "list", "remove"] },
                "name": { "type": "string", "description": "Job name (for add)" },
                "message": { "type": "string", "description": "Prompt to run when the job fires" },
                "in_seconds": { "type": "integer", "description": "One-shot: fire this many seconds from now" },
                "every_seconds": { "type": "integer", "description": "Interval: fire every N seconds" },
                "cron_expr": { "type": "string", "description": "5-field cron expression" },
                "deliver": { "type": "boolean", "description": "Deliver the result to the current chat (default true)" },
                "id": { "type": "string", "description": "Job id (for remove)" }
            },
            "required": ["action"]
        })
    }

    async fn execute(&self, params: HashMap<String, Value>) -> ToolResult {
        let action = match require_string(&params, "action") {
            Ok(a) => a,
            Err(e) => return ToolResult::error(e),
        };

        match action.as_str() {
            "add" => self.add(&params).await,
            "list" => self.list().await,
            "remove" => self.remove(&params).await,
            other => ToolResult::error(format!("Unknown cron action: {other}")),
        }
    }
}

impl CronTool {
    async fn add(&self, params: &HashMap<String, Value>) -> ToolResult {
        let message = match require_string(params, "message") {
            Ok(m) => m,
            Err(e) => return ToolResult::error(e),
        };
        let name = optional_string(params, "name").unwrap_or_else(|| utils::truncate(&message, 30));

        let (schedule, one_shot) = if let Some(secs) = optional_i64(params, "in_seconds") {
            (CronSchedule::at(utils::now_ms() + secs.max(0) * 1000), true)
        } else if let Some(secs) = optional_i64(params, "every_seconds") {
            if secs <= 0 {
                return ToolResult::error("every_seconds must be positive");
            }
            (CronSchedule::every(secs * 1000), false)
        } else if let Some(expr) = optional_string(params, "cron_expr") {
            (CronSchedule::cron(expr), false)
        } else {
            return ToolResult::error(
                "One of in_seconds, every_seconds, or cron_expr is required",
            );
        };

        let deliver = params
            .get("deliver")
            .and_then(|v| v.as_bool())
            .unwrap_or(true);
        let (channel, chat_id) = {
            let ctx = self.context.lock().await;
            ctx.clone()
        };

        let mut job = CronJob::new(
            name.clone(),
            schedule,
            CronPayload {
                message,
                command: None,
                deliver,
                channel: deliver.then(|| channel),
                to: deliver.then(|| chat_id),
            },
        );
        job.delete_after_run = one_shot;

        let id = self.service.add_job(job).await;
        ToolResult::ok(format!("Scheduled job '{name}' (id {id})"))
    }

    async fn list(&self) -> ToolResult {
        let jobs = self.service.list_jobs().await;
        if jobs.is_empty() {
            return ToolResult::ok("No scheduled jobs.");
        }
        let mut out = String::new();
        for job in jobs {
            let next = job
                .state
                .next_run_at_ms
                .map(|ms| format!("next at {ms}"))
                .unwrap_or_else(|| "not scheduled".into());
            out.push_str(&format!(
                "{} — {} [{}] {}\n",
                job.id,
                job.name,
                if job.enabled { "enabled" } else { "disabled" },
                next
            ));
        }
        ToolResult::ok(out)
    }

    async fn remove(&self, params: &HashMap<String, Value>) -> ToolResult {
        let id = match require_string(params, "id") {
            Ok(i) => i,
            Err(e) => return ToolResult::error(e),
        };
        if self.service.remove_job(&id).await {
            ToolResult::ok(format!("Removed job {id}"))
        } else {
            ToolResult::error(format!("No job with id {id}"))
        }
    }
}

#[async_trait]
impl ContextualTool for CronTool {
    async fn set_context(&self, channel: &str, chat_id: &str) {
        let mut ctx = self.context.lock().await;
        *ctx = (channel.to_string(), chat_id.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use picoclaw_core::bus::MessageBus;

    fn make_tool() -> (CronTool, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let service = Arc::new(CronService::new(
            Arc::new(MessageBus::new()),
            dir.path().join("jobs.json"),
        ));
        (CronTool::new(service), dir)
    }

    fn params(pairs: &[(&str, Value)]) -> HashMap<String, Value> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[tokio::test]
    async fn test_add_one_shot_targets_current_chat() {
        let (tool, _dir) = make_tool();
        tool.set_context("telegram", "chat_1").await;

        let result = tool
            .execute(params(&[
                ("action", json!("add")),
                ("message", json!("remind me")),
                ("in_seconds", json!(60)),
            ]))
            .await;
        assert!(!result.is_error, "{}", result.for_llm);

        let jobs = tool.service.list_jobs().await;
        assert_eq!(jobs.len(), 1);
        assert!(jobs[0].delete_after_run);
        assert_eq!(jobs[0].payload.channel.as_deref(), Some("telegram"));
        assert_eq!(jobs[0].payload.to.as_deref(), Some("chat_1"));
    }

    #[tokio::test]
    async fn test_add_interval_job() {
        let (tool, _dir) = make_tool();
        let result = tool
            .execute(params(&[
                ("action", json!("add")),
                ("message", json!("check feeds")),
                ("every_seconds", json!(300)),
            ]))
            .await;
        assert!(!result.is_error);

        let jobs = tool.service.list_jobs().await;
        assert!(!jobs[0].delete_after_run);
        assert_eq!(jobs[0].schedule.every_ms, Some(300_000));
    }

    #[tokio::test]
    async fn test_add_requires_schedule() {
        let (tool, _dir) = make_tool();
        let result = tool
            .execute(params(&[("action", json!("add")), ("message", json!("x"))]))
            .await;
        assert!(result.is_error);
    }

    #[tokio::test]
    async fn test_list_and_remove() {
        let (tool, _dir) = make_tool();
        tool.execute(params(&[
            ("action", json!("add")),
            ("message", json!("x")),
            ("every_seconds", json!(60)),
        ]))
        .await;

        let list = tool.execute(params(&[("action", json!("list"))])).await;
        assert!(list.for_llm.contains("enabled"));

        let id = tool.service.list_jobs().await[0].id.clone();
        let removed = tool
            .execute(params(&[("action", json!("remove")), ("id", json!(id))]))
            .await;
        assert!(!removed.is_error);

        let list = tool.execute(params(&[("action", json!("list"))])).await;
        assert_eq!(list.for_llm, "No scheduled jobs.");
    }

    #[tokio::test]
    async fn test_unknown_action() {
        let (tool, _dir) = make_tool();
        let result = tool.execute(params(&[("action", json!("explode"))])).await;
        assert!(result.is_error);
    }
}
