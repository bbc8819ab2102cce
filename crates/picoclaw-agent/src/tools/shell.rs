//! Exec tool — shell command execution with deny-pattern guarding, an
//! optional timeout, and workspace-restricted working directories.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use regex::RegexSet;
use serde_json::{json, Value};
use tracing::warn;

use super::base::{optional_string, require_string, Tool, ToolResult};
use super::filesystem::Sandbox;

/// Output larger than this is truncated before reaching the model.
const MAX_OUTPUT_BYTES: usize = 32 * 1024;

pub struct ExecTool {
    workspace: PathBuf,
    timeout: Duration,
    deny: Option<RegexSet>,
    /// Sandbox used to validate the working_dir param; `open` when the
    /// agent is unrestricted.
    sandbox: Sandbox,
}

impl ExecTool {
    pub fn new(
        workspace: PathBuf,
        timeout_s: u64,
        deny_patterns: &[String],
        restrict_to_workspace: bool,
    ) -> Self {
        let deny = if deny_patterns.is_empty() {
            None
        } else {
            match RegexSet::new(deny_patterns) {
                Ok(set) => Some(set),
                Err(e) => {
                    warn!(error = %e, "invalid exec deny pattern, guard disabled");
                    None
                }
            }
        };
        let sandbox = if restrict_to_workspace {
            Sandbox::rooted(workspace.clone())
        } else {
            Sandbox::open()
        };
        Self {
            workspace,
            timeout: Duration::from_secs(timeout_s),
            deny,
            sandbox,
        }
    }
}

#[async_trait]
impl Tool for ExecTool {
    fn name(&self) -> &str {
        "exec"
    }

    fn description(&self) -> &str {
        "Execute a shell command and return its stdout/stderr."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": { "type": "string", "description": "Shell command to run" },
                "working_dir": { "type": "string", "description": "Working directory (defaults to the workspace)" }
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, params: HashMap<String, Value>) -> ToolResult {
        let command = match require_string(&params, "command") {
            Ok(c) => c,
            Err(e) => return ToolResult::error(e),
        };

        if let Some(deny) = &self.deny {
            if deny.is_match(&command) {
                return ToolResult::error("Command rejected by policy");
            }
        }

        let working_dir = match optional_string(&params, "working_dir") {
            Some(dir) => match self.sandbox.resolve(&dir) {
                Ok(p) => p,
                Err(e) => return ToolResult::error(e),
            },
            None => self.workspace.clone(),
        };
        if !working_dir.is_dir() {
            return ToolResult::error("working_dir does not exist");
        }

        let mut child = tokio::process::Command::new("sh");
        child
            .arg("-c")
            .arg(&command)
            .current_dir(&working_dir)
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, child.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return ToolResult::error(format!("Failed to run command: {e}")),
            Err(_) => {
                return ToolResult::error(format!(
                    "Command timed out after {}s",
                    self.timeout.as_secs()
                ))
            }
        };

        let mut text = String::new();
        text.push_str(&String::from_utf8_lossy(&output.stdout));
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.is_empty() {
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str("[stderr]\n");
            text.push_str(&stderr);
        }
        if text.len() > MAX_OUTPUT_BYTES {
            let mut cut = MAX_OUTPUT_BYTES;
            while !text.is_char_boundary(cut) {
                cut -= 1;
            }
            text.truncate(cut);
            text.push_str("\n... (output truncated)");
        }
        if text.is_empty() {
            text = "(no output)".to_string();
        }

        if output.status.success() {
            ToolResult::ok(text)
        } else {
            ToolResult::error(format!(
                "Command exited with {}:\n{}",
                output.status.code().unwrap_or(-1),
                text
            ))
        }
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
