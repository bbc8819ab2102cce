//! Memory tool — appends daily notes and reads long-term memory.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::base::{require_string, Tool, ToolResult};
use crate::memory::MemoryStore;

pub struct MemoryTool {
    store: Arc<MemoryStore>,
}

impl MemoryTool {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for MemoryTool {
    fn name(&self) -> &str {
        "memory"
    }

    fn description(&self) -> &str {
        "Persist or recall memory. Actions: append_note (adds to today's daily note), read (returns the memory context)."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "action": { "type": "string", "enum": ["append_note", "read"] },
                "text": { "type": "string", "description": "Note text (for append_note)" }
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
            "append_note" => {
                let text = match require_string(&params, "text") {
                    Ok(t) => t,
                    Err(e) => return ToolResult::error(e),
                };
                match self.store.append_daily_note(&text) {
                    Ok(()) => ToolResult::ok("Noted."),
                    Err(e) => ToolResult::error(format!("Failed to write daily note: {e}")),
                }
            }
            "read" => ToolResult::ok(
                self.store
                    .get_memory_context()
                    .unwrap_or_else(|| "(no memory yet)".into()),
            ),
            other => ToolResult::error(format!("Unknown memory action: {other}")),
        }
    }
}
