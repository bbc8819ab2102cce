//! Message tool — lets the agent proactively send messages to channels.
//!
//! The loop sets the default channel/chat per round via `set_context` and
//! checks `has_sent_in_round` after the round to suppress a duplicate
//! outbound of the final response.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::debug;

use picoclaw_core::bus::OutboundMessage;

use super::base::{optional_string, require_string, ContextualTool, Tool, ToolResult};

/// Callback type for sending outbound messages (publishes to the bus).
pub type SendCallback = Arc<
    dyn Fn(OutboundMessage) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>
        + Send
        + Sync,
>;

pub struct MessageTool {
    send_callback: Option<SendCallback>,
    context: Mutex<(String, String)>,
    sent_in_round: AtomicBool,
}

impl MessageTool {
    pub fn new(send_callback: Option<SendCallback>) -> Self {
        Self {
            send_callback,
            context: Mutex::new(("cli".into(), "direct".into())),
            sent_in_round: AtomicBool::new(false),
        }
    }

    /// Whether the tool delivered a user-facing message since the last
    /// `reset_round()`.
    pub fn has_sent_in_round(&self) -> bool {
        self.sent_in_round.load(Ordering::SeqCst)
    }

    /// Clear the per-round sent flag. Called by the loop per message.
    pub fn reset_round(&self) {
        self.sent_in_round.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl Tool for MessageTool {
    fn name(&self) -> &str {
        "message"
    }

    fn description(&self) -> &str {
        "Send a message to a channel. Defaults to the current conversation; \
         pass channel and chat_id to send elsewhere."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "content": { "type": "string", "description": "The message content to send" },
                "channel": { "type": "string", "description": "Target channel (optional)" },
                "chat_id": { "type": "string", "description": "Target chat ID (optional)" }
            },
            "required": ["content"]
        })
    }

    async fn execute(&self, params: HashMap<String, Value>) -> ToolResult {
        let content = match require_string(&params, "content") {
            Ok(c) => c,
            Err(e) => return ToolResult::error(e),
        };
        let param_channel = optional_string(&params, "channel");
        let param_chat_id = optional_string(&params, "chat_id");

        let (default_channel, default_chat_id) = {
            let ctx = self.context.lock().await;
            ctx.clone()
        };
        let channel = param_channel.unwrap_or(default_channel.clone());
        let chat_id = param_chat_id.unwrap_or(default_chat_id.clone());

        debug!(channel = %channel, chat_id = %chat_id, "sending message via tool");

        if let Some(cb) = &self.send_callback {
            if let Err(e) = cb(OutboundMessage::new(&channel, &chat_id, &content)).await {
                return ToolResult::error(format!("Failed to send message: {e}"));
            }
        } else {
            debug!("no send callback configured; message discarded");
        }

        // Only a send to the *current* conversation suppresses the final
        // response duplicate.
        if channel == default_channel && chat_id == default_chat_id {
            self.sent_in_round.store(true, Ordering::SeqCst);
        }

        ToolResult::ok(format!("Message sent to {channel}:{chat_id}"))
    }
}

#[async_trait]
impl ContextualTool for MessageTool {
    async fn set_context(&self, channel: &str, chat_id: &str) {
        let mut ctx = self.context.lock().await;
        *ctx = (channel.to_string(), chat_id.to_string());
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
