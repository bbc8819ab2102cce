//! Console channel — in-process adapter printing agent replies to stdout.
//!
//! Used by the gateway when no network transport is configured, and as the
//! reference implementation of the `Channel` contract. Status messages are
//! suppressed (they are advisory).

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tracing::debug;

use picoclaw_core::bus::{MessageKind, OutboundMessage};

use crate::base::{Channel, ChannelError};

pub struct ConsoleChannel {
    running: AtomicBool,
}

impl ConsoleChannel {
    pub fn new() -> Self {
        Self {
            running: AtomicBool::new(false),
        }
    }
}

impl Default for ConsoleChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Channel for ConsoleChannel {
    fn name(&self) -> &str {
        "console"
    }

    async fn start(&self) -> anyhow::Result<()> {
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn send(&self, msg: &OutboundMessage) -> Result<(), ChannelError> {
        if !self.is_running() {
            return Err(ChannelError::NotRunning);
        }
        if msg.kind == MessageKind::Status {
            debug!(chat_id = %msg.chat_id, "suppressing status message on console");
            return Ok(());
        }
        println!("[{}] {}", msg.chat_id, msg.content);
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}
