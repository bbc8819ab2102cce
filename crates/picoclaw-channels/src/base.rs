//! Channel trait — the contract every chat transport adapter implements.
//!
//! Adapters own their network I/O and reconnect state. They read outbound
//! messages from the bus (via the manager's dispatcher) and write inbound
//! messages to the bus; they never mutate agent state.

use async_trait::async_trait;
use thiserror::Error;

use picoclaw_core::bus::{OutboundMediaMessage, OutboundMessage};

/// Adapter-side error taxonomy.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The adapter has not been started (or has stopped).
    #[error("channel not running")]
    NotRunning,

    /// Terminal send failure; the caller must know.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// Transient failure; the adapter's reconnect loop will handle it.
    #[error("temporary channel error: {0}")]
    Temporary(String),
}

/// Every chat transport implements this trait. The `ChannelManager` holds
/// `Arc<dyn Channel>` and orchestrates start/stop/send across all enabled
/// channels.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Unique channel name matching config keys and
    /// `OutboundMessage.channel`.
    fn name(&self) -> &str;

    /// Start listening for incoming messages. Long-running; publishes
    /// `InboundMessage`s to the bus until `stop()`.
    async fn start(&self) -> anyhow::Result<()>;

    /// Graceful shutdown.
    async fn stop(&self) -> anyhow::Result<()>;

    /// Deliver an outbound text message.
    async fn send(&self, msg: &OutboundMessage) -> Result<(), ChannelError>;

    /// Deliver an outbound media message. Default: unsupported.
    async fn send_media(&self, _msg: &OutboundMediaMessage) -> Result<(), ChannelError> {
        Err(ChannelError::SendFailed(format!(
            "channel '{}' does not support media",
            self.name()
        )))
    }

    /// Sub-chat id where the model's reasoning trace is mirrored, if the
    /// channel exposes one.
    fn reasoning_channel_id(&self) -> Option<String> {
        None
    }

    /// Whether the adapter is connected and ready to serve.
    fn is_running(&self) -> bool;
}
