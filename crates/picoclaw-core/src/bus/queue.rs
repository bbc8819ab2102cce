//! Async message bus — the single synchronization point between channel
//! adapters and the agent loop.
//!
//! Four unbounded FIFO queues: inbound text, inbound media, outbound text,
//! outbound media. Each queue has at most one consumer; producers are many.
//! `close()` drops the senders so consumers drain whatever is already
//! enqueued and then observe end-of-stream.

use std::sync::RwLock;

use tokio::sync::{mpsc, Mutex};

use super::types::{InboundMessage, OutboundMediaMessage, OutboundMessage};

/// The message bus connecting adapters ↔ agent loop.
///
/// - Adapters publish to `inbound` / `inbound_media`
/// - The agent loop consumes `inbound`, processes, publishes to `outbound`
/// - The channel manager consumes `outbound` / `outbound_media` and routes
///   by channel name
pub struct MessageBus {
    inbound_tx: RwLock<Option<mpsc::UnboundedSender<InboundMessage>>>,
    inbound_rx: Mutex<mpsc::UnboundedReceiver<InboundMessage>>,
    inbound_media_tx: RwLock<Option<mpsc::UnboundedSender<InboundMessage>>>,
    inbound_media_rx: Mutex<mpsc::UnboundedReceiver<InboundMessage>>,
    outbound_tx: RwLock<Option<mpsc::UnboundedSender<OutboundMessage>>>,
    outbound_rx: Mutex<mpsc::UnboundedReceiver<OutboundMessage>>,
    outbound_media_tx: RwLock<Option<mpsc::UnboundedSender<OutboundMediaMessage>>>,
    outbound_media_rx: Mutex<mpsc::UnboundedReceiver<OutboundMediaMessage>>,
}

impl MessageBus {
    /// Create a new message bus.
    pub fn new() -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (inbound_media_tx, inbound_media_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (outbound_media_tx, outbound_media_rx) = mpsc::unbounded_channel();

        MessageBus {
            inbound_tx: RwLock::new(Some(inbound_tx)),
            inbound_rx: Mutex::new(inbound_rx),
            inbound_media_tx: RwLock::new(Some(inbound_media_tx)),
            inbound_media_rx: Mutex::new(inbound_media_rx),
            outbound_tx: RwLock::new(Some(outbound_tx)),
            outbound_rx: Mutex::new(outbound_rx),
            outbound_media_tx: RwLock::new(Some(outbound_media_tx)),
            outbound_media_rx: Mutex::new(outbound_media_rx),
        }
    }

    /// Publish a message from an adapter to the agent. After `close()` this
    /// silently drops the message.
    pub fn publish_inbound(&self, msg: InboundMessage) {
        if let Some(tx) = self.inbound_tx.read().unwrap().as_ref() {
            let _ = tx.send(msg);
        }
    }

    /// Publish an inbound media notification.
    pub fn publish_inbound_media(&self, msg: InboundMessage) {
        if let Some(tx) = self.inbound_media_tx.read().unwrap().as_ref() {
            let _ = tx.send(msg);
        }
    }

    /// Publish a response from the agent to a channel.
    pub fn publish_outbound(&self, msg: OutboundMessage) {
        if let Some(tx) = self.outbound_tx.read().unwrap().as_ref() {
            let _ = tx.send(msg);
        }
    }

    /// Publish an outbound media message.
    pub fn publish_outbound_media(&self, msg: OutboundMediaMessage) {
        if let Some(tx) = self.outbound_media_tx.read().unwrap().as_ref() {
            let _ = tx.send(msg);
        }
    }

    /// Consume the next inbound message (blocks until available).
    /// Returns `None` once the bus is closed and the queue drained.
    pub async fn consume_inbound(&self) -> Option<InboundMessage> {
        let mut rx = self.inbound_rx.lock().await;
        rx.recv().await
    }

    /// Consume the next inbound media notification.
    pub async fn consume_inbound_media(&self) -> Option<InboundMessage> {
        let mut rx = self.inbound_media_rx.lock().await;
        rx.recv().await
    }

    /// Consume the next outbound message.
    pub async fn consume_outbound(&self) -> Option<OutboundMessage> {
        let mut rx = self.outbound_rx.lock().await;
        rx.recv().await
    }

    /// Consume the next outbound media message.
    pub async fn consume_outbound_media(&self) -> Option<OutboundMediaMessage> {
        let mut rx = self.outbound_media_rx.lock().await;
        rx.recv().await
    }

    /// Close the bus. Idempotent. Consumers drain any already-enqueued
    /// messages and then observe `None`; subsequent publishes are dropped.
    pub fn close(&self) {
        self.inbound_tx.write().unwrap().take();
        self.inbound_media_tx.write().unwrap().take();
        self.outbound_tx.write().unwrap().take();
        self.outbound_media_tx.write().unwrap().take();
    }

    /// Whether the bus has been closed.
    pub fn is_closed(&self) -> bool {
        self.inbound_tx.read().unwrap().is_none()
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::types::MediaPart;

    #[tokio::test]
    async fn test_inbound_message_flow() {
        let bus = MessageBus::new();

        bus.publish_inbound(InboundMessage::new("telegram", "user_1", "chat_1", "Hello!"));

        let received = bus.consume_inbound().await.unwrap();
        assert_eq!(received.channel, "telegram");
        assert_eq!(received.content, "Hello!");
    }

    #[tokio::test]
    async fn test_outbound_message_flow() {
        let bus = MessageBus::new();

        bus.publish_outbound(OutboundMessage::new("discord", "channel_42", "Response"));

        let received = bus.consume_outbound().await.unwrap();
        assert_eq!(received.channel, "discord");
        assert_eq!(received.content, "Response");
    }

    #[tokio::test]
    async fn test_fifo_ordering() {
        let bus = MessageBus::new();

        for i in 1..=3 {
            bus.publish_inbound(InboundMessage::new("cli", "local", "default", format!("msg-{i}")));
        }

        assert_eq!(bus.consume_inbound().await.unwrap().content, "msg-1");
        assert_eq!(bus.consume_inbound().await.unwrap().content, "msg-2");
        assert_eq!(bus.consume_inbound().await.unwrap().content, "msg-3");
    }

    #[tokio::test]
    async fn test_outbound_media_flow() {
        let bus = MessageBus::new();

        bus.publish_outbound_media(OutboundMediaMessage::new(
            "slack",
            "C1",
            vec![MediaPart::new("media://abc")],
        ));

        let received = bus.consume_outbound_media().await.unwrap();
        assert_eq!(received.parts[0].media_ref, "media://abc");
    }

    #[tokio::test]
    async fn test_close_drains_then_ends() {
        let bus = MessageBus::new();

        bus.publish_inbound(InboundMessage::new("cli", "u", "c", "before close"));
        bus.close();

        // Already-enqueued message is still delivered
        let received = bus.consume_inbound().await.unwrap();
        assert_eq!(received.content, "before close");

        // Then end-of-stream
        assert!(bus.consume_inbound().await.is_none());
    }

    #[tokio::test]
    async fn test_publish_after_close_is_silent() {
        let bus = MessageBus::new();
        bus.close();
        // Must not panic
        bus.publish_inbound(InboundMessage::new("cli", "u", "c", "dropped"));
        bus.publish_outbound(OutboundMessage::new("cli", "c", "dropped"));
        assert!(bus.consume_outbound().await.is_none());
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let bus = MessageBus::new();
        bus.close();
        bus.close();
        assert!(bus.is_closed());
    }

    #[tokio::test]
    async fn test_multiple_producers() {
        let bus = std::sync::Arc::new(MessageBus::new());

        let bus1 = bus.clone();
        let bus2 = bus.clone();

        let h1 = tokio::spawn(async move {
            bus1.publish_inbound(InboundMessage::new("telegram", "u1", "c1", "from telegram"));
        });
        let h2 = tokio::spawn(async move {
            bus2.publish_inbound(InboundMessage::new("discord", "u2", "c2", "from discord"));
        });

        h1.await.unwrap();
        h2.await.unwrap();

        let r1 = bus.consume_inbound().await.unwrap();
        let r2 = bus.consume_inbound().await.unwrap();

        let channels = vec![r1.channel, r2.channel];
        assert!(channels.contains(&"telegram".to_string()));
        assert!(channels.contains(&"discord".to_string()));
    }

    #[tokio::test]
    async fn test_full_round_trip() {
        let bus = std::sync::Arc::new(MessageBus::new());

        bus.publish_inbound(InboundMessage::new("telegram", "user_42", "chat_99", "What is 2+2?"));

        let received = bus.consume_inbound().await.unwrap();
        assert_eq!(received.content, "What is 2+2?");

        bus.publish_outbound(OutboundMessage::new(
            received.channel.clone(),
            received.chat_id.clone(),
            "The answer is 4.",
        ));

        let outbound = bus.consume_outbound().await.unwrap();
        assert_eq!(outbound.channel, "telegram");
        assert_eq!(outbound.chat_id, "chat_99");
        assert_eq!(outbound.content, "The answer is 4.");
    }
}
