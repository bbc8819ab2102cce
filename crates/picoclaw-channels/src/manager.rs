//! Channel manager — lifecycle and outbound routing for all adapters,
//! plus the shared HTTP server with health endpoints.
//!
//! Responsibilities:
//! - Hold the registry of enabled channels
//! - Start/stop all channels concurrently
//! - Dispatch outbound text and media from the bus to the right channel
//! - Serve `GET /health` and `GET /ready` for the gateway
//! - Own the media store handed to adapters for attachment ingestion

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use picoclaw_core::bus::MessageBus;
use picoclaw_core::media::MediaStore;

use crate::base::Channel;

/// Manages the lifecycle and message routing for all chat channels.
pub struct ChannelManager {
    channels: HashMap<String, Arc<dyn Channel>>,
    bus: Arc<MessageBus>,
    media: MediaStore,
    shutdown: Arc<Notify>,
}

impl ChannelManager {
    pub fn new(bus: Arc<MessageBus>, media: MediaStore) -> Self {
        Self {
            channels: HashMap::new(),
            bus,
            media,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Register a channel. Overwrites a previous channel of the same name.
    pub fn register(&mut self, channel: Arc<dyn Channel>) {
        let name = channel.name().to_string();
        info!(channel = %name, "registered channel");
        self.channels.insert(name, channel);
    }

    /// Get a registered channel by name.
    pub fn get_channel(&self, name: &str) -> Option<&Arc<dyn Channel>> {
        self.channels.get(name)
    }

    /// Names of all enabled channels, sorted.
    pub fn get_enabled_channels(&self) -> Vec<String> {
        let mut names: Vec<String> = self.channels.keys().cloned().collect();
        names.sort();
        names
    }

    /// The media store adapters register attachments with.
    pub fn media_store(&self) -> &MediaStore {
        &self.media
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Start all channels plus the outbound dispatchers, then block until
    /// shutdown is signaled.
    pub async fn start_all(&self) -> Result<()> {
        if self.channels.is_empty() {
            warn!("no channels registered, nothing to start");
        }

        info!(
            channels = ?self.get_enabled_channels(),
            "starting {} channel(s)",
            self.channels.len()
        );

        for (name, channel) in &self.channels {
            let ch = channel.clone();
            let ch_name = name.clone();
            tokio::spawn(async move {
                info!(channel = %ch_name, "channel starting");
                if let Err(e) = ch.start().await {
                    error!(channel = %ch_name, error = %e, "channel start failed");
                }
                info!(channel = %ch_name, "channel stopped");
            });
        }

        // Outbound text dispatcher
        {
            let bus = self.bus.clone();
            let channels = self.channels.clone();
            let shutdown = self.shutdown.clone();
            tokio::spawn(async move {
                Self::dispatch_outbound(bus, channels, shutdown).await;
            });
        }

        // Outbound media dispatcher
        {
            let bus = self.bus.clone();
            let channels = self.channels.clone();
            let shutdown = self.shutdown.clone();
            tokio::spawn(async move {
                Self::dispatch_outbound_media(bus, channels, shutdown).await;
            });
        }

        self.shutdown.notified().await;
        info!("channel manager shutting down");
        Ok(())
    }

    /// Stop all channels and the dispatchers.
    pub async fn stop_all(&self) {
        info!("stopping all channels");
        self.shutdown.notify_waiters();

        for (name, channel) in &self.channels {
            debug!(channel = %name, "stopping channel");
            if let Err(e) = channel.stop().await {
                error!(channel = %name, error = %e, "channel stop failed");
            }
        }
        info!("all channels stopped");
    }

    /// Signal shutdown without awaiting the channels.
    pub fn signal_shutdown(&self) {
        self.shutdown.notify_waiters();
    }

    async fn dispatch_outbound(
        bus: Arc<MessageBus>,
        channels: HashMap<String, Arc<dyn Channel>>,
        shutdown: Arc<Notify>,
    ) {
        info!("outbound dispatcher started");
        loop {
            tokio::select! {
                msg = bus.consume_outbound() => {
                    match msg {
                        Some(outbound) => {
                            debug!(
                                channel = %outbound.channel,
                                chat_id = %outbound.chat_id,
                                content_len = outbound.content.len(),
                                "dispatching outbound message"
                            );
                            match channels.get(&outbound.channel) {
                                Some(channel) => {
                                    if let Err(e) = channel.send(&outbound).await {
                                        error!(channel = %outbound.channel, error = %e, "outbound send failed");
                                    }
                                }
                                None => {
                                    warn!(channel = %outbound.channel, "no channel registered for outbound message");
                                }
                            }
                        }
                        None => {
                            info!("outbound bus closed, dispatcher exiting");
                            break;
                        }
                    }
                }
                _ = shutdown.notified() => {
                    info!("outbound dispatcher received shutdown");
                    break;
                }
            }
        }
    }

    async fn dispatch_outbound_media(
        bus: Arc<MessageBus>,
        channels: HashMap<String, Arc<dyn Channel>>,
        shutdown: Arc<Notify>,
    ) {
        loop {
            tokio::select! {
                msg = bus.consume_outbound_media() => {
                    match msg {
                        Some(outbound) => {
                            match channels.get(&outbound.channel) {
                                Some(channel) => {
                                    if let Err(e) = channel.send_media(&outbound).await {
                                        error!(channel = %outbound.channel, error = %e, "outbound media send failed");
                                    }
                                }
                                None => {
                                    warn!(channel = %outbound.channel, "no channel registered for outbound media");
                                }
                            }
                        }
                        None => break,
                    }
                }
                _ = shutdown.notified() => break,
            }
        }
    }

    /// Start the shared HTTP server with `/health` and `/ready`.
    ///
    /// `/health` answers 200 as soon as the gateway is up; `/ready` answers
    /// 200 once every registered channel reports running.
    pub async fn setup_http_server(&self, addr: &str) -> Result<tokio::task::JoinHandle<()>> {
        let state = HealthState {
            channels: self.channels.values().cloned().collect(),
        };

        let app = Router::new()
            .route("/health", get(health_handler))
            .route("/ready", get(ready_handler))
            .with_state(state);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!(addr = %addr, "gateway HTTP server listening");

        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                error!(error = %e, "HTTP server exited");
            }
        });
        Ok(handle)
    }
}

#[derive(Clone)]
struct HealthState {
    channels: Vec<Arc<dyn Channel>>,
}

async fn health_handler() -> StatusCode {
    StatusCode::OK
}

async fn ready_handler(State(state): State<HealthState>) -> StatusCode {
    if state.channels.iter().all(|c| c.is_running()) {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
