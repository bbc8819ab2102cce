//! Gateway command — the long-running multi-channel service.
//!
//! Startup order: runtime (providers → agents → router → state) → media
//! cleanup → cron → heartbeat → channel manager + HTTP server → agent loop
//! task last, so every downstream service is ready before messages arrive.
//! Shutdown reverses it under a fresh 15-second deadline.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{error, info, warn};

use picoclaw_channels::{ChannelManager, ConsoleChannel};
use picoclaw_core::bus::OutboundMessage;
use picoclaw_core::config::Config;
use picoclaw_core::heartbeat::{DeliverFn, HeartbeatService, OnHeartbeatFn};
use picoclaw_cron::{CronService, OnJobFn};

use crate::runtime::{build_runtime, Runtime};

/// Grace period for service shutdown after the root context is gone.
const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(15);

pub async fn run(config: Config) -> Result<()> {
    // The bus comes first: cron (created before the runtime so agents can
    // register the cron tool) and the runtime share it.
    let bus = Arc::new(picoclaw_core::bus::MessageBus::new());

    let workspace = picoclaw_core::utils::expand_home(&config.agents.defaults.workspace);
    std::fs::create_dir_all(&workspace)?;

    let cron = Arc::new(CronService::new(
        bus.clone(),
        workspace.join("cron").join("jobs.json"),
    ));

    // Channels are registered before the runtime so the agent loop can
    // list them and find reasoning sub-chats.
    let media = picoclaw_core::media::MediaStore::new();
    let mut manager = ChannelManager::new(bus.clone(), media.clone());
    manager.register(Arc::new(ConsoleChannel::new()));
    let manager = Arc::new(manager);

    let reasoning: picoclaw_agent::ReasoningLookup = {
        let manager = manager.clone();
        Arc::new(move |channel: &str| {
            manager
                .get_channel(channel)
                .and_then(|c| c.reasoning_channel_id())
        })
    };

    let runtime = build_runtime(
        &config,
        bus.clone(),
        media.clone(),
        Some(cron.clone()),
        manager.get_enabled_channels(),
        Some(reasoning),
    )?;
    let Runtime {
        bus,
        providers,
        agents: _agents,
        agent_loop,
        state,
        media,
        workspace,
    } = runtime;

    // Media TTL cleanup
    let cleanup = &config.tools.media_cleanup;
    media.start(
        (cleanup.max_age_minutes > 0).then(|| Duration::from_secs(cleanup.max_age_minutes * 60)),
        (cleanup.interval_minutes > 0).then(|| Duration::from_secs(cleanup.interval_minutes * 60)),
    );

    // Cron job handler → agent (or plain shell for command payloads)
    {
        let agent_loop = agent_loop.clone();
        let handler: OnJobFn = Arc::new(move |job| {
            let agent_loop = agent_loop.clone();
            Box::pin(async move {
                if let Some(command) = &job.payload.command {
                    let output = tokio::process::Command::new("sh")
                        .arg("-c")
                        .arg(command)
                        .output()
                        .await
                        .context("cron command failed to start")?;
                    return Ok(String::from_utf8_lossy(&output.stdout).to_string());
                }
                let channel = job.payload.channel.as_deref().unwrap_or("system");
                let to = job.payload.to.as_deref().unwrap_or("cron");
                agent_loop
                    .process_direct_with_channel(channel, to, &job.payload.message, None)
                    .await
            })
        });
        cron.set_on_job(handler).await;
    }

    let cron_task = {
        let cron = cron.clone();
        tokio::spawn(async move {
            if let Err(e) = cron.start().await {
                error!(error = %e, "cron service exited with error");
            }
        })
    };

    // Heartbeat → agent on the internal system channel; non-OK results are
    // delivered to the last-used channel.
    let heartbeat = {
        let on_heartbeat: OnHeartbeatFn = {
            let agent_loop = agent_loop.clone();
            Arc::new(move |prompt| {
                let agent_loop = agent_loop.clone();
                Box::pin(async move {
                    agent_loop
                        .process_direct_with_channel("system", "heartbeat", &prompt, None)
                        .await
                })
            })
        };
        let deliver: DeliverFn = {
            let bus = bus.clone();
            let state = state.clone();
            Arc::new(move |text: String| {
                if let Some((channel, chat_id)) = state.last_channel_chat() {
                    bus.publish_outbound(OutboundMessage::new(channel, chat_id, text));
                }
            })
        };
        Arc::new(HeartbeatService::new(
            workspace.clone(),
            Some(on_heartbeat),
            Some(deliver),
            config.heartbeat.interval_minutes * 60,
            config.heartbeat.enabled,
        ))
    };
    let heartbeat_task = {
        let heartbeat = heartbeat.clone();
        tokio::spawn(async move {
            let _ = heartbeat.start().await;
        })
    };

    // Health endpoints on the shared HTTP server
    let http_addr = format!("{}:{}", config.gateway.host, config.gateway.port);
    let http_task = manager
        .setup_http_server(&http_addr)
        .await
        .with_context(|| format!("failed to bind gateway HTTP server on {http_addr}"))?;

    let channels_task = {
        let manager = manager.clone();
        tokio::spawn(async move {
            if let Err(e) = manager.start_all().await {
                error!(error = %e, "channel manager exited with error");
            }
        })
    };

    // Agent loop last: by the time messages flow, everything is ready.
    let loop_task = {
        let agent_loop = agent_loop.clone();
        tokio::spawn(async move {
            agent_loop.run().await;
        })
    };

    info!(addr = %http_addr, channels = ?manager.get_enabled_channels(), "gateway up");

    wait_for_shutdown_signal().await;
    info!("shutdown signal received");

    // Close the bus so the agent loop drains and exits; stop services under
    // a fresh deadline (the root context is already gone).
    bus.close();
    let shutdown = async {
        manager.stop_all().await;
        cron.stop();
        heartbeat.stop();
        media.stop();
        providers.close().await;
    };
    if tokio::time::timeout(SHUTDOWN_DEADLINE, shutdown).await.is_err() {
        warn!("shutdown deadline exceeded, aborting remaining tasks");
    }

    http_task.abort();
    let _ = loop_task.await;
    channels_task.abort();
    cron_task.abort();
    heartbeat_task.abort();

    info!("gateway stopped");
    Ok(())
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
