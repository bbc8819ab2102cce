//! Heartbeat service — periodic agent wake-up to check for standing tasks.
//!
//! Each tick reads `HEARTBEAT.md` from the workspace and, when it holds
//! actionable content, runs the prompt through the agent on the internal
//! `system` channel. A `HEARTBEAT_OK` sentinel in the response means
//! "nothing to report" and is dropped silently; anything else is handed to
//! the delivery callback (which routes to the last-used channel).
//! Failures are logged and never abort the process.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::Notify;
use tracing::{debug, error, info};

/// The prompt sent to the agent during a heartbeat tick.
pub const HEARTBEAT_PROMPT: &str = r#"Read HEARTBEAT.md in your workspace (if it exists).
Follow any instructions or tasks listed there.
If nothing needs attention, reply with just: HEARTBEAT_OK"#;

/// Token that indicates "nothing to do".
pub const HEARTBEAT_OK_TOKEN: &str = "HEARTBEAT_OK";

/// Callback invoked on each heartbeat tick; receives the prompt and returns
/// the agent's response text.
pub type OnHeartbeatFn = Arc<
    dyn Fn(String) -> Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send>> + Send + Sync,
>;

/// Callback used to deliver a non-OK heartbeat result to a user channel.
pub type DeliverFn = Arc<dyn Fn(String) + Send + Sync>;

/// Periodic heartbeat that wakes the agent to check `HEARTBEAT.md`.
pub struct HeartbeatService {
    workspace: PathBuf,
    on_heartbeat: Option<OnHeartbeatFn>,
    deliver: Option<DeliverFn>,
    interval_s: u64,
    enabled: bool,
    shutdown: Arc<Notify>,
}

impl HeartbeatService {
    /// Create a heartbeat service ticking every `interval_s` seconds.
    pub fn new(
        workspace: PathBuf,
        on_heartbeat: Option<OnHeartbeatFn>,
        deliver: Option<DeliverFn>,
        interval_s: u64,
        enabled: bool,
    ) -> Self {
        Self {
            workspace,
            on_heartbeat,
            deliver,
            interval_s,
            enabled,
            shutdown: Arc::new(Notify::new()),
        }
    }

    fn heartbeat_file(&self) -> PathBuf {
        self.workspace.join("HEARTBEAT.md")
    }

    fn read_heartbeat_file(&self) -> Option<String> {
        let path = self.heartbeat_file();
        if path.exists() {
            std::fs::read_to_string(&path).ok()
        } else {
            None
        }
    }

    /// Whether `HEARTBEAT.md` has no actionable content. Empty lines,
    /// headers, HTML comments, and bare checkboxes do not count.
    fn is_heartbeat_empty(content: Option<&str>) -> bool {
        let content = match content {
            Some(c) if !c.is_empty() => c,
            _ => return true,
        };

        for line in content.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty()
                || trimmed.starts_with('#')
                || trimmed.starts_with("<!--")
                || trimmed == "- [ ]"
                || trimmed == "* [ ]"
                || trimmed == "- [x]"
                || trimmed == "* [x]"
            {
                continue;
            }
            return false;
        }

        true
    }

    /// Whether a response is the all-clear sentinel. Matching is
    /// case-insensitive and tolerates missing underscores.
    pub fn is_ok_response(response: &str) -> bool {
        let normalized = response.to_uppercase().replace('_', "");
        normalized.contains(&HEARTBEAT_OK_TOKEN.replace('_', ""))
    }

    /// Start the heartbeat loop. Returns when `stop()` is called.
    pub async fn start(&self) -> anyhow::Result<()> {
        if !self.enabled {
            info!("heartbeat disabled");
            self.shutdown.notified().await;
            return Ok(());
        }

        info!(interval_s = self.interval_s, "heartbeat service started");

        loop {
            let sleep_duration = std::time::Duration::from_secs(self.interval_s);

            tokio::select! {
                _ = tokio::time::sleep(sleep_duration) => {
                    self.tick().await;
                }
                _ = self.shutdown.notified() => {
                    info!("heartbeat service shutting down");
                    return Ok(());
                }
            }
        }
    }

    /// Stop the heartbeat service.
    pub fn stop(&self) {
        self.shutdown.notify_waiters();
    }

    async fn tick(&self) {
        let content = self.read_heartbeat_file();

        if Self::is_heartbeat_empty(content.as_deref()) {
            debug!("heartbeat: no tasks (HEARTBEAT.md empty)");
            return;
        }

        let callback = match &self.on_heartbeat {
            Some(cb) => cb,
            None => return,
        };

        info!("heartbeat: checking for tasks");
        match callback(HEARTBEAT_PROMPT.to_string()).await {
            Ok(response) => {
                if Self::is_ok_response(&response) {
                    debug!("heartbeat: OK (no action needed)");
                } else if let Some(deliver) = &self.deliver {
                    deliver(response);
                }
            }
            Err(e) => {
                error!(error = %e, "heartbeat execution failed");
            }
        }
    }

    /// Manually trigger a heartbeat tick (for CLI or testing).
    pub async fn trigger_now(&self) -> Option<anyhow::Result<String>> {
        match &self.on_heartbeat {
            Some(callback) => Some(callback(HEARTBEAT_PROMPT.to_string()).await),
            None => None,
        }
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_heartbeat_empty_none() {
        assert!(HeartbeatService::is_heartbeat_empty(None));
        assert!(HeartbeatService::is_heartbeat_empty(Some("")));
    }

    #[test]
    fn test_is_heartbeat_empty_headers_only() {
        let content = "# Heartbeat Tasks\n\n## Active\n\n<!-- comment -->\n";
        assert!(HeartbeatService::is_heartbeat_empty(Some(content)));
    }

    #[test]
    fn test_is_heartbeat_empty_bare_checkboxes() {
        let content = "# Tasks\n- [ ]\n* [x]\n";
        assert!(HeartbeatService::is_heartbeat_empty(Some(content)));
    }

    #[test]
    fn test_is_heartbeat_not_empty_with_task() {
        let content = "# Tasks\n- [ ] Deploy v2.0\n";
        assert!(!HeartbeatService::is_heartbeat_empty(Some(content)));
    }

    #[test]
    fn test_ok_sentinel_matching() {
        assert!(HeartbeatService::is_ok_response("HEARTBEAT_OK"));
        assert!(HeartbeatService::is_ok_response("heartbeat_ok, nothing to do"));
        assert!(HeartbeatService::is_ok_response("HEARTBEATOK"));
        assert!(!HeartbeatService::is_ok_response("I deployed v2.0"));
    }

    #[tokio::test]
    async fn test_trigger_now_no_callback() {
        let service = HeartbeatService::new(PathBuf::from("/tmp/hb"), None, None, 60, true);
        assert!(service.trigger_now().await.is_none());
    }

    #[tokio::test]
    async fn test_trigger_now_with_callback() {
        let callback: OnHeartbeatFn =
            Arc::new(|_prompt| Box::pin(async { Ok("HEARTBEAT_OK".to_string()) }));
        let service =
            HeartbeatService::new(PathBuf::from("/tmp/hb"), Some(callback), None, 60, true);
        let result = service.trigger_now().await.unwrap().unwrap();
        assert!(HeartbeatService::is_ok_response(&result));
    }

    #[tokio::test]
    async fn test_ok_response_not_delivered() {
        use std::sync::atomic::{AtomicBool, Ordering};

        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("HEARTBEAT.md"), "- [ ] check the server\n").unwrap();

        let delivered = Arc::new(AtomicBool::new(false));
        let delivered_clone = delivered.clone();
        let deliver: DeliverFn = Arc::new(move |_| {
            delivered_clone.store(true, Ordering::SeqCst);
        });
        let callback: OnHeartbeatFn =
            Arc::new(|_| Box::pin(async { Ok("HEARTBEAT_OK".to_string()) }));

        let service = HeartbeatService::new(
            dir.path().to_path_buf(),
            Some(callback),
            Some(deliver),
            60,
            true,
        );
        service.tick().await;
        assert!(!delivered.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_non_ok_response_is_delivered() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("HEARTBEAT.md"), "- [ ] check the server\n").unwrap();

        let delivered = Arc::new(std::sync::Mutex::new(Vec::new()));
        let delivered_clone = delivered.clone();
        let deliver: DeliverFn = Arc::new(move |msg| {
            delivered_clone.lock().unwrap().push(msg);
        });
        let callback: OnHeartbeatFn =
            Arc::new(|_| Box::pin(async { Ok("Server was down, restarted it.".to_string()) }));

        let service = HeartbeatService::new(
            dir.path().to_path_buf(),
            Some(callback),
            Some(deliver),
            60,
            true,
        );
        service.tick().await;

        let messages = delivered.lock().unwrap();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].contains("restarted"));
    }

    #[tokio::test]
    async fn test_stop_exits_loop() {
        let service = Arc::new(HeartbeatService::new(
            PathBuf::from("/tmp/hb"),
            None,
            None,
            1,
            true,
        ));

        let svc = service.clone();
        let handle = tokio::spawn(async move { svc.start().await });

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        service.stop();

        assert!(handle.await.unwrap().is_ok());
    }
}
