//! Workspace state — remembers the last channel the agent talked on so
//! background services (heartbeat, cron, subagents) can deliver to it.
//!
//! Stored at `<workspace>/state/state.json`; a legacy `<workspace>/state.json`
//! is migrated on first load.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::utils;

/// Persisted gateway state.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GatewayState {
    /// `"<channel>:<chat_id>"` of the last non-internal conversation.
    pub last_channel: String,
    /// Chat id alone, for convenience.
    pub last_chat_id: String,
    /// RFC 3339 timestamp of the last update.
    pub timestamp: String,
}

/// Owns the state file; all access goes through the internal lock.
pub struct StateManager {
    state_path: PathBuf,
    state: Mutex<GatewayState>,
}

impl StateManager {
    /// Create a state manager for a workspace. Loads existing state,
    /// migrating the legacy root-level `state.json` if present.
    pub fn new(workspace: &Path) -> Self {
        let state_dir = workspace.join("state");
        let state_path = state_dir.join("state.json");

        let state = Self::load_or_migrate(workspace, &state_path);

        StateManager {
            state_path,
            state: Mutex::new(state),
        }
    }

    fn load_or_migrate(workspace: &Path, state_path: &Path) -> GatewayState {
        if state_path.exists() {
            return Self::read_state(state_path).unwrap_or_default();
        }

        // Legacy layout: state.json at the workspace root.
        let legacy = workspace.join("state.json");
        if legacy.exists() {
            if let Some(state) = Self::read_state(&legacy) {
                debug!("migrating legacy state.json to state/state.json");
                if utils::atomic_write_json(state_path, &state).is_ok() {
                    let _ = std::fs::remove_file(&legacy);
                }
                return state;
            }
        }

        GatewayState::default()
    }

    fn read_state(path: &Path) -> Option<GatewayState> {
        let data = std::fs::read_to_string(path).ok()?;
        match serde_json::from_str(&data) {
            Ok(state) => Some(state),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to parse state file");
                None
            }
        }
    }

    /// Record the last channel/chat the agent replied on. Persists
    /// atomically.
    pub fn record_last_channel(&self, channel: &str, chat_id: &str) {
        let snapshot = {
            let mut state = self.state.lock().unwrap();
            state.last_channel = format!("{}:{}", channel, chat_id);
            state.last_chat_id = chat_id.to_string();
            state.timestamp = chrono::Utc::now().to_rfc3339();
            state.clone()
        };

        if let Err(e) = utils::atomic_write_json(&self.state_path, &snapshot) {
            warn!(error = %e, "failed to persist gateway state");
        }
    }

    /// Snapshot of the current state.
    pub fn get(&self) -> GatewayState {
        self.state.lock().unwrap().clone()
    }

    /// Last channel/chat pair, parsed back out of `last_channel`.
    pub fn last_channel_chat(&self) -> Option<(String, String)> {
        let state = self.state.lock().unwrap();
        let (channel, chat_id) = state.last_channel.split_once(':')?;
        if channel.is_empty() || chat_id.is_empty() {
            return None;
        }
        Some((channel.to_string(), chat_id.to_string()))
    }
}
