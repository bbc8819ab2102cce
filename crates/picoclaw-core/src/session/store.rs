//! Session store — per-session history and running summary with atomic
//! JSON persistence.
//!
//! One file per session under `sessions/<safe-key>.json`. Sessions are
//! loaded on first use and cached in memory; every mutation saves through
//! the atomic write path. Getters return snapshots.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;

use tracing::{debug, warn};

use crate::types::{Message, Session};
use crate::utils;

/// Manages conversation sessions. Thread-safe; the agent loop is the sole
/// writer, other readers get cloned snapshots.
pub struct SessionStore {
    sessions_dir: PathBuf,
    cache: RwLock<HashMap<String, Session>>,
}

impl SessionStore {
    /// Create a session store rooted at `sessions_dir`. The directory is
    /// created if missing.
    pub fn new(sessions_dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let dir = sessions_dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(SessionStore {
            sessions_dir: dir,
            cache: RwLock::new(HashMap::new()),
        })
    }

    /// Get a snapshot of a session, loading from disk or creating it.
    pub fn get_or_create(&self, key: &str) -> Session {
        {
            let cache = self.cache.read().unwrap();
            if let Some(session) = cache.get(key) {
                return session.clone();
            }
        }

        if let Some(session) = self.load_from_disk(key) {
            let mut cache = self.cache.write().unwrap();
            cache.insert(key.to_string(), session.clone());
            return session;
        }

        let session = Session::new(key);
        let mut cache = self.cache.write().unwrap();
        cache.insert(key.to_string(), session.clone());
        session
    }

    /// Append a message and persist.
    pub fn add_message(&self, key: &str, message: Message) {
        self.mutate(key, |session| session.messages.push(message));
    }

    /// Append a fully-formed message (assistant with tool calls, tool
    /// results) and persist.
    pub fn add_full_message(&self, key: &str, message: Message) {
        self.add_message(key, message);
    }

    /// Replace the running summary and persist.
    pub fn set_summary(&self, key: &str, summary: impl Into<String>) {
        let summary = summary.into();
        self.mutate(key, |session| session.summary = summary);
    }

    /// Keep only the last `n` messages and persist.
    pub fn truncate_history(&self, key: &str, n: usize) {
        self.mutate(key, |session| {
            let len = session.messages.len();
            if len > n {
                session.messages.drain(..len - n);
            }
        });
    }

    /// Clear history and summary, keeping the session file.
    pub fn clear(&self, key: &str) {
        self.mutate(key, |session| {
            session.messages.clear();
            session.summary.clear();
        });
    }

    /// Snapshot of the last `max_messages` history entries.
    pub fn history(&self, key: &str, max_messages: usize) -> Vec<Message> {
        let session = self.get_or_create(key);
        let len = session.messages.len();
        if len <= max_messages {
            session.messages
        } else {
            session.messages[len - max_messages..].to_vec()
        }
    }

    /// Current running summary (empty string when none).
    pub fn summary(&self, key: &str) -> String {
        self.get_or_create(key).summary
    }

    /// Number of messages currently in a session.
    pub fn len(&self, key: &str) -> usize {
        self.get_or_create(key).messages.len()
    }

    /// Delete a session from cache and disk. Returns whether the file
    /// existed.
    pub fn delete(&self, key: &str) -> bool {
        {
            let mut cache = self.cache.write().unwrap();
            cache.remove(key);
        }
        let path = self.session_path(key);
        if path.exists() {
            if let Err(e) = std::fs::remove_file(&path) {
                warn!(error = %e, "failed to delete session file");
                return false;
            }
            true
        } else {
            false
        }
    }

    fn mutate(&self, key: &str, f: impl FnOnce(&mut Session)) {
        let mut session = self.get_or_create(key);
        f(&mut session);
        session.updated_at = chrono::Utc::now();

        {
            let mut cache = self.cache.write().unwrap();
            cache.insert(key.to_string(), session.clone());
        }

        if let Err(e) = self.save_to_disk(&session) {
            warn!(key = %key, error = %e, "failed to persist session");
        }
    }

    fn session_path(&self, key: &str) -> PathBuf {
        let safe_key = utils::safe_filename(key);
        self.sessions_dir.join(format!("{}.json", safe_key))
    }

    fn load_from_disk(&self, key: &str) -> Option<Session> {
        let path = self.session_path(key);
        if !path.exists() {
            return None;
        }

        let data = match std::fs::read_to_string(&path) {
            Ok(d) => d,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to read session file");
                return None;
            }
        };

        match serde_json::from_str::<Session>(&data) {
            Ok(mut session) => {
                session.key = key.to_string();
                debug!(key = %key, messages = session.messages.len(), "loaded session");
                Some(session)
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to parse session file");
                None
            }
        }
    }

    fn save_to_disk(&self, session: &Session) -> std::io::Result<()> {
        utils::atomic_write_json(&self.session_path(&session.key), session)
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn make_store() -> (SessionStore, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let store = SessionStore::new(dir.path()).unwrap();
        (store, dir)
    }

    #[test]
    fn test_get_or_create_new_session() {
        let (store, _dir) = make_store();
        let session = store.get_or_create("agent:main:cli:direct:local");
        assert_eq!(session.key, "agent:main:cli:direct:local");
        assert!(session.messages.is_empty());
        assert!(session.summary.is_empty());
    }

    #[test]
    fn test_add_message() {
        let (store, _dir) = make_store();
        store.add_message("agent:main:main", Message::user("hello"));
        store.add_message("agent:main:main", Message::assistant("hi there!"));

        assert_eq!(store.len("agent:main:main"), 2);
    }

    #[test]
    fn test_history_snapshot() {
        let (store, _dir) = make_store();
        for i in 0..10 {
            store.add_message("k", Message::user(format!("msg {i}")));
        }

        let history = store.history("k", 3);
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].text_content(), Some("msg 7"));
    }

    #[test]
    fn test_set_summary() {
        let (store, _dir) = make_store();
        store.set_summary("k", "earlier talk about rust");
        assert_eq!(store.summary("k"), "earlier talk about rust");
    }

    #[test]
    fn test_truncate_history_keeps_last_n() {
        let (store, _dir) = make_store();
        for i in 0..8 {
            store.add_message("k", Message::user(format!("m{i}")));
        }
        store.truncate_history("k", 4);

        let history = store.history("k", 50);
        assert_eq!(history.len(), 4);
        assert_eq!(history[0].text_content(), Some("m4"));
    }

    #[test]
    fn test_truncate_history_shorter_than_n() {
        let (store, _dir) = make_store();
        store.add_message("k", Message::user("only one"));
        store.truncate_history("k", 4);
        assert_eq!(store.len("k"), 1);
    }

    #[test]
    fn test_clear() {
        let (store, _dir) = make_store();
        store.add_message("k", Message::user("hello"));
        store.set_summary("k", "s");
        store.clear("k");

        assert_eq!(store.len("k"), 0);
        assert!(store.summary("k").is_empty());
    }

    #[test]
    fn test_persistence_round_trip() {
        let dir = tempdir().unwrap();

        {
            let store = SessionStore::new(dir.path()).unwrap();
            store.add_message("agent:main:main", Message::user("Hello"));
            store.add_message("agent:main:main", Message::assistant("Hi!"));
            store.set_summary("agent:main:main", "greeting exchange");
        }

        // New store (empty cache) loads from disk
        {
            let store = SessionStore::new(dir.path()).unwrap();
            let session = store.get_or_create("agent:main:main");
            assert_eq!(session.messages.len(), 2);
            assert_eq!(session.summary, "greeting exchange");
        }
    }

    #[test]
    fn test_tool_call_messages_round_trip() {
        let dir = tempdir().unwrap();
        let call = crate::types::ToolCall::new("t1", "echo", r#"{"msg":"hi"}"#);

        {
            let store = SessionStore::new(dir.path()).unwrap();
            store.add_full_message("k", Message::assistant_tool_calls(None, vec![call.clone()]));
            store.add_full_message("k", Message::tool_result("t1", "hi"));
        }

        {
            let store = SessionStore::new(dir.path()).unwrap();
            let history = store.history("k", 10);
            assert_eq!(history.len(), 2);
            match &history[0] {
                Message::Assistant { tool_calls, .. } => {
                    assert_eq!(tool_calls.as_ref().unwrap()[0].id, "t1");
                }
                other => panic!("expected assistant message, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_delete_session() {
        let (store, _dir) = make_store();
        store.add_message("k", Message::user("hello"));
        assert!(store.delete("k"));
        assert!(!store.delete("k"));
        assert_eq!(store.len("k"), 0);
    }

    #[test]
    fn test_sessions_are_independent() {
        let (store, _dir) = make_store();
        store.add_message("a", Message::user("for a"));
        store.add_message("b", Message::user("for b"));
        store.add_message("b", Message::user("again b"));

        assert_eq!(store.len("a"), 1);
        assert_eq!(store.len("b"), 2);
    }

    #[test]
    fn test_session_file_is_single_json_document() {
        let dir = tempdir().unwrap();
        let store = SessionStore::new(dir.path()).unwrap();
        store.add_message("agent:main:main", Message::user("test"));

        let path = dir.path().join("agent_main_main.json");
        assert!(path.exists());
        let parsed: Session =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(parsed.messages.len(), 1);
    }
}
