//! Media store — ref-based lifecycle for files shared between adapters and
//! the agent loop.
//!
//! `store()` registers a pre-existing file (no copy, no move) under a scope
//! key (typically `channel:chat_id:message_id`) and hands back an opaque
//! `media://<uuid>` ref. The store holds the authoritative ref→path mapping
//! and is the sole remover of files. Releases are two-phase: map entries are
//! removed under the write lock, file deletion happens after the lock is
//! dropped.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

/// Prefix of every media ref.
pub const MEDIA_REF_PREFIX: &str = "media://";

/// Descriptive metadata attached to a stored file.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MediaMeta {
    pub filename: Option<String>,
    pub content_type: Option<String>,
    /// Where the file came from ("telegram", "tool", …).
    pub source: Option<String>,
}

/// A stored media entry.
#[derive(Clone, Debug)]
pub struct MediaEntry {
    pub path: PathBuf,
    pub meta: MediaMeta,
    pub stored_at: DateTime<Utc>,
}

#[derive(Default)]
struct MediaIndex {
    /// ref → entry
    entries: HashMap<String, MediaEntry>,
    /// scope → refs in that scope
    scopes: HashMap<String, HashSet<String>>,
    /// ref → owning scope
    ref_scope: HashMap<String, String>,
}

impl MediaIndex {
    /// Remove a ref from all three maps, returning its file path.
    /// Empty scope sets are pruned.
    fn evict(&mut self, media_ref: &str) -> Option<PathBuf> {
        let entry = self.entries.remove(media_ref)?;
        if let Some(scope) = self.ref_scope.remove(media_ref) {
            if let Some(refs) = self.scopes.get_mut(&scope) {
                refs.remove(media_ref);
                if refs.is_empty() {
                    self.scopes.remove(&scope);
                }
            }
        }
        Some(entry.path)
    }
}

/// The media store. Cheaply cloneable handle; all clones share state.
#[derive(Clone)]
pub struct MediaStore {
    index: Arc<RwLock<MediaIndex>>,
    running: Arc<AtomicBool>,
    shutdown: Arc<Notify>,
}

impl MediaStore {
    pub fn new() -> Self {
        MediaStore {
            index: Arc::new(RwLock::new(MediaIndex::default())),
            running: Arc::new(AtomicBool::new(false)),
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Register an existing file under `scope` and return its ref.
    pub fn store(&self, path: impl Into<PathBuf>, meta: MediaMeta, scope: &str) -> String {
        let media_ref = format!("{}{}", MEDIA_REF_PREFIX, uuid::Uuid::new_v4());
        let entry = MediaEntry {
            path: path.into(),
            meta,
            stored_at: Utc::now(),
        };

        let mut index = self.index.write().unwrap();
        index.entries.insert(media_ref.clone(), entry);
        index
            .scopes
            .entry(scope.to_string())
            .or_default()
            .insert(media_ref.clone());
        index.ref_scope.insert(media_ref.clone(), scope.to_string());

        debug!(media_ref = %media_ref, scope = %scope, "stored media ref");
        media_ref
    }

    /// Resolve a ref to its file path.
    pub fn resolve(&self, media_ref: &str) -> Option<PathBuf> {
        let index = self.index.read().unwrap();
        index.entries.get(media_ref).map(|e| e.path.clone())
    }

    /// Resolve a ref to its full entry (path + metadata).
    pub fn resolve_with_meta(&self, media_ref: &str) -> Option<MediaEntry> {
        let index = self.index.read().unwrap();
        index.entries.get(media_ref).cloned()
    }

    /// Number of refs currently tracked.
    pub fn len(&self) -> usize {
        self.index.read().unwrap().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Release every ref in a scope and delete the underlying files.
    ///
    /// Phase 1 removes all map entries under the write lock; phase 2 deletes
    /// files with no lock held.
    pub fn release_all(&self, scope: &str) -> usize {
        let paths: Vec<PathBuf> = {
            let mut index = self.index.write().unwrap();
            let refs: Vec<String> = index
                .scopes
                .get(scope)
                .map(|set| set.iter().cloned().collect())
                .unwrap_or_default();
            refs.iter().filter_map(|r| index.evict(r)).collect()
        };

        let count = paths.len();
        for path in paths {
            delete_file(&path);
        }
        if count > 0 {
            debug!(scope = %scope, released = count, "released media scope");
        }
        count
    }

    /// Evict entries older than `max_age` and delete their files. Same
    /// two-phase shape as [`release_all`].
    pub fn cleanup_expired(&self, max_age: Duration) -> usize {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(max_age).unwrap_or_else(|_| chrono::Duration::zero());

        let paths: Vec<PathBuf> = {
            let mut index = self.index.write().unwrap();
            let expired: Vec<String> = index
                .entries
                .iter()
                .filter(|(_, e)| e.stored_at < cutoff)
                .map(|(r, _)| r.clone())
                .collect();
            expired.iter().filter_map(|r| index.evict(r)).collect()
        };

        let count = paths.len();
        for path in paths {
            delete_file(&path);
        }
        if count > 0 {
            info!(evicted = count, "media TTL cleanup");
        }
        count
    }

    /// Start the TTL cleanup task. A missing `max_age` or `interval` makes
    /// this a safe no-op. Idempotent.
    pub fn start(&self, max_age: Option<Duration>, interval: Option<Duration>) {
        let (max_age, interval) = match (max_age, interval) {
            (Some(a), Some(i)) => (a, i),
            _ => {
                debug!("media cleanup not configured, skipping");
                return;
            }
        };

        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        let store = self.clone();
        tokio::spawn(async move {
            info!(
                max_age_s = max_age.as_secs(),
                interval_s = interval.as_secs(),
                "media cleanup started"
            );
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {
                        store.cleanup_expired(max_age);
                    }
                    _ = store.shutdown.notified() => {
                        info!("media cleanup stopped");
                        return;
                    }
                }
            }
        });
    }

    /// Stop the TTL cleanup task. Idempotent.
    pub fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            self.shutdown.notify_waiters();
        }
    }
}

impl Default for MediaStore {
    fn default() -> Self {
        Self::new()
    }
}

fn delete_file(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if path.exists() {
            warn!(path = %path.display(), error = %e, "failed to delete media file");
        }
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
