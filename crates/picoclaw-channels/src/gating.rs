//! Inbound gating shared by every adapter: sender allowlists, group
//! trigger checks, and duplicate suppression.

use std::collections::{HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::Mutex;

use picoclaw_core::config::schema::GroupTriggerConfig;
use picoclaw_core::identity::parse_canonical_id;

// ─────────────────────────────────────────────
// Allowlist
// ─────────────────────────────────────────────

/// A parsed allowlist entry. All matching is case-insensitive.
#[derive(Clone, Debug, PartialEq)]
enum AllowEntry {
    /// Bare numeric or opaque id.
    Id(String),
    /// `@username`.
    Username(String),
    /// `id|username` compound — either side matches.
    Compound { id: String, username: String },
    /// Canonical `platform:id` (prefix must be non-numeric).
    Canonical { platform: String, id: String },
}

/// Sender allowlist. An empty list allows everyone.
#[derive(Clone, Debug, Default)]
pub struct Allowlist {
    entries: Vec<AllowEntry>,
}

impl Allowlist {
    /// Parse entries from config strings.
    pub fn new(raw: &[String]) -> Self {
        let entries = raw
            .iter()
            .filter_map(|s| Self::parse_entry(s))
            .collect();
        Self { entries }
    }

    fn parse_entry(raw: &str) -> Option<AllowEntry> {
        let raw = raw.trim().to_lowercase();
        if raw.is_empty() {
            return None;
        }

        if let Some(username) = raw.strip_prefix('@') {
            return Some(AllowEntry::Username(username.to_string()));
        }

        if let Some((id, username)) = raw.split_once('|') {
            return Some(AllowEntry::Compound {
                id: id.trim().to_string(),
                username: username.trim().trim_start_matches('@').to_string(),
            });
        }

        // `platform:id` is canonical only when the prefix is non-numeric;
        // a numeric prefix means the colon is part of an opaque id.
        if let Some((platform, id)) = parse_canonical_id(&raw) {
            if !platform.chars().all(|c| c.is_ascii_digit()) {
                return Some(AllowEntry::Canonical { platform, id });
            }
        }

        Some(AllowEntry::Id(raw))
    }

    /// Whether this allowlist permits a sender. `platform` is the channel's
    /// platform name for canonical matching.
    pub fn allows(&self, platform: &str, sender_id: &str, username: Option<&str>) -> bool {
        if self.entries.is_empty() {
            return true;
        }

        let platform = platform.to_lowercase();
        let sender_id = sender_id.to_lowercase();
        let username = username.map(|u| u.trim_start_matches('@').to_lowercase());

        self.entries.iter().any(|entry| match entry {
            AllowEntry::Id(id) => *id == sender_id,
            AllowEntry::Username(name) => username.as_deref() == Some(name.as_str()),
            AllowEntry::Compound { id, username: name } => {
                *id == sender_id || username.as_deref() == Some(name.as_str())
            }
            AllowEntry::Canonical { platform: p, id } => {
                *p == platform && id.to_lowercase() == sender_id
            }
        })
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ─────────────────────────────────────────────
// Group trigger
// ─────────────────────────────────────────────

/// Decide whether a group message triggers the agent.
///
/// Returns the (prefix-stripped) content to process, or `None` when the
/// message should be ignored. `mentioned` is the adapter's mention-of-bot
/// signal, already stripped of the mention text.
pub fn group_trigger(
    content: &str,
    mentioned: bool,
    config: &GroupTriggerConfig,
) -> Option<String> {
    if mentioned {
        return Some(content.to_string());
    }

    let trimmed = content.trim_start();
    for prefix in &config.prefixes {
        if prefix.is_empty() {
            continue;
        }
        if trimmed.len() >= prefix.len()
            && trimmed[..prefix.len()].eq_ignore_ascii_case(prefix)
        {
            return Some(trimmed[prefix.len()..].trim_start().to_string());
        }
    }

    // Open group: no mention requirement and no prefixes configured.
    if !config.require_mention && config.prefixes.is_empty() {
        return Some(content.to_string());
    }

    None
}

// ─────────────────────────────────────────────
// Dedup ring
// ─────────────────────────────────────────────

/// Default dedup window.
pub const DEDUP_CAPACITY: usize = 1000;

/// Bounded ring of recently seen platform message ids.
pub struct DedupRing {
    capacity: usize,
    inner: Mutex<DedupInner>,
}

#[derive(Default)]
struct DedupInner {
    order: VecDeque<String>,
    seen: HashSet<String>,
}

impl DedupRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(DedupInner::default()),
        }
    }

    /// Returns `true` if the id is fresh (and records it). Empty ids are
    /// never deduplicated.
    pub fn check_and_insert(&self, message_id: &str) -> bool {
        if message_id.is_empty() || message_id == "0" {
            return true;
        }

        let mut inner = self.inner.lock().unwrap();
        if inner.seen.contains(message_id) {
            return false;
        }

        inner.order.push_back(message_id.to_string());
        inner.seen.insert(message_id.to_string());
        while inner.order.len() > self.capacity {
            if let Some(evicted) = inner.order.pop_front() {
                inner.seen.remove(&evicted);
            }
        }
        true
    }
}

impl Default for DedupRing {
    fn default() -> Self {
        Self::new(DEDUP_CAPACITY)
    }
}

// ─────────────────────────────────────────────
// Media ingestion helpers
// ─────────────────────────────────────────────

/// Shared temp directory adapters download attachments into.
pub fn media_temp_dir() -> PathBuf {
    std::env::temp_dir().join("picoclaw_media")
}

/// Media-store scope for a message's attachments.
pub fn media_scope(channel: &str, chat_id: &str, message_id: &str) -> String {
    format!("{}:{}:{}", channel, chat_id, message_id)
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
