//! Router — resolves which agent handles a message and which session key
//! its conversation extends.
//!
//! Resolution: ordered binding list (first full match wins, empty fields are
//! wildcards), falling back to the default agent. Session keys are shaped by
//! the DM scope; direct peers may be collapsed across platforms through the
//! identity-link table.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::bus::types::{Peer, PeerKind};

// ─────────────────────────────────────────────
// DM scope
// ─────────────────────────────────────────────

/// How direct-message conversations are partitioned into sessions.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DmScope {
    /// All DMs share one `main` session per agent.
    #[default]
    #[serde(rename = "main")]
    Main,
    /// One session per peer id, regardless of channel.
    #[serde(rename = "per-peer")]
    PerPeer,
    /// One session per (channel, peer).
    #[serde(rename = "per-channel-peer")]
    PerChannelPeer,
    /// One session per (channel, account, peer).
    #[serde(rename = "per-account-channel-peer")]
    PerAccountChannelPeer,
}

// ─────────────────────────────────────────────
// Bindings
// ─────────────────────────────────────────────

/// Match criteria for a binding. Empty fields are wildcards; all present
/// fields must match (case-insensitive).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BindingMatch {
    pub channel: Option<String>,
    pub account_id: Option<String>,
    pub peer_kind: Option<String>,
    pub peer_id: Option<String>,
    pub guild_id: Option<String>,
    pub team_id: Option<String>,
}

/// A rule mapping an incoming message tuple to a specific agent.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Binding {
    pub agent: String,
    #[serde(rename = "match", default)]
    pub criteria: BindingMatch,
}

/// The routable facts extracted from an inbound message.
#[derive(Clone, Debug, Default)]
pub struct RouteInput {
    pub channel: String,
    pub account_id: String,
    pub peer: Peer,
    pub parent_peer: Option<Peer>,
    pub guild_id: String,
    pub team_id: String,
}

/// The routing decision: which agent and which conversation.
#[derive(Clone, Debug, PartialEq)]
pub struct Route {
    pub agent_id: String,
    pub session_key: String,
}

// ─────────────────────────────────────────────
// Router
// ─────────────────────────────────────────────

/// Immutable routing policy, built once at startup from config.
pub struct Router {
    bindings: Vec<Binding>,
    default_agent: String,
    dm_scope: DmScope,
    /// alias (lowercased) → canonical name
    link_index: HashMap<String, String>,
}

impl Router {
    /// Build a router from the configured bindings, default agent, DM scope,
    /// and identity-link table (canonical name → alias list).
    pub fn new(
        bindings: Vec<Binding>,
        default_agent: &str,
        dm_scope: DmScope,
        identity_links: &HashMap<String, Vec<String>>,
    ) -> Self {
        let mut link_index = HashMap::new();
        for (canonical, aliases) in identity_links {
            for alias in aliases {
                link_index.insert(alias.trim().to_lowercase(), canonical.clone());
            }
        }
        Router {
            bindings,
            default_agent: normalize_agent_id(default_agent),
            dm_scope,
            link_index,
        }
    }

    /// Resolve the agent and session key for a message.
    pub fn resolve(&self, input: &RouteInput) -> Route {
        let agent_id = self.resolve_agent(input);
        let session_key = self.build_session_key(&agent_id, input);
        Route {
            agent_id,
            session_key,
        }
    }

    /// First binding whose criteria all match selects the agent; otherwise
    /// the default agent is used.
    fn resolve_agent(&self, input: &RouteInput) -> String {
        for binding in &self.bindings {
            if binding_matches(&binding.criteria, input) {
                return normalize_agent_id(&binding.agent);
            }
        }
        self.default_agent.clone()
    }

    /// Build the session key per the DM-scope table.
    fn build_session_key(&self, agent_id: &str, input: &RouteInput) -> String {
        let channel = input.channel.to_lowercase();
        let peer_id = input.peer.id.to_lowercase();

        if input.peer.kind != PeerKind::Direct {
            // Group/channel peers always scope by channel + kind + peer.
            return format!(
                "agent:{}:{}:{}:{}",
                agent_id,
                channel,
                input.peer.kind.as_str(),
                peer_id
            );
        }

        let peer_id = self.link_peer_id(&channel, &peer_id);

        match self.dm_scope {
            DmScope::Main => format!("agent:{}:main", agent_id),
            DmScope::PerPeer => format!("agent:{}:direct:{}", agent_id, peer_id),
            DmScope::PerChannelPeer => {
                format!("agent:{}:{}:direct:{}", agent_id, channel, peer_id)
            }
            DmScope::PerAccountChannelPeer => format!(
                "agent:{}:{}:{}:direct:{}",
                agent_id,
                channel,
                input.account_id.to_lowercase(),
                peer_id
            ),
        }
    }

    /// Substitute a canonical identity name for a direct peer id, enabling
    /// cross-platform session merging. Lookup tries the raw id, the
    /// channel-scoped `channel:id` form, and — when the id is already in
    /// canonical `platform:id` shape — the bare trailing id.
    fn link_peer_id(&self, channel: &str, peer_id: &str) -> String {
        if let Some(canonical) = self.link_index.get(peer_id) {
            return canonical.to_lowercase();
        }
        let scoped = format!("{}:{}", channel, peer_id);
        if let Some(canonical) = self.link_index.get(&scoped) {
            return canonical.to_lowercase();
        }
        if let Some((_, bare)) = peer_id.split_once(':') {
            if let Some(canonical) = self.link_index.get(bare) {
                return canonical.to_lowercase();
            }
        }
        peer_id.to_string()
    }
}

/// Normalize an agent id: lowercase, spaces to dashes.
pub fn normalize_agent_id(id: &str) -> String {
    id.trim().to_lowercase().replace(' ', "-")
}

/// Split a session key into `(agent_id, rest)`. Keys not starting with
/// `agent:` or missing the rest segment are rejected.
pub fn parse_agent_session_key(key: &str) -> Option<(String, String)> {
    let rest = key.strip_prefix("agent:")?;
    let (agent_id, scope) = rest.split_once(':')?;
    if agent_id.is_empty() || scope.is_empty() {
        return None;
    }
    Some((agent_id.to_string(), scope.to_string()))
}

/// Whether a session key belongs to a subagent conversation.
pub fn is_subagent_session_key(key: &str) -> bool {
    matches!(parse_agent_session_key(key), Some((_, rest)) if rest.starts_with("subagent:"))
}

fn binding_matches(criteria: &BindingMatch, input: &RouteInput) -> bool {
    fn field_matches(want: &Option<String>, have: &str) -> bool {
        match want.as_deref() {
            None | Some("") => true,
            Some(w) => w.eq_ignore_ascii_case(have),
        }
    }

    field_matches(&criteria.channel, &input.channel)
        && field_matches(&criteria.account_id, &input.account_id)
        && field_matches(&criteria.peer_kind, input.peer.kind.as_str())
        && field_matches(&criteria.peer_id, &input.peer.id)
        && field_matches(&criteria.guild_id, &input.guild_id)
        && field_matches(&criteria.team_id, &input.team_id)
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn direct_input(channel: &str, peer_id: &str) -> RouteInput {
        RouteInput {
            channel: channel.into(),
            peer: Peer::direct(peer_id),
            ..Default::default()
        }
    }

    fn router(dm_scope: DmScope) -> Router {
        Router::new(Vec::new(), "main", dm_scope, &HashMap::new())
    }

    #[test]
    fn test_normalize_agent_id() {
        assert_eq!(normalize_agent_id("Main Agent"), "main-agent");
        assert_eq!(normalize_agent_id("  Support "), "support");
    }

    #[test]
    fn test_default_agent_when_no_binding_matches() {
        let bindings = vec![Binding {
            agent: "support".into(),
            criteria: BindingMatch {
                channel: Some("slack".into()),
                ..Default::default()
            },
        }];
        let r = Router::new(bindings, "main", DmScope::Main, &HashMap::new());
        let route = r.resolve(&direct_input("telegram", "42"));
        assert_eq!(route.agent_id, "main");
    }

    #[test]
    fn test_first_matching_binding_wins() {
        let bindings = vec![
            Binding {
                agent: "first".into(),
                criteria: BindingMatch {
                    channel: Some("telegram".into()),
                    ..Default::default()
                },
            },
            Binding {
                agent: "second".into(),
                criteria: BindingMatch {
                    channel: Some("telegram".into()),
                    peer_id: Some("42".into()),
                    ..Default::default()
                },
            },
        ];
        let r = Router::new(bindings, "main", DmScope::Main, &HashMap::new());
        let route = r.resolve(&direct_input("telegram", "42"));
        assert_eq!(route.agent_id, "first");
    }

    #[test]
    fn test_binding_empty_fields_are_wildcards() {
        let bindings = vec![Binding {
            agent: "catch-all".into(),
            criteria: BindingMatch::default(),
        }];
        let r = Router::new(bindings, "main", DmScope::Main, &HashMap::new());
        assert_eq!(r.resolve(&direct_input("anything", "x")).agent_id, "catch-all");
    }

    #[test]
    fn test_binding_all_fields_must_match() {
        let bindings = vec![Binding {
            agent: "guild-bot".into(),
            criteria: BindingMatch {
                channel: Some("discord".into()),
                guild_id: Some("g-1".into()),
                ..Default::default()
            },
        }];
        let r = Router::new(bindings, "main", DmScope::Main, &HashMap::new());

        let mut input = direct_input("discord", "u");
        input.guild_id = "g-2".into();
        assert_eq!(r.resolve(&input).agent_id, "main");

        input.guild_id = "g-1".into();
        assert_eq!(r.resolve(&input).agent_id, "guild-bot");
    }

    #[test]
    fn test_dm_scope_main_ignores_peer() {
        let r = router(DmScope::Main);
        let a = r.resolve(&direct_input("telegram", "alice"));
        let b = r.resolve(&direct_input("discord", "bob"));
        assert_eq!(a.session_key, "agent:main:main");
        assert_eq!(b.session_key, "agent:main:main");
    }

    #[test]
    fn test_dm_scope_per_peer() {
        let r = router(DmScope::PerPeer);
        let route = r.resolve(&direct_input("telegram", "Alice"));
        assert_eq!(route.session_key, "agent:main:direct:alice");
    }

    #[test]
    fn test_dm_scope_per_channel_peer() {
        let r = router(DmScope::PerChannelPeer);
        let route = r.resolve(&direct_input("Telegram", "42"));
        assert_eq!(route.session_key, "agent:main:telegram:direct:42");
    }

    #[test]
    fn test_dm_scope_per_account_channel_peer() {
        let r = router(DmScope::PerAccountChannelPeer);
        let mut input = direct_input("slack", "U1");
        input.account_id = "BOT7".into();
        let route = r.resolve(&input);
        assert_eq!(route.session_key, "agent:main:slack:bot7:direct:u1");
    }

    #[test]
    fn test_group_peer_key_same_for_every_scope() {
        for scope in [
            DmScope::Main,
            DmScope::PerPeer,
            DmScope::PerChannelPeer,
            DmScope::PerAccountChannelPeer,
        ] {
            let r = router(scope);
            let input = RouteInput {
                channel: "telegram".into(),
                peer: Peer::group("G-99"),
                ..Default::default()
            };
            assert_eq!(r.resolve(&input).session_key, "agent:main:telegram:group:g-99");
        }
    }

    #[test]
    fn test_identity_link_raw_id() {
        let mut links = HashMap::new();
        links.insert("alice".to_string(), vec!["12345".to_string()]);
        let r = Router::new(Vec::new(), "main", DmScope::PerPeer, &links);
        let route = r.resolve(&direct_input("telegram", "12345"));
        assert_eq!(route.session_key, "agent:main:direct:alice");
    }

    #[test]
    fn test_identity_link_channel_scoped() {
        let mut links = HashMap::new();
        links.insert("alice".to_string(), vec!["telegram:12345".to_string()]);
        let r = Router::new(Vec::new(), "main", DmScope::PerChannelPeer, &links);
        let route = r.resolve(&direct_input("telegram", "12345"));
        assert_eq!(route.session_key, "agent:main:telegram:direct:alice");

        // Same raw id on a different channel does not link
        let other = r.resolve(&direct_input("discord", "12345"));
        assert_eq!(other.session_key, "agent:main:discord:direct:12345");
    }

    #[test]
    fn test_identity_link_bare_trailing_id() {
        // Sender id already in canonical platform:id form; the alias table
        // lists only the bare trailing id.
        let mut links = HashMap::new();
        links.insert("alice".to_string(), vec!["12345".to_string()]);
        let r = Router::new(Vec::new(), "main", DmScope::PerPeer, &links);
        let route = r.resolve(&direct_input("telegram", "telegram:12345"));
        assert_eq!(route.session_key, "agent:main:direct:alice");
    }

    #[test]
    fn test_cross_platform_merge() {
        let mut links = HashMap::new();
        links.insert(
            "alice".to_string(),
            vec!["telegram:111".to_string(), "discord:222".to_string()],
        );
        let r = Router::new(Vec::new(), "main", DmScope::PerPeer, &links);
        let tg = r.resolve(&direct_input("telegram", "telegram:111"));
        let dc = r.resolve(&direct_input("discord", "discord:222"));
        assert_eq!(tg.session_key, dc.session_key);
    }

    #[test]
    fn test_parse_agent_session_key_round_trip() {
        let r = router(DmScope::PerChannelPeer);
        let route = r.resolve(&direct_input("telegram", "42"));
        let (agent_id, rest) = parse_agent_session_key(&route.session_key).unwrap();
        assert_eq!(agent_id, "main");
        assert_eq!(rest, "telegram:direct:42");
    }

    #[test]
    fn test_parse_agent_session_key_rejects_malformed() {
        assert!(parse_agent_session_key("not-a-key").is_none());
        assert!(parse_agent_session_key("agent:").is_none());
        assert!(parse_agent_session_key("agent:only-id").is_none());
        assert!(parse_agent_session_key("agent::rest").is_none());
    }

    #[test]
    fn test_subagent_session_key_detection() {
        assert!(is_subagent_session_key("agent:main:subagent:abc123"));
        assert!(!is_subagent_session_key("agent:main:cli:direct:local"));
        assert!(!is_subagent_session_key("garbage"));
    }
}
