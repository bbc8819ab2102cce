//! Bus event types — messages flowing between channel adapters and the
//! agent loop.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Channel names reserved for in-process traffic. Messages on these channels
/// never reach end users.
pub const INTERNAL_CHANNELS: &[&str] = &["system", "cli", "subagent"];

/// Whether a channel name is one of the reserved internal channels.
pub fn is_internal_channel(name: &str) -> bool {
    INTERNAL_CHANNELS.contains(&name)
}

// ─────────────────────────────────────────────
// Peers
// ─────────────────────────────────────────────

/// What kind of conversation a message belongs to.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerKind {
    #[default]
    Direct,
    Group,
    Channel,
}

impl PeerKind {
    /// Lowercase wire spelling, used inside session keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            PeerKind::Direct => "direct",
            PeerKind::Group => "group",
            PeerKind::Channel => "channel",
        }
    }
}

/// The conversation partner: a user DM, a group, or a broadcast channel.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Peer {
    pub kind: PeerKind,
    pub id: String,
}

impl Peer {
    pub fn direct(id: impl Into<String>) -> Self {
        Peer {
            kind: PeerKind::Direct,
            id: id.into(),
        }
    }

    pub fn group(id: impl Into<String>) -> Self {
        Peer {
            kind: PeerKind::Group,
            id: id.into(),
        }
    }
}

// ─────────────────────────────────────────────
// Well-known metadata keys
// ─────────────────────────────────────────────

/// Metadata keys adapters populate on inbound messages.
pub mod meta {
    pub const ACCOUNT_ID: &str = "account_id";
    pub const GUILD_ID: &str = "guild_id";
    pub const TEAM_ID: &str = "team_id";
    pub const PARENT_PEER_KIND: &str = "parent_peer_kind";
    pub const PARENT_PEER_ID: &str = "parent_peer_id";
    pub const REPLY_TO_MESSAGE_ID: &str = "reply_to_message_id";
    pub const SENDER_NAME: &str = "sender_name";
}

// ─────────────────────────────────────────────
// Inbound
// ─────────────────────────────────────────────

/// An inbound message from a channel adapter to the agent loop.
#[derive(Clone, Debug)]
pub struct InboundMessage {
    /// Channel name (e.g. "telegram", "discord", "cli", "system").
    pub channel: String,
    /// Sender identifier within the channel.
    pub sender_id: String,
    /// Chat/conversation identifier.
    pub chat_id: String,
    /// Text content of the message.
    pub content: String,
    /// Explicit session-key override; when set, routing is skipped.
    pub session_key: Option<String>,
    /// Conversation peer.
    pub peer: Peer,
    /// Channel-specific metadata (see [`meta`]).
    pub metadata: HashMap<String, String>,
    /// Ordered media refs (`media://…`) registered with the media store.
    pub media: Vec<String>,
    /// Media-store scope owning the refs above.
    pub media_scope: Option<String>,
    /// When the message was received.
    pub timestamp: DateTime<Utc>,
}

impl InboundMessage {
    /// Create an inbound message with minimal required fields. The peer
    /// defaults to a direct chat with the sender.
    pub fn new(
        channel: impl Into<String>,
        sender_id: impl Into<String>,
        chat_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        let sender_id = sender_id.into();
        InboundMessage {
            channel: channel.into(),
            sender_id: sender_id.clone(),
            chat_id: chat_id.into(),
            content: content.into(),
            session_key: None,
            peer: Peer::direct(sender_id),
            metadata: HashMap::new(),
            media: Vec::new(),
            media_scope: None,
            timestamp: Utc::now(),
        }
    }

    /// Whether this message arrived on a reserved internal channel.
    pub fn is_internal(&self) -> bool {
        is_internal_channel(&self.channel)
    }

    /// Fetch a metadata value.
    pub fn meta(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(|s| s.as_str())
    }
}

// ─────────────────────────────────────────────
// Outbound
// ─────────────────────────────────────────────

/// Delivery class of an outbound message.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// A user-facing reply.
    #[default]
    Normal,
    /// Advisory progress message; adapters may suppress these.
    Status,
}

/// An outbound text message from the agent to a channel.
#[derive(Clone, Debug)]
pub struct OutboundMessage {
    pub channel: String,
    pub chat_id: String,
    pub content: String,
    pub kind: MessageKind,
}

impl OutboundMessage {
    /// Create a normal outbound message.
    pub fn new(
        channel: impl Into<String>,
        chat_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        OutboundMessage {
            channel: channel.into(),
            chat_id: chat_id.into(),
            content: content.into(),
            kind: MessageKind::Normal,
        }
    }

    /// Create a status (advisory) outbound message.
    pub fn status(
        channel: impl Into<String>,
        chat_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        OutboundMessage {
            channel: channel.into(),
            chat_id: chat_id.into(),
            content: content.into(),
            kind: MessageKind::Status,
        }
    }
}

/// One attachment in an outbound media message.
#[derive(Clone, Debug)]
pub struct MediaPart {
    /// `media://…` ref resolvable through the media store.
    pub media_ref: String,
    pub filename: Option<String>,
    pub content_type: Option<String>,
    /// Coarse media kind ("image", "audio", "document", …).
    pub kind: Option<String>,
    pub caption: Option<String>,
}

impl MediaPart {
    pub fn new(media_ref: impl Into<String>) -> Self {
        MediaPart {
            media_ref: media_ref.into(),
            filename: None,
            content_type: None,
            kind: None,
            caption: None,
        }
    }
}

/// An outbound message carrying media attachments.
#[derive(Clone, Debug)]
pub struct OutboundMediaMessage {
    pub channel: String,
    pub chat_id: String,
    pub parts: Vec<MediaPart>,
}

impl OutboundMediaMessage {
    pub fn new(
        channel: impl Into<String>,
        chat_id: impl Into<String>,
        parts: Vec<MediaPart>,
    ) -> Self {
        OutboundMediaMessage {
            channel: channel.into(),
            chat_id: chat_id.into(),
            parts,
        }
    }
}
