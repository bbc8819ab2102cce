//! In-process message bus: queues plus the event types flowing over them.

pub mod queue;
pub mod types;

pub use queue::MessageBus;
pub use types::{
    is_internal_channel, meta, InboundMessage, MediaPart, MessageKind, OutboundMediaMessage,
    OutboundMessage, Peer, PeerKind, INTERNAL_CHANNELS,
};
