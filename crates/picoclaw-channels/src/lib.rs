//! Picoclaw channels — adapter contracts, inbound gating, and the channel
//! manager with the gateway's health endpoints.

pub mod base;
pub mod console;
pub mod gating;
pub mod manager;

pub use base::{Channel, ChannelError};
pub use console::ConsoleChannel;
pub use gating::{group_trigger, media_scope, media_temp_dir, Allowlist, DedupRing};
pub use manager::ChannelManager;
