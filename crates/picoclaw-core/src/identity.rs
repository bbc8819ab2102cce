//! Canonical sender identity — `platform:id` normalization.
//!
//! Every transport reports senders differently; the canonical form
//! `lowercase(platform) + ":" + trim(platform_id)` gives the router and the
//! identity-link table one stable spelling per person per platform.

use serde::{Deserialize, Serialize};

/// Who sent an inbound message, normalized across transports.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SenderInfo {
    pub platform: String,
    pub platform_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    pub canonical_id: String,
}

impl SenderInfo {
    /// Build sender info, deriving the canonical id. Returns `None` when
    /// either component trims to empty.
    pub fn new(platform: &str, platform_id: &str) -> Option<Self> {
        let canonical = build_canonical_id(platform, platform_id)?;
        Some(SenderInfo {
            platform: platform.trim().to_lowercase(),
            platform_id: platform_id.trim().to_string(),
            username: None,
            display_name: None,
            canonical_id: canonical,
        })
    }
}

/// Build a canonical `platform:id` identifier.
///
/// The platform segment is lowercased and trimmed; the id is trimmed but
/// keeps its case (platform ids can be case-sensitive).
pub fn build_canonical_id(platform: &str, platform_id: &str) -> Option<String> {
    let platform = platform.trim().to_lowercase();
    let id = platform_id.trim();
    if platform.is_empty() || id.is_empty() {
        return None;
    }
    Some(format!("{}:{}", platform, id))
}

/// Split a canonical id back into `(platform, id)`.
///
/// Returns `None` for strings without a colon or with an empty segment.
pub fn parse_canonical_id(canonical: &str) -> Option<(String, String)> {
    let (platform, id) = canonical.split_once(':')?;
    if platform.is_empty() || id.is_empty() {
        return None;
    }
    Some((platform.to_lowercase(), id.to_string()))
}
