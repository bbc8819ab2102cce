//! Candidate resolution — turns an agent's primary model + fallback refs
//! into a deduplicated ordered list of `(provider, model)` pairs.
//!
//! Each raw ref is one of:
//! - a `provider/model` string,
//! - a model-list alias resolved through the lookup,
//! - a bare model, to which the default provider is applied.

use std::collections::HashSet;

/// A `(provider, model)` pair tried by the fallback chain.
#[derive(Clone, Debug, Eq)]
pub struct ProviderCandidate {
    pub provider: String,
    pub model: String,
}

impl ProviderCandidate {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
        }
    }

    /// Equality/dedup key: `lowercase(provider) + ":" + trim(model)`.
    pub fn key(&self) -> String {
        format!("{}:{}", self.provider.to_lowercase(), self.model.trim())
    }
}

impl PartialEq for ProviderCandidate {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl std::hash::Hash for ProviderCandidate {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

impl std::fmt::Display for ProviderCandidate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.provider, self.model)
    }
}

/// Alias lookup over the model-list config: alias → candidate.
pub type AliasLookup<'a> = &'a dyn Fn(&str) -> Option<ProviderCandidate>;

/// Resolve a primary ref plus fallback refs into an ordered, deduplicated
/// candidate list.
pub fn resolve_candidates(
    primary: &str,
    fallbacks: &[String],
    default_provider: &str,
    lookup: Option<AliasLookup<'_>>,
) -> Vec<ProviderCandidate> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();

    let refs = std::iter::once(primary).chain(fallbacks.iter().map(|s| s.as_str()));
    for raw in refs {
        let raw = raw.trim();
        if raw.is_empty() {
            continue;
        }
        let candidate = resolve_one(raw, default_provider, lookup);
        if seen.insert(candidate.key()) {
            out.push(candidate);
        }
    }

    out
}

fn resolve_one(
    raw: &str,
    default_provider: &str,
    lookup: Option<AliasLookup<'_>>,
) -> ProviderCandidate {
    // Alias first: a model-list name shadows the slash syntax.
    if let Some(lookup) = lookup {
        if let Some(candidate) = lookup(raw) {
            return candidate;
        }
    }

    if let Some((provider, model)) = raw.split_once('/') {
        if !provider.is_empty() && !model.is_empty() {
            return ProviderCandidate::new(provider, model);
        }
    }

    ProviderCandidate::new(default_provider, raw)
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
