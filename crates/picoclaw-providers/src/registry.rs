//! Provider registry — builds provider instances from the `model_list`
//! config and hands them out by name.
//!
//! Entries sharing a `model_name` form a group; calls rotate through the
//! group's endpoints round-robin. The rotation counter lives on the group
//! (owned by this registry, built per config), not in module-level state.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use picoclaw_core::config::schema::Config;
use picoclaw_core::types::{LlmResponse, Message, ToolDefinition};

use crate::candidates::ProviderCandidate;
use crate::error::ProviderError;
use crate::http_provider::HttpProvider;
use crate::traits::{ChatOptions, LlmProvider};

// ─────────────────────────────────────────────
// Round-robin group
// ─────────────────────────────────────────────

/// A named group of endpoints serving the same logical model.
struct ProviderGroup {
    name: String,
    /// Wire protocol of the entries (used for lookup by protocol).
    protocol: String,
    /// Default model id, from the first entry.
    model_id: String,
    endpoints: Vec<Arc<HttpProvider>>,
    next: AtomicUsize,
}

impl ProviderGroup {
    fn pick(&self) -> &Arc<HttpProvider> {
        let idx = self.next.fetch_add(1, Ordering::Relaxed) % self.endpoints.len();
        &self.endpoints[idx]
    }
}

/// `LlmProvider` facade over a group: each call goes to the next endpoint.
struct GroupProvider {
    group: Arc<ProviderGroup>,
}

#[async_trait]
impl LlmProvider for GroupProvider {
    async fn chat(
        &self,
        messages: &[Message],
        tools: Option<&[ToolDefinition]>,
        model: &str,
        options: &ChatOptions,
    ) -> Result<LlmResponse, ProviderError> {
        self.group.pick().chat(messages, tools, model, options).await
    }

    fn default_model(&self) -> &str {
        &self.group.model_id
    }

    fn display_name(&self) -> &str {
        &self.group.name
    }
}

// ─────────────────────────────────────────────
// Registry
// ─────────────────────────────────────────────

/// Name-based provider lookup, as the agent loop consumes it. Implemented
/// by [`ProviderRegistry`] in production and by mocks in tests.
pub trait ProviderLookup: Send + Sync {
    /// Resolve a provider by group name (or protocol).
    fn get(&self, name: &str) -> Option<Arc<dyn LlmProvider>>;

    /// Resolve a model-list alias to a candidate.
    fn alias_candidate(&self, alias: &str) -> Option<ProviderCandidate>;

    /// Known group names, sorted.
    fn group_names(&self) -> Vec<String>;
}

/// Immutable-after-construction registry of provider groups.
pub struct ProviderRegistry {
    groups: HashMap<String, Arc<ProviderGroup>>,
}

impl ProviderRegistry {
    /// Build the registry from config. Entries that fail to construct are
    /// skipped with a warning.
    pub fn from_config(config: &Config) -> Self {
        let mut grouped: HashMap<String, Vec<(&str, Arc<HttpProvider>)>> = HashMap::new();

        for entry in &config.model_list {
            let name = entry.model_name.to_lowercase();
            match HttpProvider::from_entry(entry) {
                Ok(provider) => {
                    grouped
                        .entry(name)
                        .or_default()
                        .push((entry.protocol(), Arc::new(provider)));
                }
                Err(e) => {
                    warn!(model_name = %entry.model_name, error = %e, "skipping bad model_list entry");
                }
            }
        }

        let mut groups = HashMap::new();
        for (name, endpoints) in grouped {
            let protocol = endpoints[0].0.to_lowercase();
            let model_id = endpoints[0].1.default_model().to_string();
            debug!(group = %name, endpoints = endpoints.len(), "provider group registered");
            groups.insert(
                name.clone(),
                Arc::new(ProviderGroup {
                    name,
                    protocol,
                    model_id,
                    endpoints: endpoints.into_iter().map(|(_, p)| p).collect(),
                    next: AtomicUsize::new(0),
                }),
            );
        }

        ProviderRegistry { groups }
    }

    /// Look up a provider by group name, falling back to protocol match.
    pub fn get(&self, name: &str) -> Option<Arc<dyn LlmProvider>> {
        let name = name.to_lowercase();
        let group = self
            .groups
            .get(&name)
            .or_else(|| self.groups.values().find(|g| g.protocol == name))?;
        Some(Arc::new(GroupProvider {
            group: group.clone(),
        }) as Arc<dyn LlmProvider>)
    }

    /// Resolve a model-list alias to a candidate, for `resolve_candidates`.
    pub fn alias_candidate(&self, alias: &str) -> Option<ProviderCandidate> {
        let group = self.groups.get(&alias.to_lowercase())?;
        Some(ProviderCandidate::new(&group.name, &group.model_id))
    }

    /// Names of all registered groups, sorted.
    pub fn group_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.groups.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Close every underlying provider.
    pub async fn close(&self) {
        for group in self.groups.values() {
            for endpoint in &group.endpoints {
                endpoint.close().await;
            }
        }
    }
}

impl ProviderLookup for ProviderRegistry {
    fn get(&self, name: &str) -> Option<Arc<dyn LlmProvider>> {
        ProviderRegistry::get(self, name)
    }

    fn alias_candidate(&self, alias: &str) -> Option<ProviderCandidate> {
        ProviderRegistry::alias_candidate(self, alias)
    }

    fn group_names(&self) -> Vec<String> {
        ProviderRegistry::group_names(self)
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
