//! Picoclaw providers — LLM clients, the error classifier, per-provider
//! cooldowns, and the fallback chain.

pub mod candidates;
pub mod cooldown;
pub mod error;
pub mod fallback;
pub mod http_provider;
pub mod registry;
pub mod traits;

pub use candidates::{resolve_candidates, ProviderCandidate};
pub use cooldown::CooldownTracker;
pub use error::{classify, is_context_error_text, Classified, FailoverReason, ProviderError};
pub use fallback::{Attempt, AttemptOutcome, FallbackChain, FallbackError};
pub use http_provider::HttpProvider;
pub use registry::{ProviderLookup, ProviderRegistry};
pub use traits::{ChatOptions, LlmProvider};
