//! Fallback chain — ordered candidate iteration with classification-based
//! retry/abort and cooldown integration.
//!
//! Control flow is a bounded table over the classifier's sum type: retriable
//! failures mark cooldown and continue, fatal failures abort immediately
//! (a bad key stays bad — no cooldown), unclassifiable errors abort with the
//! original error wrapped, and cancellation aborts without touching state.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, warn};

use crate::candidates::ProviderCandidate;
use crate::cooldown::CooldownTracker;
use crate::error::{classify, Classified, FailoverReason, ProviderError};

// ─────────────────────────────────────────────
// Attempts
// ─────────────────────────────────────────────

/// What happened to one candidate during an `execute` call.
#[derive(Clone, Debug)]
pub struct Attempt {
    pub candidate: ProviderCandidate,
    pub outcome: AttemptOutcome,
    pub duration: Duration,
}

#[derive(Clone, Debug)]
pub enum AttemptOutcome {
    /// Skipped without a call because the provider was cooling down.
    Skipped { remaining: Duration },
    /// Called and failed with a retriable error.
    Failed {
        reason: FailoverReason,
        message: String,
    },
}

impl std::fmt::Display for Attempt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.outcome {
            AttemptOutcome::Skipped { remaining } => write!(
                f,
                "{}: skipped (cooldown, {}s remaining)",
                self.candidate,
                remaining.as_secs()
            ),
            AttemptOutcome::Failed { reason, message } => write!(
                f,
                "{}: {} after {}ms — {}",
                self.candidate,
                reason,
                self.duration.as_millis(),
                message
            ),
        }
    }
}

// ─────────────────────────────────────────────
// FallbackError
// ─────────────────────────────────────────────

/// Terminal outcome of a chain execution that produced no response.
#[derive(Debug, Error)]
pub enum FallbackError {
    /// The caller's context was canceled.
    #[error("provider call canceled")]
    Canceled { attempts: Vec<Attempt> },

    /// A candidate failed in a way retries cannot fix.
    #[error("provider failed ({reason}): {message}")]
    Fatal {
        reason: FailoverReason,
        message: String,
        attempts: Vec<Attempt>,
    },

    /// The error did not match any known taxonomy entry.
    #[error("unclassifiable provider error: {message}")]
    Unclassifiable {
        message: String,
        attempts: Vec<Attempt>,
    },

    /// Every candidate was skipped or failed retriably.
    #[error("{}", format_exhausted(.attempts))]
    Exhausted { attempts: Vec<Attempt> },
}

impl FallbackError {
    /// Attempts recorded before the chain gave up.
    pub fn attempts(&self) -> &[Attempt] {
        match self {
            FallbackError::Canceled { attempts }
            | FallbackError::Fatal { attempts, .. }
            | FallbackError::Unclassifiable { attempts, .. }
            | FallbackError::Exhausted { attempts } => attempts,
        }
    }

    /// Whether the failure belongs to the context-window family (drives the
    /// agent loop's compression retry).
    pub fn is_context_error(&self) -> bool {
        match self {
            FallbackError::Fatal { reason, .. } => *reason == FailoverReason::Context,
            FallbackError::Exhausted { attempts } => attempts.iter().any(|a| {
                matches!(
                    a.outcome,
                    AttemptOutcome::Failed {
                        reason: FailoverReason::Context,
                        ..
                    }
                )
            }),
            _ => false,
        }
    }
}

fn format_exhausted(attempts: &[Attempt]) -> String {
    let mut out = format!("all {} provider candidate(s) failed:", attempts.len());
    for attempt in attempts {
        out.push_str("\n  - ");
        out.push_str(&attempt.to_string());
    }
    out
}

// ─────────────────────────────────────────────
// FallbackChain
// ─────────────────────────────────────────────

/// Iterates candidates in order, delegating each call to `run` and folding
/// outcomes through the classifier and the cooldown tracker.
pub struct FallbackChain {
    cooldowns: Arc<CooldownTracker>,
}

impl FallbackChain {
    pub fn new(cooldowns: Arc<CooldownTracker>) -> Self {
        Self { cooldowns }
    }

    /// The shared cooldown tracker.
    pub fn cooldowns(&self) -> &Arc<CooldownTracker> {
        &self.cooldowns
    }

    /// Try each candidate until one succeeds.
    pub async fn execute<T, F, Fut>(
        &self,
        candidates: &[ProviderCandidate],
        mut run: F,
    ) -> Result<T, FallbackError>
    where
        F: FnMut(String, String) -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        self.execute_inner(candidates, &mut run, true).await
    }

    /// Variant for image-style requests: quota surfaces are independent of
    /// chat, so cooldowns are neither consulted nor updated, and
    /// dimension/size complaints are treated as non-retriable format errors.
    pub async fn execute_uncooled<T, F, Fut>(
        &self,
        candidates: &[ProviderCandidate],
        mut run: F,
    ) -> Result<T, FallbackError>
    where
        F: FnMut(String, String) -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        self.execute_inner(candidates, &mut run, false).await
    }

    async fn execute_inner<T, F, Fut>(
        &self,
        candidates: &[ProviderCandidate],
        run: &mut F,
        use_cooldowns: bool,
    ) -> Result<T, FallbackError>
    where
        F: FnMut(String, String) -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let mut attempts: Vec<Attempt> = Vec::new();

        for candidate in candidates {
            if use_cooldowns {
                if let Some(remaining) = self.cooldowns.cooldown_remaining(&candidate.provider) {
                    debug!(candidate = %candidate, remaining_s = remaining.as_secs(), "skipping cooling candidate");
                    attempts.push(Attempt {
                        candidate: candidate.clone(),
                        outcome: AttemptOutcome::Skipped { remaining },
                        duration: Duration::ZERO,
                    });
                    continue;
                }
            }

            let started = Instant::now();
            let result = run(candidate.provider.clone(), candidate.model.clone()).await;
            let duration = started.elapsed();

            let error = match result {
                Ok(response) => {
                    if use_cooldowns {
                        self.cooldowns.mark_success(&candidate.provider);
                    }
                    debug!(candidate = %candidate, ms = duration.as_millis() as u64, "provider call succeeded");
                    return Ok(response);
                }
                Err(e) => e,
            };

            if matches!(error, ProviderError::Canceled) {
                return Err(FallbackError::Canceled { attempts });
            }

            let classified = if !use_cooldowns && is_dimension_error(&error) {
                Classified::Fatal(FailoverReason::Format)
            } else {
                classify(&error)
            };

            match classified {
                Classified::Retriable(reason) => {
                    warn!(candidate = %candidate, reason = %reason, error = %error, "candidate failed, trying next");
                    if use_cooldowns {
                        self.cooldowns.mark_failure(&candidate.provider, reason);
                    }
                    attempts.push(Attempt {
                        candidate: candidate.clone(),
                        outcome: AttemptOutcome::Failed {
                            reason,
                            message: error.to_string(),
                        },
                        duration,
                    });
                }
                Classified::Fatal(reason) => {
                    // No cooldown: retrying later cannot fix a bad key or a
                    // malformed request.
                    return Err(FallbackError::Fatal {
                        reason,
                        message: error.to_string(),
                        attempts,
                    });
                }
                Classified::Unclassifiable => {
                    return Err(FallbackError::Unclassifiable {
                        message: error.to_string(),
                        attempts,
                    });
                }
            }
        }

        Err(FallbackError::Exhausted { attempts })
    }
}

fn is_dimension_error(error: &ProviderError) -> bool {
    let text = error.to_string().to_lowercase();
    text.contains("dimension") || text.contains("image size") || text.contains("resolution")
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
