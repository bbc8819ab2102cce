//! Cooldown tracker — per-provider health with exponential backoff.
//!
//! A failing provider is put on cooldown for `base(reason) * 2^streak`
//! (streak capped at 6, total capped at one hour). Base durations rise with
//! severity: transport < rate-limit < context < auth. A success clears the
//! state entirely.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::error::FailoverReason;

/// Maximum exponent applied to the base duration.
const MAX_STREAK_EXPONENT: u32 = 6;

/// Hard cap on any single cooldown window.
const MAX_COOLDOWN: Duration = Duration::from_secs(3600);

/// Per-provider cooldown state.
#[derive(Clone, Debug)]
pub struct CooldownState {
    /// The provider is unavailable until this instant.
    pub good_until: DateTime<Utc>,
    /// Consecutive failures since the last success.
    pub failure_streak: u32,
    /// The reason behind the most recent failure.
    pub last_reason: FailoverReason,
}

/// Tracks provider health. All methods are thread-safe.
pub struct CooldownTracker {
    states: Mutex<HashMap<String, CooldownState>>,
}

impl CooldownTracker {
    pub fn new() -> Self {
        Self {
            states: Mutex::new(HashMap::new()),
        }
    }

    /// Base cooldown for a failure reason.
    fn base_duration(reason: FailoverReason) -> Duration {
        match reason {
            FailoverReason::Transport => Duration::from_secs(10),
            FailoverReason::Unknown => Duration::from_secs(20),
            FailoverReason::RateLimit => Duration::from_secs(60),
            FailoverReason::Context => Duration::from_secs(120),
            FailoverReason::Format => Duration::from_secs(120),
            FailoverReason::Auth => Duration::from_secs(300),
        }
    }

    /// Whether a provider is currently usable.
    pub fn is_available(&self, provider: &str) -> bool {
        self.cooldown_remaining(provider).is_none()
    }

    /// Time left on a provider's cooldown, if any.
    pub fn cooldown_remaining(&self, provider: &str) -> Option<Duration> {
        let states = self.states.lock().unwrap();
        let state = states.get(provider)?;
        let remaining = state.good_until - Utc::now();
        remaining.to_std().ok().filter(|d| !d.is_zero())
    }

    /// Clear a provider's failure state.
    pub fn mark_success(&self, provider: &str) {
        let mut states = self.states.lock().unwrap();
        if states.remove(provider).is_some() {
            debug!(provider = %provider, "cooldown cleared");
        }
    }

    /// Record a failure and extend the cooldown window exponentially.
    pub fn mark_failure(&self, provider: &str, reason: FailoverReason) {
        let mut states = self.states.lock().unwrap();
        let streak = states.get(provider).map(|s| s.failure_streak + 1).unwrap_or(1);

        let exponent = (streak - 1).min(MAX_STREAK_EXPONENT);
        let base = Self::base_duration(reason);
        let cooldown = base
            .checked_mul(1 << exponent)
            .unwrap_or(MAX_COOLDOWN)
            .min(MAX_COOLDOWN);

        let good_until =
            Utc::now() + chrono::Duration::from_std(cooldown).unwrap_or(chrono::Duration::zero());

        debug!(
            provider = %provider,
            reason = %reason,
            streak = streak,
            cooldown_s = cooldown.as_secs(),
            "provider cooldown"
        );

        states.insert(
            provider.to_string(),
            CooldownState {
                good_until,
                failure_streak: streak,
                last_reason: reason,
            },
        );
    }

    /// Snapshot of a provider's state, if it has one.
    pub fn state(&self, provider: &str) -> Option<CooldownState> {
        self.states.lock().unwrap().get(provider).cloned()
    }
}

impl Default for CooldownTracker {
    fn default() -> Self {
        Self::new()
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
