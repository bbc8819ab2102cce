//! Provider error taxonomy and classification.
//!
//! Providers surface failures as [`ProviderError`]; the classifier folds
//! heterogeneous HTTP/transport errors into a small [`FailoverReason`]
//! taxonomy that drives the fallback chain's bounded control flow: retriable
//! reasons continue to the next candidate, fatal reasons abort, and
//! unclassifiable errors abort with the original error wrapped.

use thiserror::Error;

// ─────────────────────────────────────────────
// ProviderError
// ─────────────────────────────────────────────

/// An error from a provider call or its transport.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Non-2xx HTTP response.
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// Connection/timeout/TLS failure before or during the request.
    #[error("network error: {0}")]
    Network(String),

    /// The response body did not parse as a chat completion.
    #[error("malformed response: {0}")]
    Malformed(String),

    /// The caller's context was canceled mid-call.
    #[error("canceled")]
    Canceled,
}

impl ProviderError {
    /// Combined status + message text used for keyword classification.
    fn classification_text(&self) -> String {
        match self {
            ProviderError::Http { status, body } => format!("{} {}", status, body).to_lowercase(),
            ProviderError::Network(msg) => msg.to_lowercase(),
            ProviderError::Malformed(msg) => msg.to_lowercase(),
            ProviderError::Canceled => String::new(),
        }
    }
}

// ─────────────────────────────────────────────
// FailoverReason
// ─────────────────────────────────────────────

/// Why a candidate failed, from the fallback chain's point of view.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FailoverReason {
    RateLimit,
    Transport,
    Auth,
    Format,
    Context,
    Unknown,
}

impl std::fmt::Display for FailoverReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FailoverReason::RateLimit => "rate_limit",
            FailoverReason::Transport => "transport",
            FailoverReason::Auth => "auth",
            FailoverReason::Format => "format",
            FailoverReason::Context => "context",
            FailoverReason::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Classification outcome: a bounded table instead of raised exceptions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Classified {
    /// Continue to the next candidate after marking cooldown.
    Retriable(FailoverReason),
    /// Abort the chain; trying other candidates cannot help (bad key, bad
    /// request shape).
    Fatal(FailoverReason),
    /// Nothing recognizable; abort with the original error wrapped.
    Unclassifiable,
}

/// Keyword sets checked against lowercased error text.
const RATE_LIMIT_MARKERS: &[&str] = &["rate limit", "ratelimit", "too many requests", "quota"];
const CONTEXT_MARKERS: &[&str] = &["context", "token", "length", "invalidparameter"];
const AUTH_MARKERS: &[&str] = &["unauthorized", "api key", "apikey", "authentication", "forbidden"];
const TRANSPORT_MARKERS: &[&str] = &["timeout", "timed out", "connection", "connect", "dns", "tls"];

/// Map a provider error to the failover taxonomy.
pub fn classify(error: &ProviderError) -> Classified {
    let text = error.classification_text();

    match error {
        ProviderError::Canceled => Classified::Unclassifiable,
        ProviderError::Malformed(_) => Classified::Fatal(FailoverReason::Format),
        ProviderError::Network(_) => Classified::Retriable(FailoverReason::Transport),
        ProviderError::Http { status, .. } => match *status {
            429 => Classified::Retriable(FailoverReason::RateLimit),
            401 | 403 => Classified::Fatal(FailoverReason::Auth),
            400 | 413 | 422 => {
                if contains_any(&text, CONTEXT_MARKERS) {
                    Classified::Retriable(FailoverReason::Context)
                } else {
                    Classified::Fatal(FailoverReason::Format)
                }
            }
            500..=599 => Classified::Retriable(FailoverReason::Transport),
            _ => classify_by_text(&text),
        },
    }
}

/// Whether the error text matches the context-window family. Used by the
/// agent loop's retry-with-compression path.
pub fn is_context_error_text(text: &str) -> bool {
    contains_any(&text.to_lowercase(), CONTEXT_MARKERS)
}

fn classify_by_text(text: &str) -> Classified {
    if contains_any(text, RATE_LIMIT_MARKERS) {
        Classified::Retriable(FailoverReason::RateLimit)
    } else if contains_any(text, CONTEXT_MARKERS) {
        Classified::Retriable(FailoverReason::Context)
    } else if contains_any(text, AUTH_MARKERS) {
        Classified::Fatal(FailoverReason::Auth)
    } else if contains_any(text, TRANSPORT_MARKERS) {
        Classified::Retriable(FailoverReason::Transport)
    } else {
        Classified::Unclassifiable
    }
}

fn contains_any(text: &str, markers: &[&str]) -> bool {
    markers.iter().any(|m| text.contains(m))
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit_status() {
        let err = ProviderError::Http {
            status: 429,
            body: "slow down".into(),
        };
        assert_eq!(classify(&err), Classified::Retriable(FailoverReason::RateLimit));
    }

    #[test]
    fn test_auth_statuses_are_fatal() {
        for status in [401, 403] {
            let err = ProviderError::Http {
                status,
                body: "nope".into(),
            };
            assert_eq!(classify(&err), Classified::Fatal(FailoverReason::Auth));
        }
    }

    #[test]
    fn test_bad_request_with_context_marker_is_retriable() {
        let err = ProviderError::Http {
            status: 400,
            body: "maximum context length exceeded".into(),
        };
        assert_eq!(classify(&err), Classified::Retriable(FailoverReason::Context));
    }

    #[test]
    fn test_bad_request_without_marker_is_format_fatal() {
        let err = ProviderError::Http {
            status: 400,
            body: "unknown field 'foo'".into(),
        };
        assert_eq!(classify(&err), Classified::Fatal(FailoverReason::Format));
    }

    #[test]
    fn test_server_errors_are_transport() {
        let err = ProviderError::Http {
            status: 503,
            body: "unavailable".into(),
        };
        assert_eq!(classify(&err), Classified::Retriable(FailoverReason::Transport));
    }

    #[test]
    fn test_network_error_is_transport() {
        let err = ProviderError::Network("connection refused".into());
        assert_eq!(classify(&err), Classified::Retriable(FailoverReason::Transport));
    }

    #[test]
    fn test_malformed_is_format_fatal() {
        let err = ProviderError::Malformed("expected value at line 1".into());
        assert_eq!(classify(&err), Classified::Fatal(FailoverReason::Format));
    }

    #[test]
    fn test_canceled_is_unclassifiable() {
        assert_eq!(classify(&ProviderError::Canceled), Classified::Unclassifiable);
    }

    #[test]
    fn test_odd_status_falls_back_to_text() {
        let err = ProviderError::Http {
            status: 418,
            body: "rate limit exceeded for team".into(),
        };
        assert_eq!(classify(&err), Classified::Retriable(FailoverReason::RateLimit));

        let err = ProviderError::Http {
            status: 418,
            body: "i'm a teapot".into(),
        };
        assert_eq!(classify(&err), Classified::Unclassifiable);
    }

    #[test]
    fn test_is_context_error_text() {
        assert!(is_context_error_text("Context length exceeded"));
        assert!(is_context_error_text("too many tokens"));
        assert!(is_context_error_text("InvalidParameter: messages"));
        assert!(!is_context_error_text("connection reset"));
    }
}
