//! Summarization and emergency compression of conversation history.
//!
//! Background summarization triggers once a session grows past 20 messages
//! or ~75% of the agent's context window (chars × 2/5 token estimate). At
//! most one summarization runs per session at a time, gated by a
//! mutex-guarded key set. Force-compression is the LLM-free emergency path
//! used when a provider rejects the context outright.

use std::collections::HashSet;
use std::sync::Mutex;

use picoclaw_core::types::Message;
use picoclaw_providers::{ChatOptions, LlmProvider};
use tracing::warn;

/// History length that always triggers summarization.
pub const SUMMARIZE_AFTER_MESSAGES: usize = 20;

/// Fraction of the context window that triggers summarization.
const WINDOW_FILL_THRESHOLD: f64 = 0.75;

/// Messages kept verbatim for continuity after summarizing.
pub const KEEP_RECENT_MESSAGES: usize = 4;

/// Above this many foldable messages, summarize in two halves and merge.
const SPLIT_THRESHOLD: usize = 10;

/// Options for the summarization calls.
fn summary_options() -> ChatOptions {
    ChatOptions {
        max_tokens: 1024,
        temperature: 0.3,
    }
}

// ─────────────────────────────────────────────
// Token estimation & trigger
// ─────────────────────────────────────────────

/// Crude token estimate: codepoints × 2/5.
pub fn estimate_tokens(messages: &[Message]) -> usize {
    let chars: usize = messages
        .iter()
        .map(|m| m.text_content().map(|s| s.chars().count()).unwrap_or(0))
        .sum();
    chars * 2 / 5
}

fn message_tokens(message: &Message) -> usize {
    message
        .text_content()
        .map(|s| s.chars().count())
        .unwrap_or(0)
        * 2
        / 5
}

/// Whether a session's history warrants background summarization.
pub fn should_summarize(history: &[Message], context_window: u32) -> bool {
    if history.len() > SUMMARIZE_AFTER_MESSAGES {
        return true;
    }
    estimate_tokens(history) as f64 > context_window as f64 * WINDOW_FILL_THRESHOLD
}

// ─────────────────────────────────────────────
// Concurrency gate
// ─────────────────────────────────────────────

/// "At most one summarization per session" gate.
#[derive(Default)]
pub struct SummarizeGate {
    active: Mutex<HashSet<String>>,
}

impl SummarizeGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim a session key. Returns `false` when a summarization for it is
    /// already running.
    pub fn try_begin(&self, key: &str) -> bool {
        self.active.lock().unwrap().insert(key.to_string())
    }

    /// Release a session key.
    pub fn finish(&self, key: &str) {
        self.active.lock().unwrap().remove(key);
    }
}

// ─────────────────────────────────────────────
// Summarization
// ─────────────────────────────────────────────

/// Summarize the foldable prefix of a history (everything except the last
/// [`KEEP_RECENT_MESSAGES`]). Returns the new summary text.
pub async fn summarize_messages(
    provider: &dyn LlmProvider,
    model: &str,
    foldable: &[Message],
    context_window: u32,
) -> anyhow::Result<String> {
    // Drop any single oversized message outright; its bulk is what got us
    // here.
    let half_window = (context_window / 2) as usize;
    let mut omitted = 0usize;
    let kept: Vec<&Message> = foldable
        .iter()
        .filter(|m| {
            if message_tokens(m) > half_window {
                omitted += 1;
                false
            } else {
                true
            }
        })
        .collect();

    let mut summary = if kept.len() > SPLIT_THRESHOLD {
        let mid = kept.len() / 2;
        let first = summarize_chunk(provider, model, &kept[..mid]).await?;
        let second = summarize_chunk(provider, model, &kept[mid..]).await?;
        merge_summaries(provider, model, &first, &second).await
    } else {
        summarize_chunk(provider, model, &kept).await?
    };

    if omitted > 0 {
        summary.push_str(&format!(
            "\n[{} oversized message(s) omitted from the summary]",
            omitted
        ));
    }
    Ok(summary)
}

async fn summarize_chunk(
    provider: &dyn LlmProvider,
    model: &str,
    messages: &[&Message],
) -> anyhow::Result<String> {
    let transcript = render_transcript(messages);
    let request = vec![
        Message::system(
            "Provide a concise summary of the conversation below, preserving core \
             context: decisions made, facts learned, and any open tasks.",
        ),
        Message::user(transcript),
    ];

    let response = provider
        .chat(&request, None, model, &summary_options())
        .await?;
    Ok(response.content.unwrap_or_default())
}

/// Ask the LLM to merge two partial summaries; on failure, concatenate.
async fn merge_summaries(
    provider: &dyn LlmProvider,
    model: &str,
    first: &str,
    second: &str,
) -> String {
    let request = vec![
        Message::system(
            "Merge the two conversation summaries below into one cohesive summary, \
             preserving core context.",
        ),
        Message::user(format!("Summary 1:\n{first}\n\nSummary 2:\n{second}")),
    ];

    match provider.chat(&request, None, model, &summary_options()).await {
        Ok(response) => response
            .content
            .filter(|c| !c.trim().is_empty())
            .unwrap_or_else(|| format!("{first}\n\n{second}")),
        Err(e) => {
            warn!(error = %e, "summary merge failed, concatenating");
            format!("{first}\n\n{second}")
        }
    }
}

fn render_transcript(messages: &[&Message]) -> String {
    let mut out = String::new();
    for message in messages {
        if let Some(text) = message.text_content() {
            if text.is_empty() {
                continue;
            }
            out.push_str(&format!("{}: {}\n", message.role(), text));
        }
    }
    out
}

// ─────────────────────────────────────────────
// Force compression
// ─────────────────────────────────────────────

/// Emergency context shrink used on context-window errors. No LLM call:
/// the system prompt is kept (with a note appended), the oldest half of the
/// conversation is dropped, and the second half survives. Returns the
/// compressed list and the number of dropped messages.
pub fn force_compress(messages: &[Message]) -> (Vec<Message>, usize) {
    if messages.is_empty() {
        return (Vec::new(), 0);
    }

    let (system, conversation) = match &messages[0] {
        Message::System { content } => (Some(content.clone()), &messages[1..]),
        _ => (None, messages),
    };

    if conversation.len() <= 1 {
        return (messages.to_vec(), 0);
    }

    let keep_from = conversation.len() / 2;
    let mut kept: Vec<Message> = conversation[keep_from..].to_vec();

    // A leading tool result without its assistant tool-call message would
    // be rejected by providers; trim such orphans.
    while matches!(kept.first(), Some(Message::Tool { .. })) {
        kept.remove(0);
    }

    let dropped = conversation.len() - kept.len();

    let mut out = Vec::with_capacity(kept.len() + 1);
    if let Some(system) = system {
        out.push(Message::system(format!(
            "{system}\n\n[System Note: Emergency compression dropped {dropped} oldest \
             messages due to context limit]"
        )));
    }
    out.extend(kept);
    (out, dropped)
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use picoclaw_core::types::{LlmResponse, ToolDefinition};
    use picoclaw_providers::ProviderError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingProvider {
        calls: AtomicUsize,
        fail: bool,
    }

    impl CountingProvider {
        fn new(fail: bool) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail,
            }
        }
    }

    #[async_trait]
    impl LlmProvider for CountingProvider {
        async fn chat(
            &self,
            messages: &[Message],
            _tools: Option<&[ToolDefinition]>,
            _model: &str,
            options: &ChatOptions,
        ) -> Result<LlmResponse, ProviderError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            assert_eq!(options.max_tokens, 1024);
            assert!((options.temperature - 0.3).abs() < f64::EPSILON);
            if self.fail && messages[0].text_content().unwrap().contains("Merge") {
                return Err(ProviderError::Network("merge failed".into()));
            }
            Ok(LlmResponse {
                content: Some(format!("summary-{n}")),
                ..Default::default()
            })
        }

        fn default_model(&self) -> &str {
            "mock"
        }

        fn display_name(&self) -> &str {
            "mock"
        }
    }

    fn user_messages(n: usize) -> Vec<Message> {
        (0..n).map(|i| Message::user(format!("message {i}"))).collect()
    }

    #[test]
    fn test_estimate_tokens() {
        let messages = vec![Message::user("aaaaa"), Message::assistant("bbbbb")];
        // 10 chars * 2 / 5 = 4
        assert_eq!(estimate_tokens(&messages), 4);
    }

    #[test]
    fn test_should_summarize_by_length() {
        assert!(!should_summarize(&user_messages(20), 1_000_000));
        assert!(should_summarize(&user_messages(21), 1_000_000));
    }

    #[test]
    fn test_should_summarize_by_tokens() {
        let big = vec![Message::user("x".repeat(1000))];
        // ~400 estimated tokens vs window 100 → well past 75%
        assert!(should_summarize(&big, 100));
        assert!(!should_summarize(&big, 10_000));
    }

    #[test]
    fn test_gate_exclusive_per_key() {
        let gate = SummarizeGate::new();
        assert!(gate.try_begin("agent:main:main"));
        assert!(!gate.try_begin("agent:main:main"));
        assert!(gate.try_begin("agent:main:other"));

        gate.finish("agent:main:main");
        assert!(gate.try_begin("agent:main:main"));
    }

    #[tokio::test]
    async fn test_small_history_single_call() {
        let provider = CountingProvider::new(false);
        let summary = summarize_messages(&provider, "m", &user_messages(5), 100_000)
            .await
            .unwrap();
        assert_eq!(summary, "summary-0");
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_large_history_split_and_merge() {
        let provider = CountingProvider::new(false);
        let summary = summarize_messages(&provider, "m", &user_messages(12), 100_000)
            .await
            .unwrap();
        // Two chunk calls + one merge call
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
        assert_eq!(summary, "summary-2");
    }

    #[tokio::test]
    async fn test_merge_failure_concatenates() {
        let provider = CountingProvider::new(true);
        let summary = summarize_messages(&provider, "m", &user_messages(12), 100_000)
            .await
            .unwrap();
        assert!(summary.contains("summary-0"));
        assert!(summary.contains("summary-1"));
    }

    #[tokio::test]
    async fn test_oversized_message_dropped_with_note() {
        let provider = CountingProvider::new(false);
        let mut messages = user_messages(3);
        // ~40k estimated tokens against a 1k window
        messages.push(Message::user("y".repeat(100_000)));

        let summary = summarize_messages(&provider, "m", &messages, 1000)
            .await
            .unwrap();
        assert!(summary.contains("oversized message(s) omitted"));
    }

    #[test]
    fn test_force_compress_drops_oldest_half() {
        let mut messages = vec![Message::system("prompt")];
        messages.extend(user_messages(8));

        let (compressed, dropped) = force_compress(&messages);

        assert_eq!(dropped, 4);
        assert_eq!(compressed.len(), 5); // system + 4 kept
        assert_eq!(compressed[0].role(), "system");
        assert!(compressed[0]
            .text_content()
            .unwrap()
            .contains("[System Note: Emergency compression dropped 4 oldest messages due to context limit]"));
        // Last message survives
        assert_eq!(compressed.last().unwrap().text_content(), Some("message 7"));
    }

    #[test]
    fn test_force_compress_no_adjacent_system() {
        let mut messages = vec![Message::system("prompt")];
        messages.extend(user_messages(6));
        let (compressed, _) = force_compress(&messages);

        for pair in compressed.windows(2) {
            assert!(!(pair[0].role() == "system" && pair[1].role() == "system"));
        }
    }

    #[test]
    fn test_force_compress_trims_orphan_tool_results() {
        let messages = vec![
            Message::system("prompt"),
            Message::user("q1"),
            Message::assistant_tool_calls(
                None,
                vec![picoclaw_core::types::ToolCall::new("t1", "echo", "{}")],
            ),
            Message::tool_result("t1", "out"),
            Message::user("q2"),
        ];

        let (compressed, _) = force_compress(&messages);
        // The kept half would start at the tool result; the orphan is
        // trimmed so the conversation starts on a sane role.
        assert!(!matches!(compressed[1], Message::Tool { .. }));
    }

    #[test]
    fn test_force_compress_tiny_history_untouched() {
        let messages = vec![Message::system("p"), Message::user("only")];
        let (compressed, dropped) = force_compress(&messages);
        assert_eq!(dropped, 0);
        assert_eq!(compressed.len(), 2);
    }
}
