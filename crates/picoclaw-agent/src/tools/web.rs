//! Web tools — Brave search and page fetch.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::base::{optional_i64, require_string, Tool, ToolResult};

/// Fetched pages are truncated to this many characters.
const MAX_FETCH_CHARS: usize = 20_000;

// ─────────────────────────────────────────────
// WebSearchTool
// ─────────────────────────────────────────────

pub struct WebSearchTool {
    api_key: Option<String>,
    max_results: u32,
    client: reqwest::Client,
}

impl WebSearchTool {
    pub fn new(api_key: Option<String>, max_results: u32) -> Self {
        Self {
            api_key: api_key.filter(|k| !k.is_empty()),
            max_results,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web and return titles, URLs, and snippets."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "Search query" },
                "count": { "type": "integer", "description": "Number of results (optional)" }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, params: HashMap<String, Value>) -> ToolResult {
        let query = match require_string(&params, "query") {
            Ok(q) => q,
            Err(e) => return ToolResult::error(e),
        };
        let api_key = match &self.api_key {
            Some(k) => k,
            None => {
                return ToolResult::error(
                    "Web search is not configured (missing tools.web.search.api_key)",
                )
            }
        };
        let count = optional_i64(&params, "count")
            .map(|n| n.clamp(1, 20) as u32)
            .unwrap_or(self.max_results);

        let response = self
            .client
            .get("https://api.search.brave.com/res/v1/web/search")
            .header("X-Subscription-Token", api_key)
            .header("Accept", "application/json")
            .query(&[("q", query.as_str()), ("count", &count.to_string())])
            .send()
            .await;

        let response = match response {
            Ok(r) => r,
            Err(e) => return ToolResult::error(format!("Search request failed: {e}")),
        };
        if !response.status().is_success() {
            return ToolResult::error(format!("Search API returned {}", response.status()));
        }

        let body: Value = match response.json().await {
            Ok(b) => b,
            Err(e) => return ToolResult::error(format!("Failed to parse search response: {e}")),
        };

        let results = body["web"]["results"].as_array().cloned().unwrap_or_default();
        if results.is_empty() {
            return ToolResult::ok(format!("No results for: {query}"));
        }

        let mut out = String::new();
        for (i, r) in results.iter().take(count as usize).enumerate() {
            let title = r["title"].as_str().unwrap_or("(untitled)");
            let url = r["url"].as_str().unwrap_or("");
            let snippet = r["description"].as_str().unwrap_or("");
            out.push_str(&format!("{}. {title}\n   {url}\n   {snippet}\n", i + 1));
        }
        ToolResult::ok(out)
    }
}

// ─────────────────────────────────────────────
// WebFetchTool
// ─────────────────────────────────────────────

pub struct WebFetchTool {
    client: reqwest::Client,
}

impl WebFetchTool {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
        }
    }
}

impl Default for WebFetchTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for WebFetchTool {
    fn name(&self) -> &str {
        "web_fetch"
    }

    fn description(&self) -> &str {
        "Fetch a URL and return its text content (HTML tags stripped)."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "url": { "type": "string", "description": "URL to fetch" }
            },
            "required": ["url"]
        })
    }

    async fn execute(&self, params: HashMap<String, Value>) -> ToolResult {
        let url = match require_string(&params, "url") {
            Ok(u) => u,
            Err(e) => return ToolResult::error(e),
        };
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return ToolResult::error("URL must start with http:// or https://");
        }

        let response = match self.client.get(&url).send().await {
            Ok(r) => r,
            Err(e) => return ToolResult::error(format!("Fetch failed: {e}")),
        };
        if !response.status().is_success() {
            return ToolResult::error(format!("Fetch returned {}", response.status()));
        }

        let body = match response.text().await {
            Ok(b) => b,
            Err(e) => return ToolResult::error(format!("Failed to read body: {e}")),
        };

        let mut text = strip_html(&body);
        if text.chars().count() > MAX_FETCH_CHARS {
            text = text.chars().take(MAX_FETCH_CHARS).collect();
            text.push_str("\n... (truncated)");
        }
        ToolResult::ok(text)
    }
}

/// Case-insensitive ASCII prefix check at a byte offset.
fn matches_at(html: &str, i: usize, pattern: &str) -> bool {
    html.len() >= i + pattern.len()
        && html.as_bytes()[i..i + pattern.len()].eq_ignore_ascii_case(pattern.as_bytes())
}

/// Crude tag stripper: drops script/style blocks, removes tags, collapses
/// whitespace.
fn strip_html(html: &str) -> String {
    let mut text = String::with_capacity(html.len() / 2);
    let mut chars = html.char_indices();
    let mut skip_until: Option<&str> = None;
    let mut in_tag = false;

    while let Some((i, c)) = chars.next() {
        if let Some(end) = skip_until {
            if matches_at(html, i, end) {
                for _ in 0..end.chars().count() - 1 {
                    chars.next();
                }
                skip_until = None;
            }
            continue;
        }
        if c == '<' {
            if matches_at(html, i, "<script") {
                skip_until = Some("</script>");
                continue;
            }
            if matches_at(html, i, "<style") {
                skip_until = Some("</style>");
                continue;
            }
            in_tag = true;
            continue;
        }
        if c == '>' && in_tag {
            in_tag = false;
            text.push(' ');
            continue;
        }
        if !in_tag {
            text.push(c);
        }
    }

    // Collapse runs of whitespace
    let mut out = String::with_capacity(text.len());
    let mut last_ws = false;
    for c in text.chars() {
        if c.is_whitespace() {
            if !last_ws {
                out.push(' ');
            }
            last_ws = true;
        } else {
            out.push(c);
            last_ws = false;
        }
    }
    out.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_html_tags() {
        assert_eq!(strip_html("<p>Hello <b>world</b></p>"), "Hello world");
    }

    #[test]
    fn test_strip_html_script_blocks() {
        let html = "<p>before</p><script>var x = 1;</script><p>after</p>";
        let text = strip_html(html);
        assert!(text.contains("before"));
        assert!(text.contains("after"));
        assert!(!text.contains("var x"));
    }

    #[test]
    fn test_strip_html_collapses_whitespace() {
        assert_eq!(strip_html("a\n\n   b"), "a b");
    }

    #[tokio::test]
    async fn test_search_without_key_errors() {
        let tool = WebSearchTool::new(None, 5);
        let mut params = HashMap::new();
        params.insert("query".to_string(), json!("rust"));
        let result = tool.execute(params).await;
        assert!(result.is_error);
        assert!(result.for_llm.contains("not configured"));
    }

    #[tokio::test]
    async fn test_fetch_rejects_non_http() {
        let tool = WebFetchTool::new();
        let mut params = HashMap::new();
        params.insert("url".to_string(), json!("file:///etc/passwd"));
        let result = tool.execute(params).await;
        assert!(result.is_error);
    }

    #[test]
    fn test_definitions() {
        assert_eq!(WebSearchTool::new(None, 5).name(), "web_search");
        assert_eq!(WebFetchTool::new().name(), "web_fetch");
    }
}
