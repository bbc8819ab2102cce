//! Skills tool — discovery and installation of skill packs.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::base::{optional_string, require_string, Tool, ToolResult};
use crate::skills::{slugify, SkillsLoader};

pub struct SkillsTool {
    loader: Arc<SkillsLoader>,
    client: reqwest::Client,
}

impl SkillsTool {
    pub fn new(loader: Arc<SkillsLoader>) -> Self {
        Self {
            loader,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Tool for SkillsTool {
    fn name(&self) -> &str {
        "skills"
    }

    fn description(&self) -> &str {
        "Manage skills. Actions: list, read (slug), install (url + optional slug), uninstall (slug)."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "action": { "type": "string", "enum": ["list", "read", "install", "uninstall"] },
                "slug": { "type": "string", "description": "Skill identifier" },
                "url": { "type": "string", "description": "SKILL.md URL (for install)" }
            },
            "required": ["action"]
        })
    }

    async fn execute(&self, params: HashMap<String, Value>) -> ToolResult {
        let action = match require_string(&params, "action") {
            Ok(a) => a,
            Err(e) => return ToolResult::error(e),
        };

        match action.as_str() {
            "list" => {
                let skills = self.loader.list();
                if skills.is_empty() {
                    return ToolResult::ok("No skills installed.");
                }
                let mut out = String::new();
                for skill in skills {
                    out.push_str(&format!("{} — {}: {}\n", skill.slug, skill.name, skill.description));
                }
                ToolResult::ok(out)
            }
            "read" => {
                let slug = match require_string(&params, "slug") {
                    Ok(s) => s,
                    Err(e) => return ToolResult::error(e),
                };
                match self.loader.load(&slug) {
                    Some(body) => ToolResult::ok(body),
                    None => ToolResult::error(format!("No skill '{slug}'")),
                }
            }
            "install" => {
                let url = match require_string(&params, "url") {
                    Ok(u) => u,
                    Err(e) => return ToolResult::error(e),
                };
                if !url.starts_with("http://") && !url.starts_with("https://") {
                    return ToolResult::error("install URL must be http(s)");
                }
                let body = match self.fetch(&url).await {
                    Ok(b) => b,
                    Err(e) => return ToolResult::error(e),
                };
                let slug = optional_string(&params, "slug")
                    .map(|s| slugify(&s))
                    .filter(|s| !s.is_empty())
                    .unwrap_or_else(|| slug_from_url(&url));

                match self.loader.install(&slug, &body, &url) {
                    Ok(()) => ToolResult::ok(format!("Installed skill '{slug}'")),
                    Err(e) => ToolResult::error(format!("Install failed: {e}")),
                }
            }
            "uninstall" => {
                let slug = match require_string(&params, "slug") {
                    Ok(s) => s,
                    Err(e) => return ToolResult::error(e),
                };
                if self.loader.uninstall(&slug) {
                    ToolResult::ok(format!("Removed skill '{slug}'"))
                } else {
                    ToolResult::error(format!("No skill '{slug}'"))
                }
            }
            other => ToolResult::error(format!("Unknown skills action: {other}")),
        }
    }
}

impl SkillsTool {
    async fn fetch(&self, url: &str) -> Result<String, String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| format!("Fetch failed: {e}"))?;
        if !response.status().is_success() {
            return Err(format!("Fetch returned {}", response.status()));
        }
        response.text().await.map_err(|e| format!("Failed to read body: {e}"))
    }
}

fn slug_from_url(url: &str) -> String {
    let trimmed = url.trim_end_matches('/');
    let last = trimmed.rsplit('/').next().unwrap_or("skill");
    let stem = last.strip_suffix(".md").unwrap_or(last);
    let slug = slugify(stem);
    if slug.is_empty() || slug == "skill" {
        // Fall back to the parent path segment for generic SKILL.md URLs
        let parent = trimmed.rsplit('/').nth(1).unwrap_or("skill");
        slugify(parent)
    } else {
        slug
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn params(pairs: &[(&str, Value)]) -> HashMap<String, Value> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[tokio::test]
    async fn test_list_empty() {
        let dir = tempdir().unwrap();
        let tool = SkillsTool::new(Arc::new(SkillsLoader::new(dir.path(), Vec::new())));
        let result = tool.execute(params(&[("action", json!("list"))])).await;
        assert_eq!(result.for_llm, "No skills installed.");
    }

    #[tokio::test]
    async fn test_read_installed_skill() {
        let dir = tempdir().unwrap();
        let loader = Arc::new(SkillsLoader::new(dir.path(), Vec::new()));
        loader.install("demo", "# Demo\n\nBody.\n", "local").unwrap();

        let tool = SkillsTool::new(loader);
        let result = tool
            .execute(params(&[("action", json!("read")), ("slug", json!("demo"))]))
            .await;
        assert!(result.for_llm.contains("Body."));
    }

    #[tokio::test]
    async fn test_install_rejects_non_http() {
        let dir = tempdir().unwrap();
        let tool = SkillsTool::new(Arc::new(SkillsLoader::new(dir.path(), Vec::new())));
        let result = tool
            .execute(params(&[
                ("action", json!("install")),
                ("url", json!("file:///etc/passwd")),
            ]))
            .await;
        assert!(result.is_error);
    }

    #[test]
    fn test_slug_from_url() {
        assert_eq!(slug_from_url("https://x.com/skills/deploy.md"), "deploy");
        assert_eq!(slug_from_url("https://x.com/deploy-helper/SKILL.md"), "deploy-helper");
    }
}
