//! Skills — discoverable instruction packs under `skills/<slug>/SKILL.md`.
//!
//! The system prompt carries a summary inventory; the agent reads a skill's
//! full body on demand with `read_file`. Installed skills carry a
//! `.skill-origin.json` manifest recording where they came from.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Manifest written next to an installed skill.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SkillOrigin {
    pub source: String,
    pub installed_at: String,
}

/// A discovered skill.
#[derive(Clone, Debug, PartialEq)]
pub struct SkillInfo {
    pub slug: String,
    pub name: String,
    pub description: String,
    pub origin: Option<String>,
}

pub struct SkillsLoader {
    skills_dir: PathBuf,
    /// Slugs this agent may use; empty = all.
    filter: Vec<String>,
}

impl SkillsLoader {
    pub fn new(workspace: &Path, filter: Vec<String>) -> Self {
        Self {
            skills_dir: workspace.join("skills"),
            filter,
        }
    }

    pub fn skills_dir(&self) -> &Path {
        &self.skills_dir
    }

    fn allowed(&self, slug: &str) -> bool {
        self.filter.is_empty() || self.filter.iter().any(|f| f == slug)
    }

    /// Discover installed skills, filtered by the agent's skill list,
    /// sorted by slug.
    pub fn list(&self) -> Vec<SkillInfo> {
        let entries = match std::fs::read_dir(&self.skills_dir) {
            Ok(e) => e,
            Err(_) => return Vec::new(),
        };

        let mut skills = Vec::new();
        for entry in entries.flatten() {
            let dir = entry.path();
            if !dir.is_dir() {
                continue;
            }
            let slug = match dir.file_name().and_then(|n| n.to_str()) {
                Some(s) => s.to_string(),
                None => continue,
            };
            if !self.allowed(&slug) {
                continue;
            }
            let skill_md = dir.join("SKILL.md");
            let content = match std::fs::read_to_string(&skill_md) {
                Ok(c) => c,
                Err(_) => continue,
            };

            let (name, description) = parse_skill_header(&content, &slug);
            let origin = std::fs::read_to_string(dir.join(".skill-origin.json"))
                .ok()
                .and_then(|raw| serde_json::from_str::<SkillOrigin>(&raw).ok())
                .map(|o| o.source);

            skills.push(SkillInfo {
                slug,
                name,
                description,
                origin,
            });
        }

        skills.sort_by(|a, b| a.slug.cmp(&b.slug));
        skills
    }

    /// Full body of one skill.
    pub fn load(&self, slug: &str) -> Option<String> {
        if !self.allowed(slug) {
            return None;
        }
        std::fs::read_to_string(self.skills_dir.join(slug).join("SKILL.md")).ok()
    }

    /// The inventory block injected into the system prompt. Empty string
    /// when no skills are installed.
    pub fn build_summary(&self) -> String {
        let skills = self.list();
        if skills.is_empty() {
            return String::new();
        }

        let mut out = String::from("<skills>\n");
        for skill in &skills {
            out.push_str(&format!(
                "  <skill slug=\"{}\" path=\"{}\">{} — {}</skill>\n",
                skill.slug,
                self.skills_dir.join(&skill.slug).join("SKILL.md").display(),
                skill.name,
                skill.description
            ));
        }
        out.push_str("</skills>");
        out
    }

    /// Install a skill body under `skills/<slug>/` with its origin
    /// manifest.
    pub fn install(&self, slug: &str, content: &str, source: &str) -> anyhow::Result<()> {
        let slug = slugify(slug);
        if slug.is_empty() {
            anyhow::bail!("invalid skill slug");
        }
        let dir = self.skills_dir.join(&slug);
        std::fs::create_dir_all(&dir)?;
        std::fs::write(dir.join("SKILL.md"), content)?;

        let origin = SkillOrigin {
            source: source.to_string(),
            installed_at: chrono::Utc::now().to_rfc3339(),
        };
        std::fs::write(
            dir.join(".skill-origin.json"),
            serde_json::to_string_pretty(&origin)?,
        )?;
        Ok(())
    }

    /// Remove an installed skill.
    pub fn uninstall(&self, slug: &str) -> bool {
        let dir = self.skills_dir.join(slug);
        if !dir.is_dir() {
            return false;
        }
        if let Err(e) = std::fs::remove_dir_all(&dir) {
            warn!(slug = %slug, error = %e, "failed to remove skill");
            return false;
        }
        true
    }
}

/// Name from the first `# ` heading, description from the first plain
/// paragraph line.
fn parse_skill_header(content: &str, slug: &str) -> (String, String) {
    let mut name = slug.to_string();
    let mut description = String::new();

    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Some(heading) = trimmed.strip_prefix("# ") {
            if name == slug {
                name = heading.trim().to_string();
            }
            continue;
        }
        if trimmed.starts_with('#') || trimmed.starts_with("<!--") {
            continue;
        }
        description = trimmed.to_string();
        break;
    }

    (name, description)
}

/// Lowercase, spaces and separators to dashes, strip anything else odd.
pub fn slugify(s: &str) -> String {
    s.trim()
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() {
                c
            } else if c == ' ' || c == '_' || c == '-' || c == '/' {
                '-'
            } else {
                '\0'
            }
        })
        .filter(|c| *c != '\0')
        .collect::<String>()
        .trim_matches('-')
        .to_string()
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
