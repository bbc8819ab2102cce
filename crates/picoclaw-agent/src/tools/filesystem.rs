//! Filesystem tools — read, write, edit, append, list.
//!
//! When an agent is workspace-restricted, every path goes through the
//! rooted [`Sandbox`]: resolution canonicalizes against the workspace root
//! and rejects both lexical escapes and symlinks that point outside. Denial
//! messages never reveal the resolved absolute path.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::{json, Value};

use picoclaw_core::utils::expand_home;

use super::base::{optional_i64, require_string, Tool, ToolResult};

/// Denial message for lexical escapes.
pub const DENIED_OUTSIDE: &str = "access denied: path is outside the workspace";
/// Denial message for symlink escapes.
pub const DENIED_SYMLINK: &str = "access denied: symlink resolves outside workspace";

// ─────────────────────────────────────────────
// Sandbox
// ─────────────────────────────────────────────

/// Rooted-directory path resolution. `None` root means unrestricted.
#[derive(Clone, Debug)]
pub struct Sandbox {
    root: Option<PathBuf>,
}

impl Sandbox {
    /// Restricted to `root`.
    pub fn rooted(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }

    /// Unrestricted.
    pub fn open() -> Self {
        Self { root: None }
    }

    /// Resolve a user-supplied path. Relative paths are joined onto the
    /// root (or the current dir when unrestricted).
    pub fn resolve(&self, raw: &str) -> Result<PathBuf, String> {
        let expanded = expand_home(raw);

        let root = match &self.root {
            Some(root) => root,
            None => return Ok(expanded),
        };

        let root_canon = root
            .canonicalize()
            .map_err(|_| DENIED_OUTSIDE.to_string())?;

        let joined = if expanded.is_absolute() {
            expanded
        } else {
            root_canon.join(&expanded)
        };

        // Lexical check first: a path that never names the workspace is
        // denied without touching the filesystem.
        let lexical = normalize_lexically(&joined);
        if !lexical.starts_with(&root_canon) {
            return Err(DENIED_OUTSIDE.to_string());
        }

        // Canonicalize the deepest existing ancestor so symlinks are
        // resolved; the not-yet-existing tail is re-appended.
        let (existing, tail) = split_existing(&lexical);
        let canon = existing
            .canonicalize()
            .map_err(|_| DENIED_OUTSIDE.to_string())?;
        if !canon.starts_with(&root_canon) {
            return Err(DENIED_SYMLINK.to_string());
        }

        Ok(canon.join(tail))
    }
}

/// Remove `.` and `..` components without touching the filesystem.
fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            std::path::Component::CurDir => {}
            std::path::Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

/// Split a path into its deepest existing ancestor and the remaining tail.
fn split_existing(path: &Path) -> (PathBuf, PathBuf) {
    let mut existing = path.to_path_buf();
    let mut tail = PathBuf::new();
    while !existing.exists() {
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                tail = Path::new(name).join(&tail);
                existing = parent.to_path_buf();
            }
            _ => break,
        }
    }
    (existing, tail)
}

// ─────────────────────────────────────────────
// ReadFileTool
// ─────────────────────────────────────────────

pub struct ReadFileTool {
    sandbox: Sandbox,
}

impl ReadFileTool {
    pub fn new(sandbox: Sandbox) -> Self {
        Self { sandbox }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read the contents of a file at the given path."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Path to the file to read" }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, params: HashMap<String, Value>) -> ToolResult {
        let path_str = match require_string(&params, "path") {
            Ok(p) => p,
            Err(e) => return ToolResult::error(e),
        };
        let path = match self.sandbox.resolve(&path_str) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(e),
        };

        if !path.is_file() {
            return ToolResult::error(format!("File not found: {path_str}"));
        }
        match std::fs::read_to_string(&path) {
            Ok(content) => ToolResult::ok(content),
            Err(e) => ToolResult::error(format!("Failed to read {path_str}: {e}")),
        }
    }
}

// ─────────────────────────────────────────────
// WriteFileTool
// ─────────────────────────────────────────────

pub struct WriteFileTool {
    sandbox: Sandbox,
}

impl WriteFileTool {
    pub fn new(sandbox: Sandbox) -> Self {
        Self { sandbox }
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write content to a file, creating it or overwriting it. Parent directories are created automatically."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Path to write" },
                "content": { "type": "string", "description": "Content to write" }
            },
            "required": ["path", "content"]
        })
    }

    async fn execute(&self, params: HashMap<String, Value>) -> ToolResult {
        let (path_str, content) = match (
            require_string(&params, "path"),
            require_string(&params, "content"),
        ) {
            (Ok(p), Ok(c)) => (p, c),
            (Err(e), _) | (_, Err(e)) => return ToolResult::error(e),
        };
        let path = match self.sandbox.resolve(&path_str) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(e),
        };

        if let Some(parent) = path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                return ToolResult::error(format!("Failed to create directories: {e}"));
            }
        }
        match std::fs::write(&path, content.as_bytes()) {
            Ok(()) => ToolResult::ok(format!("Wrote {} bytes to {path_str}", content.len())),
            Err(e) => ToolResult::error(format!("Failed to write {path_str}: {e}")),
        }
    }
}

// ─────────────────────────────────────────────
// EditFileTool
// ─────────────────────────────────────────────

pub struct EditFileTool {
    sandbox: Sandbox,
}

impl EditFileTool {
    pub fn new(sandbox: Sandbox) -> Self {
        Self { sandbox }
    }
}

#[async_trait]
impl Tool for EditFileTool {
    fn name(&self) -> &str {
        "edit_file"
    }

    fn description(&self) -> &str {
        "Replace the first occurrence of old_text with new_text in a file."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string" },
                "old_text": { "type": "string", "description": "Exact text to replace" },
                "new_text": { "type": "string", "description": "Replacement text" }
            },
            "required": ["path", "old_text", "new_text"]
        })
    }

    async fn execute(&self, params: HashMap<String, Value>) -> ToolResult {
        let path_str = match require_string(&params, "path") {
            Ok(p) => p,
            Err(e) => return ToolResult::error(e),
        };
        let (old_text, new_text) = match (
            require_string(&params, "old_text"),
            require_string(&params, "new_text"),
        ) {
            (Ok(o), Ok(n)) => (o, n),
            (Err(e), _) | (_, Err(e)) => return ToolResult::error(e),
        };
        let path = match self.sandbox.resolve(&path_str) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(e),
        };

        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) => return ToolResult::error(format!("Failed to read {path_str}: {e}")),
        };
        if !content.contains(&old_text) {
            return ToolResult::error(format!("old_text not found in {path_str}"));
        }
        let updated = content.replacen(&old_text, &new_text, 1);
        match std::fs::write(&path, updated) {
            Ok(()) => ToolResult::ok(format!("Edited {path_str}")),
            Err(e) => ToolResult::error(format!("Failed to write {path_str}: {e}")),
        }
    }
}

// ─────────────────────────────────────────────
// AppendFileTool
// ─────────────────────────────────────────────

pub struct AppendFileTool {
    sandbox: Sandbox,
}

impl AppendFileTool {
    pub fn new(sandbox: Sandbox) -> Self {
        Self { sandbox }
    }
}

#[async_trait]
impl Tool for AppendFileTool {
    fn name(&self) -> &str {
        "append_file"
    }

    fn description(&self) -> &str {
        "Append content to the end of a file, creating it if missing."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string" },
                "content": { "type": "string" }
            },
            "required": ["path", "content"]
        })
    }

    async fn execute(&self, params: HashMap<String, Value>) -> ToolResult {
        let (path_str, content) = match (
            require_string(&params, "path"),
            require_string(&params, "content"),
        ) {
            (Ok(p), Ok(c)) => (p, c),
            (Err(e), _) | (_, Err(e)) => return ToolResult::error(e),
        };
        let path = match self.sandbox.resolve(&path_str) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(e),
        };

        if let Some(parent) = path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                return ToolResult::error(format!("Failed to create directories: {e}"));
            }
        }
        use std::io::Write;
        let result = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .and_then(|mut f| f.write_all(content.as_bytes()));
        match result {
            Ok(()) => ToolResult::ok(format!("Appended {} bytes to {path_str}", content.len())),
            Err(e) => ToolResult::error(format!("Failed to append to {path_str}: {e}")),
        }
    }
}

// ─────────────────────────────────────────────
// ListDirTool
// ─────────────────────────────────────────────

pub struct ListDirTool {
    sandbox: Sandbox,
}

impl ListDirTool {
    pub fn new(sandbox: Sandbox) -> Self {
        Self { sandbox }
    }
}

#[async_trait]
impl Tool for ListDirTool {
    fn name(&self) -> &str {
        "list_dir"
    }

    fn description(&self) -> &str {
        "List the entries of a directory. Directories are suffixed with '/'."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Directory to list" },
                "limit": { "type": "integer", "description": "Maximum entries (default 200)" }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, params: HashMap<String, Value>) -> ToolResult {
        let path_str = match require_string(&params, "path") {
            Ok(p) => p,
            Err(e) => return ToolResult::error(e),
        };
        let limit = optional_i64(&params, "limit").unwrap_or(200).max(1) as usize;
        let path = match self.sandbox.resolve(&path_str) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(e),
        };

        let entries = match std::fs::read_dir(&path) {
            Ok(e) => e,
            Err(e) => return ToolResult::error(format!("Failed to list {path_str}: {e}")),
        };

        let mut names: Vec<String> = entries
            .flatten()
            .map(|entry| {
                let name = entry.file_name().to_string_lossy().to_string();
                if entry.path().is_dir() {
                    format!("{name}/")
                } else {
                    name
                }
            })
            .collect();
        names.sort();
        let total = names.len();
        names.truncate(limit);

        let mut out = names.join("\n");
        if total > limit {
            out.push_str(&format!("\n... ({} more)", total - limit));
        }
        ToolResult::ok(if out.is_empty() { "(empty)".into() } else { out })
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
