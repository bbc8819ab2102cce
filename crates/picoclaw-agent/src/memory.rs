//! Agent memory — long-term notes plus daily journals.
//!
//! Layout under the workspace:
//! - `memory/MEMORY.md` — curated long-term memory
//! - `memory/YYYYMM/YYYYMMDD.md` — appended daily notes
//!
//! The context builder injects the long-term file and the last three daily
//! notes, joined by `---`.

use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDate};
use tracing::warn;

/// How many recent daily notes go into the context.
const DAILY_NOTES_IN_CONTEXT: usize = 3;

pub struct MemoryStore {
    memory_dir: PathBuf,
}

impl MemoryStore {
    pub fn new(workspace: &Path) -> Self {
        Self {
            memory_dir: workspace.join("memory"),
        }
    }

    /// Path to the long-term memory file.
    pub fn memory_file(&self) -> PathBuf {
        self.memory_dir.join("MEMORY.md")
    }

    /// Path of the daily note for a date.
    pub fn daily_note_path(&self, date: NaiveDate) -> PathBuf {
        self.memory_dir
            .join(date.format("%Y%m").to_string())
            .join(format!("{}.md", date.format("%Y%m%d")))
    }

    /// Append a line to today's daily note, creating directories as needed.
    pub fn append_daily_note(&self, text: &str) -> std::io::Result<()> {
        let path = self.daily_note_path(Local::now().date_naive());
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        use std::io::Write;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;
        writeln!(file, "{}", text.trim_end())?;
        Ok(())
    }

    /// Read the long-term memory file, if present.
    pub fn long_term(&self) -> Option<String> {
        let path = self.memory_file();
        if path.is_file() {
            std::fs::read_to_string(&path).ok().filter(|s| !s.trim().is_empty())
        } else {
            None
        }
    }

    /// The memory block for the system prompt: long-term memory plus the
    /// last three daily notes, joined by `---`. `None` when there is
    /// nothing to inject.
    pub fn get_memory_context(&self) -> Option<String> {
        let mut parts = Vec::new();

        if let Some(long_term) = self.long_term() {
            parts.push(format!("## Long-term Memory\n\n{long_term}"));
        }

        for (date, content) in self.recent_daily_notes(DAILY_NOTES_IN_CONTEXT) {
            parts.push(format!("## Daily Notes {date}\n\n{content}"));
        }

        if parts.is_empty() {
            None
        } else {
            Some(parts.join("\n\n---\n\n"))
        }
    }

    /// The most recent `limit` daily notes, newest last.
    fn recent_daily_notes(&self, limit: usize) -> Vec<(String, String)> {
        let mut paths: Vec<PathBuf> = Vec::new();

        let months = match std::fs::read_dir(&self.memory_dir) {
            Ok(entries) => entries,
            Err(_) => return Vec::new(),
        };
        for month in months.flatten() {
            let path = month.path();
            if !path.is_dir() {
                continue;
            }
            if let Ok(days) = std::fs::read_dir(&path) {
                for day in days.flatten() {
                    let p = day.path();
                    if p.extension().map_or(false, |e| e == "md") {
                        paths.push(p);
                    }
                }
            }
        }

        // Filenames are YYYYMMDD.md, so lexicographic order is date order.
        paths.sort();
        paths
            .into_iter()
            .rev()
            .take(limit)
            .rev()
            .filter_map(|path| {
                let date = path.file_stem()?.to_str()?.to_string();
                match std::fs::read_to_string(&path) {
                    Ok(content) if !content.trim().is_empty() => Some((date, content)),
                    Ok(_) => None,
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "failed to read daily note");
                        None
                    }
                }
            })
            .collect()
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_empty_workspace_no_context() {
        let dir = tempdir().unwrap();
        let store = MemoryStore::new(dir.path());
        assert!(store.get_memory_context().is_none());
    }

    #[test]
    fn test_long_term_memory_in_context() {
        let dir = tempdir().unwrap();
        let store = MemoryStore::new(dir.path());
        std::fs::create_dir_all(dir.path().join("memory")).unwrap();
        std::fs::write(store.memory_file(), "User prefers short answers.").unwrap();

        let context = store.get_memory_context().unwrap();
        assert!(context.contains("Long-term Memory"));
        assert!(context.contains("User prefers short answers."));
    }

    #[test]
    fn test_append_daily_note_creates_month_dir() {
        let dir = tempdir().unwrap();
        let store = MemoryStore::new(dir.path());
        store.append_daily_note("met with the team").unwrap();

        let today = Local::now().date_naive();
        let path = store.daily_note_path(today);
        assert!(path.exists());
        assert!(path
            .parent()
            .unwrap()
            .ends_with(today.format("%Y%m").to_string()));
        assert!(std::fs::read_to_string(&path).unwrap().contains("met with the team"));
    }

    #[test]
    fn test_context_keeps_last_three_notes() {
        let dir = tempdir().unwrap();
        let store = MemoryStore::new(dir.path());

        for (month, day) in [("202601", "20260101"), ("202601", "20260115"), ("202602", "20260201"), ("202602", "20260210")] {
            let month_dir = dir.path().join("memory").join(month);
            std::fs::create_dir_all(&month_dir).unwrap();
            std::fs::write(month_dir.join(format!("{day}.md")), format!("note {day}")).unwrap();
        }

        let context = store.get_memory_context().unwrap();
        assert!(!context.contains("note 20260101"));
        assert!(context.contains("note 20260115"));
        assert!(context.contains("note 20260201"));
        assert!(context.contains("note 20260210"));
        // Joined by the separator
        assert!(context.contains("\n\n---\n\n"));
    }

    #[test]
    fn test_daily_note_path_shape() {
        let dir = tempdir().unwrap();
        let store = MemoryStore::new(dir.path());
        let date = NaiveDate::from_ymd_opt(2026, 8, 1).unwrap();
        let path = store.daily_note_path(date);
        assert!(path.ends_with("memory/202608/20260801.md"));
    }
}
