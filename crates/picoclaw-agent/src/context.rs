//! Context builder — assembles the message list for each LLM call.
//!
//! Shape: one system prompt at index 0 (identity, memory, skills inventory,
//! running summary, channel hints), then the prior history, then the new
//! user turn. The builder never produces two adjacent system messages;
//! downstream providers may reject them.

use std::path::PathBuf;

use chrono::Utc;
use picoclaw_core::types::Message;

use crate::memory::MemoryStore;
use crate::skills::SkillsLoader;

pub struct ContextBuilder {
    workspace: PathBuf,
    agent_name: String,
    memory: MemoryStore,
    skills: SkillsLoader,
}

impl ContextBuilder {
    pub fn new(workspace: impl Into<PathBuf>, agent_name: impl Into<String>, skills_filter: Vec<String>) -> Self {
        let workspace = workspace.into();
        let memory = MemoryStore::new(&workspace);
        let skills = SkillsLoader::new(&workspace, skills_filter);
        Self {
            workspace,
            agent_name: agent_name.into(),
            memory,
            skills,
        }
    }

    pub fn memory(&self) -> &MemoryStore {
        &self.memory
    }

    pub fn skills(&self) -> &SkillsLoader {
        &self.skills
    }

    // ────────────── System prompt ──────────────

    /// Build the full system prompt, optionally including the running
    /// summary and the current channel/chat hints.
    pub fn build_system_prompt(&self, summary: &str, channel: &str, chat_id: &str) -> String {
        let mut parts: Vec<String> = Vec::new();

        parts.push(self.build_identity());

        if let Some(memory) = self.memory.get_memory_context() {
            parts.push(memory);
        }

        let skills_summary = self.skills.build_summary();
        if !skills_summary.is_empty() {
            parts.push(format!(
                "# Skills\n\n\
                 The following skills extend your capabilities. \
                 To use one, read its SKILL.md file with the `read_file` tool.\n\n\
                 {skills_summary}"
            ));
        }

        if !summary.trim().is_empty() {
            parts.push(format!(
                "# Conversation Summary\n\nEarlier conversation, summarized:\n\n{summary}"
            ));
        }

        parts.push(format!(
            "## Current Session\nChannel: {channel}\nChat ID: {chat_id}"
        ));

        parts.join("\n\n---\n\n")
    }

    fn build_identity(&self) -> String {
        let now = Utc::now().format("%Y-%m-%d %H:%M:%S UTC");
        let os = std::env::consts::OS;
        let arch = std::env::consts::ARCH;
        let workspace = self.workspace.display();
        let memory_file = self.memory.memory_file();

        format!(
            "# Identity\n\n\
             You are **{name}**, an AI assistant reachable over chat.\n\n\
             - **Date/time**: {now}\n\
             - **Runtime**: Rust on {os}/{arch}\n\
             - **Workspace**: `{workspace}`\n\n\
             You have tools. Use them instead of guessing. Be concise; you are \
             talking in a chat client, not writing a document.\n\n\
             ## Memory\n\n\
             When you learn something durable about the user or their projects, \
             persist it to `{memory}` with the file tools, or add a daily note \
             with the `memory` tool.",
            name = self.agent_name,
            memory = memory_file.display(),
        )
    }

    // ────────────── Message assembly ──────────────

    /// Build the full message list for an LLM call.
    pub fn build_messages(
        &self,
        history: &[Message],
        summary: &str,
        user_text: &str,
        channel: &str,
        chat_id: &str,
    ) -> Vec<Message> {
        let mut messages =
            Vec::with_capacity(history.len() + 2);
        messages.push(Message::system(
            self.build_system_prompt(summary, channel, chat_id),
        ));

        // History never contains system messages (the store only holds
        // user/assistant/tool turns), so index 0 stays the only one.
        messages.extend(
            history
                .iter()
                .filter(|m| !matches!(m, Message::System { .. }))
                .cloned(),
        );

        messages.push(Message::user(user_text));
        messages
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
