//! Picoclaw agent core — the LLM ↔ tool loop, agent registry, context
//! building, memory, skills, subagents, and summarization.

pub mod agent_loop;
pub mod commands;
pub mod context;
pub mod instance;
pub mod memory;
pub mod skills;
pub mod subagent;
pub mod summarize;
pub mod tools;

pub use agent_loop::{AgentLoop, ReasoningLookup};
pub use context::ContextBuilder;
pub use instance::{AgentInstance, AgentRegistry};
pub use memory::MemoryStore;
pub use skills::SkillsLoader;
pub use subagent::{SubagentManager, SubagentSettings};
pub use summarize::SummarizeGate;
pub use tools::{ContextualTool, Tool, ToolRegistry, ToolResult};
