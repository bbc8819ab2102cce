//! Agent tools: the invocation contract, the registry, and the shared tool
//! set registered on every agent.

pub mod base;
pub mod cron_tool;
pub mod filesystem;
pub mod memory_tool;
pub mod message;
pub mod registry;
pub mod shell;
pub mod skills_tool;
pub mod spawn;
pub mod web;

pub use base::{ContextualTool, Tool, ToolResult};
pub use registry::ToolRegistry;
