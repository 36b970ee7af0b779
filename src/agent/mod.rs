//! Autonomous mode: a bounded, LLM-directed loop over a small tool surface.

pub mod agent_loop;
pub mod session;
pub mod tools;

pub use agent_loop::AgentLoop;
pub use session::{AgentReport, Termination, ToolCallRecord};
pub use tools::AgentTool;
