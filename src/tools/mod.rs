pub mod registry;
pub mod runner;
pub mod runners;
pub mod validation;

pub use registry::{find_entry, ToolEntry, ToolRegistry, TOOL_REGISTRY};
pub use runner::{ToolCategory, ToolRunner};
