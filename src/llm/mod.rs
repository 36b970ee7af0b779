pub mod provider;
pub mod anthropic;
pub mod openai;
pub mod local;
pub mod router;
pub mod types;
pub mod catalog;

pub use provider::LLMProvider;
pub use router::{create_provider, FallbackProvider};
pub use types::{ChatMessage, ChatResponse, ContentBlock, Role, StopReason, ToolCall, ToolSchema};
