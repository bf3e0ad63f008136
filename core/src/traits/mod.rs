pub mod engine;
pub mod provider;
pub mod tool;

pub use engine::{Decision, ReasoningEngine};
pub use provider::{ChatMessage, ChatRequest, ChatResponse, Provider, Role, ToolCall};
pub use tool::{Tool, ToolError, ToolSpec};
