pub mod a2a;
pub mod agent;
pub mod config;
pub mod error;
pub mod mcp;
pub mod providers;
pub mod tools;
pub mod traits;

pub use a2a::{AgentCard, AgentMessage, AgentServer, MessageKind, PeerLink, Router, RoutingPolicy};
pub use agent::{AgentCore, AgentOutcome, ConversationContext, LlmEngine, LoopLimits, PromptBuilder};
pub use config::*;
pub use error::{AgentError, ErrorCode, Result};
pub use mcp::{ToolExecutor, ToolInvocationResult, ToolRegistry};
pub use providers::*;
pub use tools::*;
pub use traits::*;
