pub mod context;
pub mod llm;
pub mod loop_;
pub mod prompt;

pub use context::{ConversationContext, Turn};
pub use llm::LlmEngine;
pub use loop_::{
    AgentCore, AgentOutcome, AgentState, EscalationReason, LoopLimits, Progress, ProgressSink,
};
pub use prompt::PromptBuilder;
