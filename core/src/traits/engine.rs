use crate::agent::ConversationContext;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// What the reasoning engine wants the agent core to do next.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Decision {
    CallTool { tool_id: String, arguments: Value },
    Answer { text: String },
    Escalate { reason: String },
}

impl Decision {
    pub fn call_tool(tool_id: impl Into<String>, arguments: Value) -> Self {
        Self::CallTool {
            tool_id: tool_id.into(),
            arguments,
        }
    }

    pub fn answer(text: impl Into<String>) -> Self {
        Self::Answer { text: text.into() }
    }

    pub fn escalate(reason: impl Into<String>) -> Self {
        Self::Escalate {
            reason: reason.into(),
        }
    }
}

/// Opaque decision-making capability consulted once per `Deciding` step.
///
/// Implementations must derive their decision from `context` alone.
#[async_trait]
pub trait ReasoningEngine: Send + Sync {
    async fn decide(&self, context: &ConversationContext) -> anyhow::Result<Decision>;
}
