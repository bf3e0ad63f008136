use crate::mcp::ToolInvocationResult;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "turn", rename_all = "snake_case")]
pub enum Turn {
    Query {
        text: String,
    },
    ToolCall {
        call_id: String,
        tool_id: String,
        arguments: Value,
    },
    ToolResult {
        call_id: String,
        tool_id: String,
        result: ToolInvocationResult,
    },
    Note {
        text: String,
    },
    Answer {
        text: String,
    },
}

/// Ordered record of one session's conversation.
///
/// Turns are only ever appended; nothing is removed or reordered.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationContext {
    session_id: String,
    turns: Vec<Turn>,
}

impl ConversationContext {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            turns: Vec::new(),
        }
    }

    /// Rebuilds a context handed over by a peer agent.
    pub fn from_turns(session_id: impl Into<String>, turns: Vec<Turn>) -> Self {
        Self {
            session_id: session_id.into(),
            turns,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn push(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn latest_query(&self) -> Option<&str> {
        self.turns.iter().rev().find_map(|t| match t {
            Turn::Query { text } => Some(text.as_str()),
            _ => None,
        })
    }

    /// Number of tool calls recorded so far; also the next call's index.
    pub fn tool_call_count(&self) -> usize {
        self.turns
            .iter()
            .filter(|t| matches!(t, Turn::ToolCall { .. }))
            .count()
    }

    /// Turns recorded since the latest query.
    pub fn current_exchange(&self) -> &[Turn] {
        let start = self
            .turns
            .iter()
            .rposition(|t| matches!(t, Turn::Query { .. }))
            .unwrap_or(0);
        &self.turns[start..]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::FailureKind;
    use serde_json::json;

    #[test]
    fn push_appends_in_order() {
        let mut ctx = ConversationContext::new("s-1");
        ctx.push(Turn::Query {
            text: "weather in Paris?".into(),
        });
        ctx.push(Turn::ToolCall {
            call_id: "call_0".into(),
            tool_id: "get_current_weather".into(),
            arguments: json!({"city": "Paris"}),
        });
        ctx.push(Turn::ToolResult {
            call_id: "call_0".into(),
            tool_id: "get_current_weather".into(),
            result: ToolInvocationResult::failure(FailureKind::TransientTimeout, "slow"),
        });

        assert_eq!(ctx.len(), 3);
        assert_eq!(ctx.tool_call_count(), 1);
        assert_eq!(ctx.latest_query(), Some("weather in Paris?"));
        assert!(matches!(ctx.turns()[2], Turn::ToolResult { .. }));
    }

    #[test]
    fn current_exchange_starts_at_latest_query() {
        let mut ctx = ConversationContext::new("s-2");
        ctx.push(Turn::Query { text: "one".into() });
        ctx.push(Turn::Answer { text: "1".into() });
        ctx.push(Turn::Query { text: "two".into() });
        ctx.push(Turn::Note {
            text: "thinking".into(),
        });

        assert_eq!(ctx.current_exchange().len(), 2);
        assert_eq!(ctx.latest_query(), Some("two"));
    }

    #[test]
    fn turns_serialize_with_tag() {
        let turn = Turn::Answer { text: "28°C".into() };
        let value = serde_json::to_value(&turn).unwrap();
        assert_eq!(value["turn"], "answer");
    }
}
