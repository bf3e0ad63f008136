use crate::agent::{ConversationContext, Turn};
use crate::traits::{ChatMessage, ToolCall, ToolSpec};
use serde_json::json;
use std::fmt::Write;

/// Reserved function name through which the model hands a query to a peer.
pub const ESCALATE_TOOL: &str = "escalate";

pub const DEFAULT_INSTRUCTION: &str = "You are a specialized assistant for weather information. \
Your sole purpose is to use the 'get_current_weather' tool to answer questions about current weather \
conditions and forecasts for a specific city. \
If the user asks about anything other than weather, or about a city you cannot find, \
politely state that you can only provide current weather for specified cities, \
or call the 'escalate' tool naming the topic so a better-suited agent can take over. \
Do not attempt to answer unrelated questions or use tools for other purposes.";

/// Renders a conversation context into chat messages for an LLM provider.
pub struct PromptBuilder {
    agent_name: String,
    instruction: String,
    tool_specs: Vec<ToolSpec>,
}

impl PromptBuilder {
    pub fn new(agent_name: impl Into<String>) -> Self {
        Self {
            agent_name: agent_name.into(),
            instruction: DEFAULT_INSTRUCTION.to_string(),
            tool_specs: vec![],
        }
    }

    pub fn with_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.instruction = instruction.into();
        self
    }

    pub fn with_tool_specs(mut self, tool_specs: Vec<ToolSpec>) -> Self {
        self.tool_specs = tool_specs;
        self
    }

    /// Registered tools plus the reserved `escalate` function.
    pub fn tool_specs(&self) -> Vec<ToolSpec> {
        let mut specs = self.tool_specs.clone();
        specs.push(ToolSpec {
            name: ESCALATE_TOOL.to_string(),
            description: "Hand this conversation to a peer agent better suited to answer it"
                .to_string(),
            parameters_schema: json!({
                "type": "object",
                "properties": {
                    "reason": {
                        "type": "string",
                        "description": "Why the query is out of scope, naming its topic (e.g. traffic)"
                    }
                },
                "required": ["reason"]
            }),
        });
        specs
    }

    pub fn build_system_prompt(&self) -> String {
        let parts = [
            format!("## Identity\n\nYou are {}. {}", self.agent_name, self.instruction),
            self.get_tool_instructions(),
            self.get_runtime_context(),
        ];
        parts
            .into_iter()
            .filter(|p| !p.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n---\n\n")
    }

    fn get_tool_instructions(&self) -> String {
        let mut instructions = String::new();
        instructions.push_str("## Tool Use Protocol\n\n");
        instructions.push_str("Call at most one tool per response. ");
        instructions.push_str(
            "If native function calling is unavailable, wrap a JSON object in <tool_call> tags:\n\n",
        );
        instructions.push_str("```\n<tool_call>\n{\"name\": \"tool_name\", \"arguments\": {\"param\": \"value\"}}\n</tool_call>\n```\n\n");
        instructions.push_str("Tool results are returned to you as JSON with a `status` of `success` or `failure`. ");
        instructions.push_str("A failure may be retried with different arguments, explained to the user, or escalated.\n\n");
        instructions.push_str("### Available Tools\n\n");

        for tool in self.tool_specs() {
            let _ = writeln!(
                instructions,
                "**{}**: {}\nParameters: `{}`\n",
                tool.name, tool.description, tool.parameters_schema
            );
        }

        instructions
    }

    fn get_runtime_context(&self) -> String {
        let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M (%A)");
        format!("## Runtime Context\n\n### Current Time\n{timestamp}")
    }

    pub fn build_messages(&self, context: &ConversationContext) -> Vec<ChatMessage> {
        let mut messages = vec![ChatMessage::system(self.build_system_prompt())];

        for turn in context.turns() {
            let message = match turn {
                Turn::Query { text } => ChatMessage::user(text.clone()),
                Turn::ToolCall {
                    call_id,
                    tool_id,
                    arguments,
                } => ChatMessage::assistant_with_tool_calls(
                    String::new(),
                    vec![ToolCall {
                        id: call_id.clone(),
                        name: tool_id.clone(),
                        arguments: arguments.to_string(),
                    }],
                ),
                Turn::ToolResult {
                    call_id, result, ..
                } => ChatMessage::tool_result(
                    call_id.clone(),
                    serde_json::to_string(result).unwrap_or_default(),
                ),
                Turn::Note { text } => ChatMessage::system(format!("[note] {text}")),
                Turn::Answer { text } => ChatMessage::assistant(text.clone()),
            };
            messages.push(message);
        }

        messages
    }
}
