use crate::agent::prompt::{ESCALATE_TOOL, PromptBuilder};
use crate::agent::ConversationContext;
use crate::traits::{ChatRequest, Decision, Provider, ReasoningEngine, ToolCall};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

const TOOL_CALL_OPEN_TAG: &str = "<tool_call>";
const TOOL_CALL_CLOSE_TAG: &str = "</tool_call>";

/// Reasoning engine backed by a chat-completion provider.
pub struct LlmEngine {
    provider: Arc<dyn Provider>,
    prompt: PromptBuilder,
    temperature: f64,
}

impl LlmEngine {
    pub fn new(provider: Arc<dyn Provider>, prompt: PromptBuilder) -> Self {
        Self {
            provider,
            prompt,
            temperature: 0.2,
        }
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }
}

#[async_trait]
impl ReasoningEngine for LlmEngine {
    async fn decide(&self, context: &ConversationContext) -> Result<Decision> {
        let messages = self.prompt.build_messages(context);
        let tools = self.prompt.tool_specs();
        let request = ChatRequest {
            messages: &messages,
            tools: Some(&tools),
            temperature: self.temperature,
        };

        let response = self
            .provider
            .chat(request)
            .await
            .with_context(|| format!("{} chat request failed", self.provider.name()))?;

        let (text, tool_calls) = if response.has_tool_calls() {
            (response.text_or_empty().to_string(), response.tool_calls)
        } else if let Some(text) = &response.text {
            parse_tool_calls_fallback(text)
        } else {
            anyhow::bail!("No response from provider");
        };

        let decision = decision_from(text, tool_calls)?;
        debug!(session_id = %context.session_id(), ?decision, "engine decided");
        Ok(decision)
    }
}

/// Only the first requested call is honoured; tool calls run one at a time.
fn decision_from(text: String, tool_calls: Vec<ToolCall>) -> Result<Decision> {
    let Some(call) = tool_calls.into_iter().next() else {
        return Ok(Decision::answer(text));
    };

    let arguments: Value = if call.arguments.trim().is_empty() {
        Value::Object(Default::default())
    } else {
        serde_json::from_str(&call.arguments)
            .with_context(|| format!("Failed to parse tool arguments for {}", call.name))?
    };

    if call.name == ESCALATE_TOOL {
        let reason = arguments
            .get("reason")
            .and_then(|v| v.as_str())
            .unwrap_or("escalation requested");
        return Ok(Decision::escalate(reason));
    }

    Ok(Decision::call_tool(call.name, arguments))
}

fn parse_tool_calls_fallback(response: &str) -> (String, Vec<ToolCall>) {
    let mut text_parts = Vec::new();
    let mut calls = Vec::new();
    let mut remaining = response;

    while let Some(start) = remaining.find(TOOL_CALL_OPEN_TAG) {
        let before = &remaining[..start];
        if !before.trim().is_empty() {
            text_parts.push(before.trim().to_string());
        }

        let after_open = &remaining[start + TOOL_CALL_OPEN_TAG.len()..];
        let Some(close_idx) = after_open.find(TOOL_CALL_CLOSE_TAG) else {
            break;
        };

        for value in extract_json_values(&after_open[..close_idx]) {
            if let Some(call) = parse_tool_call_value(&value) {
                calls.push(call);
            }
        }
        remaining = &after_open[close_idx + TOOL_CALL_CLOSE_TAG.len()..];
    }

    if !remaining.trim().is_empty() && calls.is_empty() {
        text_parts.push(remaining.trim().to_string());
    }

    (text_parts.join("\n"), calls)
}

fn extract_json_values(text: &str) -> Vec<Value> {
    let mut values = Vec::new();
    let mut depth = 0usize;
    let mut start = None;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, ch) in text.char_indices() {
        if in_string {
            if escape_next {
                escape_next = false;
            } else if ch == '\\' {
                escape_next = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }

        match ch {
            '"' => in_string = true,
            '{' => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            '}' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    if let Some(s) = start.take() {
                        if let Ok(value) = serde_json::from_str::<Value>(&text[s..=i]) {
                            values.push(value);
                        }
                    }
                }
            }
            _ => {}
        }
    }

    values
}

fn parse_tool_call_value(value: &Value) -> Option<ToolCall> {
    let name = value.get("name")?.as_str()?.to_string();
    let arguments = value.get("arguments")?;
    let arguments_str = serde_json::to_string(arguments).ok()?;
    let digest = md5::compute(arguments_str.as_bytes());

    Some(ToolCall {
        id: format!("call_{:x}", digest),
        name,
        arguments: arguments_str,
    })
}
