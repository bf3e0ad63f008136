use crate::traits::{ChatMessage, ChatRequest, ChatResponse, Provider, ToolCall, ToolSpec};
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<WireTool<'a>>>,
    temperature: f64,
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCallRequest<'a>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct WireToolCallRequest<'a> {
    id: &'a str,
    r#type: &'a str,
    function: WireFunctionRequest<'a>,
}

#[derive(Debug, Serialize)]
struct WireFunctionRequest<'a> {
    name: &'a str,
    arguments: &'a str,
}

#[derive(Debug, Serialize)]
struct WireTool<'a> {
    r#type: &'a str,
    function: WireToolFunction<'a>,
}

#[derive(Debug, Serialize)]
struct WireToolFunction<'a> {
    name: &'a str,
    description: &'a str,
    parameters: &'a serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
    tool_calls: Option<Vec<ResponseToolCall>>,
}

#[derive(Debug, Deserialize)]
struct ResponseToolCall {
    id: String,
    function: ResponseFunction,
}

#[derive(Debug, Deserialize)]
struct ResponseFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

/// Any backend speaking the OpenAI chat-completions API: OpenAI itself,
/// OpenRouter, Gemini's compatibility endpoint and Ollama.
pub struct OpenAiCompatibleProvider {
    name: String,
    client: reqwest::Client,
    api_key: Option<String>,
    model: String,
    base_url: String,
    headers: Vec<(String, String)>,
}

impl OpenAiCompatibleProvider {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .connect_timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();

        Self {
            name: name.into(),
            client,
            api_key: None,
            model: "gpt-4o".to_string(),
            base_url: base_url.into(),
            headers: vec![],
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn build_request<'a>(&'a self, request: &ChatRequest<'a>) -> CompletionRequest<'a> {
        CompletionRequest {
            model: &self.model,
            messages: convert_messages(request.messages),
            tools: request.tools.filter(|t| !t.is_empty()).map(convert_tools),
            temperature: request.temperature,
        }
    }
}

fn convert_messages(messages: &[ChatMessage]) -> Vec<WireMessage<'_>> {
    messages
        .iter()
        .map(|m| {
            let tool_calls = m.tool_calls.as_ref().map(|tool_calls| {
                tool_calls
                    .iter()
                    .map(|tc| WireToolCallRequest {
                        id: &tc.id,
                        r#type: "function",
                        function: WireFunctionRequest {
                            name: &tc.name,
                            arguments: &tc.arguments,
                        },
                    })
                    .collect()
            });

            WireMessage {
                role: m.role.as_str(),
                content: Some(m.content.as_str()),
                tool_calls,
                tool_call_id: m.tool_call_id.as_deref(),
            }
        })
        .collect()
}

fn convert_tools(tools: &[ToolSpec]) -> Vec<WireTool<'_>> {
    tools
        .iter()
        .map(|t| WireTool {
            r#type: "function",
            function: WireToolFunction {
                name: &t.name,
                description: &t.description,
                parameters: &t.parameters_schema,
            },
        })
        .collect()
}

fn into_chat_response(response: CompletionResponse) -> Result<ChatResponse> {
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("No choices in response"))?;

    let tool_calls: Vec<ToolCall> = choice
        .message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|c| ToolCall {
            id: c.id,
            name: c.function.name,
            arguments: c.function.arguments,
        })
        .collect();

    let has_content = choice
        .message
        .content
        .as_ref()
        .is_some_and(|c| !c.trim().is_empty());
    if !has_content && tool_calls.is_empty() {
        return Err(anyhow!("Empty response from API: no content or tool calls"));
    }

    Ok(ChatResponse {
        text: choice.message.content,
        tool_calls,
    })
}

#[async_trait]
impl Provider for OpenAiCompatibleProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn chat(&self, request: ChatRequest<'_>) -> Result<ChatResponse> {
        let body = self.build_request(&request);
        debug!(provider = %self.name, model = %self.model, messages = body.messages.len(), "chat request");

        let mut builder = self
            .client
            .post(format!("{}/chat/completions", self.base_url.trim_end_matches('/')))
            .header("Content-Type", "application/json")
            .json(&body);
        if let Some(api_key) = &self.api_key {
            builder = builder.bearer_auth(api_key);
        }
        for (name, value) in &self.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder
            .send()
            .await
            .with_context(|| format!("{} request failed", self.name))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(anyhow!("{} API error {}: {}", self.name, status, error_text));
        }

        let parsed: CompletionResponse = response
            .json()
            .await
            .with_context(|| format!("{} returned an unreadable response", self.name))?;
        into_chat_response(parsed)
    }
}
