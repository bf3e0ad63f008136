#![allow(dead_code)]

use async_trait::async_trait;
use nimbus_core::a2a::transport::{BoxedStream, Connector};
use nimbus_core::a2a::{AgentMessage, MessageKind, Router, RoutingPolicy, serve_connection};
use nimbus_core::agent::{AgentCore, ConversationContext, Turn};
use nimbus_core::mcp::{ExecutorPolicy, ToolExecutor, ToolInvocationResult, ToolRegistry};
use nimbus_core::traits::{Decision, ReasoningEngine, Tool, ToolError};
use nimbus_core::{AgentError, Result};
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::UnboundedReceiverStream;

/// Reasoning engine driven by a plain function of the conversation so far.
pub struct FnEngine {
    decide: Box<dyn Fn(&ConversationContext) -> Decision + Send + Sync>,
    pub calls: AtomicUsize,
}

impl FnEngine {
    pub fn new<F>(decide: F) -> Arc<Self>
    where
        F: Fn(&ConversationContext) -> Decision + Send + Sync + 'static,
    {
        Arc::new(Self {
            decide: Box::new(decide),
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl ReasoningEngine for FnEngine {
    async fn decide(&self, context: &ConversationContext) -> anyhow::Result<Decision> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok((self.decide)(context))
    }
}

pub fn latest_success(context: &ConversationContext) -> Option<&Value> {
    context.current_exchange().iter().rev().find_map(|t| match t {
        Turn::ToolResult {
            result: ToolInvocationResult::Success { payload },
            ..
        } => Some(payload),
        _ => None,
    })
}

pub fn latest_failure(context: &ConversationContext) -> Option<&ToolInvocationResult> {
    context.current_exchange().iter().rev().find_map(|t| match t {
        Turn::ToolResult { result, .. } if !result.is_success() => Some(result),
        _ => None,
    })
}

/// Stand-in for the weather tool with a fixed table of temperatures.
pub struct FakeWeather {
    pub delay: Duration,
    pub calls: AtomicUsize,
}

impl FakeWeather {
    pub fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl Tool for FakeWeather {
    fn name(&self) -> &str {
        "get_current_weather"
    }

    fn description(&self) -> &str {
        "Current weather for a city"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "city": {"type": "string"},
                "units": {"type": "string", "enum": ["metric", "imperial"]}
            },
            "required": ["city"]
        })
    }

    async fn invoke(&self, args: Value) -> std::result::Result<Value, ToolError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        let city = args["city"].as_str().unwrap_or_default();
        let temperature = match city {
            "Pune" => 28.0,
            "London" => 14.0,
            "Tokyo" => 22.5,
            _ => return Err(ToolError::Failed(format!("City '{city}' not found"))),
        };
        Ok(json!({
            "city": city,
            "current_temperature": format!("{temperature:.1}°C"),
            "conditions": "Clear sky"
        }))
    }
}

pub fn core_with(
    engine: Arc<dyn ReasoningEngine>,
    tools: Vec<Arc<dyn Tool>>,
    policy: ExecutorPolicy,
) -> Arc<AgentCore> {
    let mut builder = ToolRegistry::builder();
    for tool in tools {
        builder.register_tool(tool).unwrap();
    }
    let executor = ToolExecutor::new(Arc::new(builder.seal())).with_policy(policy);
    Arc::new(AgentCore::new(engine, Arc::new(executor)))
}

pub fn quick_routing() -> RoutingPolicy {
    RoutingPolicy {
        peer_retries: 1,
        retry_backoff: Duration::from_millis(20),
        max_hops: 3,
        session_retention: Duration::from_secs(60),
    }
}

/// Reads messages until the terminal one, or fails after `limit`.
pub async fn collect_until_terminal(
    stream: &mut UnboundedReceiverStream<AgentMessage>,
    limit: Duration,
) -> Vec<AgentMessage> {
    let mut seen = Vec::new();
    loop {
        let next = tokio::time::timeout(limit, stream.next())
            .await
            .expect("session produced no terminal message in time")
            .expect("outbox closed before a terminal message");
        let terminal = next.is_terminal();
        seen.push(next);
        if terminal {
            return seen;
        }
    }
}

pub fn kinds(messages: &[AgentMessage]) -> Vec<MessageKind> {
    messages.iter().map(|m| m.kind).collect()
}

/// Dials in-memory connections to a peer router, refusing the first
/// `refusals` attempts.
pub struct InMemoryConnector {
    peer: Router,
    refusals: usize,
    pub dials: AtomicUsize,
}

impl InMemoryConnector {
    pub fn new(peer: Router, refusals: usize) -> Arc<Self> {
        Arc::new(Self {
            peer,
            refusals,
            dials: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl Connector for InMemoryConnector {
    async fn connect(&self, address: &str) -> Result<BoxedStream> {
        let dial = self.dials.fetch_add(1, Ordering::SeqCst);
        if dial < self.refusals {
            return Err(AgentError::Transport(format!("{address}: connection refused")));
        }
        let (near, far) = tokio::io::duplex(64 * 1024);
        tokio::spawn(serve_connection(self.peer.clone(), far, "peer".into()));
        Ok(Box::new(near))
    }
}
