use anyhow::Result;
use console::style;
use nimbus_core::a2a::transport::{Connector, TcpConnector};
use nimbus_core::a2a::{AgentCard, AgentMessage, ErrorPayload, FinalPayload, MessageKind, PeerLink, Router};
use nimbus_core::agent::{AgentCore, LlmEngine, Progress, PromptBuilder};
use nimbus_core::config::Config;
use nimbus_core::mcp::{ToolExecutor, ToolRegistry};
use nimbus_core::{providers, tools};
use std::sync::Arc;
use tracing::info;

pub fn build_registry(config: &Config) -> Result<Arc<ToolRegistry>> {
    Ok(Arc::new(tools::default_registry(
        &config.tools.weather_base_url,
    )?))
}

pub fn build_router(config: &Config) -> Result<Router> {
    let registry = build_registry(config)?;
    let provider = providers::create_provider(config)?;
    info!(provider = provider.name(), model = %config.model, "using LLM provider");

    let card = build_card(config, &registry);
    let mut prompt = PromptBuilder::new(config.agent.name.clone()).with_tool_specs(registry.specs());
    if let Some(instruction) = &config.agent.instruction {
        prompt = prompt.with_instruction(instruction.clone());
    }
    let engine = LlmEngine::new(provider, prompt).with_temperature(config.temperature);
    let executor = ToolExecutor::new(registry).with_policy(config.tools.executor_policy());
    let core = AgentCore::new(Arc::new(engine), Arc::new(executor))
        .with_limits(config.limits.loop_limits());

    let connector: Arc<dyn Connector> = Arc::new(TcpConnector::default());
    let peers = config
        .peers
        .iter()
        .map(|peer| {
            Arc::new(PeerLink::new(
                peer.name.clone(),
                peer.address.clone(),
                peer.capabilities.clone(),
                connector.clone(),
                config.transport.backoff_policy(),
            ))
        })
        .collect();

    Ok(Router::new(
        config.agent.name.clone(),
        Arc::new(core),
        peers,
        config.routing.routing_policy(),
    )
    .with_card(card))
}

pub fn build_card(config: &Config, registry: &ToolRegistry) -> AgentCard {
    AgentCard::new(
        config.agent.name.clone(),
        config.agent.description.clone(),
        format!("tcp://{}", config.listen),
        config.agent.version.clone(),
    )
    .with_registry(registry)
}

/// What a caller should do after printing one reply.
pub enum Rendered {
    Pending,
    Answered,
    Failed(String),
}

pub fn render(message: &AgentMessage) -> Rendered {
    match message.kind {
        MessageKind::PartialResponse => {
            match message.decode::<Progress>() {
                Ok(Progress::ToolStarted { tool_id, .. }) => {
                    println!("  {} calling {}", style("⚙").dim(), style(tool_id).cyan());
                }
                Ok(Progress::ToolFinished {
                    tool_id, success, ..
                }) => {
                    let mark = if success {
                        style("✓").green()
                    } else {
                        style("✗").red()
                    };
                    println!("  {} {}", mark, style(tool_id).dim());
                }
                Ok(Progress::Note { text }) => println!("  {} {}", style("·").dim(), style(text).dim()),
                Err(_) => {}
            }
            Rendered::Pending
        }
        MessageKind::FinalResponse => match message.decode::<FinalPayload>() {
            Ok(reply) => {
                if let Some(agent) = reply.agent {
                    println!("\n{} {}", style(format!("[{agent}]")).dim(), reply.answer);
                } else {
                    println!("\n{}", reply.answer);
                }
                Rendered::Answered
            }
            Err(e) => Rendered::Failed(e.to_string()),
        },
        MessageKind::Error => {
            let detail = message
                .decode::<ErrorPayload>()
                .map(|e| e.message)
                .unwrap_or_else(|e| e.to_string());
            Rendered::Failed(detail)
        }
        MessageKind::Request
        | MessageKind::Escalate
        | MessageKind::Cancel
        | MessageKind::Discover
        | MessageKind::Card => Rendered::Pending,
    }
}
