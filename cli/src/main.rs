use anyhow::Result;
use clap::{Parser, Subcommand};
use console::style;
use nimbus_core::a2a::transport::{LinkEvent, TcpConnector};
use nimbus_core::a2a::{AgentMessage, AgentServer, PeerLink, new_session_id};
use nimbus_core::config;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

mod onboard;
mod runtime;

use runtime::Rendered;

#[derive(Parser)]
#[command(name = "nimbus")]
#[command(about = "nimbus - weather agents that talk to each other", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive first-time setup
    Onboard,
    /// Serve this agent to peers and remote clients
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Send one query to a running agent
    Ask {
        #[arg(short, long, default_value = "localhost:10000")]
        agent: String,
        query: String,
    },
    /// Chat with a local agent
    Chat {
        #[arg(short, long)]
        message: Option<String>,
    },
    /// List registered tools
    Tools,
    /// Print this agent's card
    Card,
}

fn init_tracing(default_level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let command = cli.command.unwrap_or_else(|| {
        if !config::config_exists() {
            Commands::Onboard
        } else {
            Commands::Chat { message: None }
        }
    });

    init_tracing(if matches!(command, Commands::Serve { .. }) {
        "info"
    } else {
        "warn"
    });

    match command {
        Commands::Onboard => {
            let onboard_config = onboard::run_onboard().map_err(|e| {
                eprintln!("❌ Onboarding failed: {}", e);
                anyhow::anyhow!("Onboarding failed: {}", e)
            })?;
            config::save_config(&onboard_config)?;
        }
        Commands::Serve { host, port } => {
            let config = config::load_config()?;
            let address = listen_address(&config.listen, host, port);
            let router = runtime::build_router(&config)?;
            let listener = TcpListener::bind(&address).await?;

            let shutdown = CancellationToken::new();
            let trigger = shutdown.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    trigger.cancel();
                }
            });

            println!(
                "🌤  {} listening on {}",
                style(router.agent_name()).cyan().bold(),
                style(&address).cyan()
            );
            AgentServer::new(router).serve(listener, shutdown).await?;
        }
        Commands::Ask { agent, query } => ask(&agent, &query).await?,
        Commands::Chat { message } => {
            let config = config::load_config()?;
            let router = runtime::build_router(&config)?;

            if let Some(msg) = message {
                if let Err(e) = converse(&router, &new_session_id(), &msg).await {
                    eprintln!("❌ Error: {}", e);
                    anyhow::bail!("Agent processing failed: {}", e);
                }
            } else {
                println!("🌤  {}", router.agent_name());
                println!("Type your message (Ctrl+D to exit):\n");
                use std::io::{self, BufRead};
                let session_id = new_session_id();
                let stdin = io::stdin();

                loop {
                    print!("> ");
                    let _ = io::stdout().flush();

                    let mut input = String::new();
                    match stdin.lock().read_line(&mut input) {
                        Ok(0) | Err(_) => {
                            println!("\n👋 Goodbye!");
                            break;
                        }
                        Ok(_) => {
                            let input = input.trim();
                            if input.is_empty() {
                                continue;
                            }
                            if let Err(e) = converse(&router, &session_id, input).await {
                                eprintln!("❌ Error: {}", e);
                            }
                            println!();
                        }
                    }
                }
            }
        }
        Commands::Tools => {
            let config = config::load_config()?;
            let registry = runtime::build_registry(&config)?;
            for tool in registry.list() {
                println!("{}", style(tool.id()).cyan().bold());
                println!("  {}", tool.description());
                println!(
                    "  {}",
                    style(serde_json::to_string(tool.input_schema())?).dim()
                );
            }
        }
        Commands::Card => {
            let config = config::load_config()?;
            let registry = runtime::build_registry(&config)?;
            let card = runtime::build_card(&config, &registry);
            println!("{}", serde_json::to_string_pretty(&card)?);
        }
    }

    Ok(())
}

fn listen_address(configured: &str, host: Option<String>, port: Option<u16>) -> String {
    let (default_host, default_port) = configured
        .rsplit_once(':')
        .unwrap_or((configured, "10000"));
    format!(
        "{}:{}",
        host.as_deref().unwrap_or(default_host),
        port.map(|p| p.to_string())
            .unwrap_or_else(|| default_port.to_string())
    )
}

/// Runs one query against the local router and prints its replies.
/// Reusing `session_id` continues the same conversation.
async fn converse(router: &nimbus_core::Router, session_id: &str, query: &str) -> Result<()> {
    let mut replies = router.open_stream_in(session_id, query)?;
    loop {
        tokio::select! {
            reply = replies.next() => {
                let Some(reply) = reply else {
                    anyhow::bail!("session {session_id} ended without an answer");
                };
                match runtime::render(&reply) {
                    Rendered::Pending => {}
                    Rendered::Answered => return Ok(()),
                    Rendered::Failed(detail) => anyhow::bail!(detail),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                router.cancel(session_id)?;
            }
        }
    }
}

/// Sends one query to a remote agent over TCP.
async fn ask(address: &str, query: &str) -> Result<()> {
    let link = PeerLink::new(
        "remote",
        address,
        vec![],
        Arc::new(TcpConnector::default()),
        Default::default(),
    );
    let card = link.discover(Duration::from_secs(5)).await?;
    println!(
        "{} {} {}",
        style("→").dim(),
        style(&card.name).cyan().bold(),
        style(format!("v{}", card.version)).dim()
    );
    for skill in &card.skills {
        println!("  {} {}", style("·").dim(), style(&skill.name).dim());
    }

    let session_id = new_session_id();
    let mut events = link
        .request(&AgentMessage::request(session_id.clone(), query))
        .await?;

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(LinkEvent::Message(reply)) => match runtime::render(&reply) {
                    Rendered::Pending => {}
                    Rendered::Answered => return Ok(()),
                    Rendered::Failed(detail) => anyhow::bail!(detail),
                },
                Some(LinkEvent::Lost(e)) => return Err(e.into()),
                None => anyhow::bail!("connection to {address} closed"),
            },
            _ = tokio::signal::ctrl_c() => {
                link.send(&AgentMessage::cancel(session_id.clone())).await?;
            }
        }
    }
}
