use anyhow::{Context, Result};
use console::style;
use dialoguer::{Input, Password, Select};
use nimbus_core::config::{AgentConfig, Config};
use nimbus_core::providers::AVAILABLE_PROVIDERS;

const BANNER: &str = r"
    -------------------------------------

     _ __  (_)_ __ ___ | |__  _   _ ___
    | '_ \ | | '_ ` _ \| '_ \| | | / __|
    | | | || | | | | | | |_) | |_| \__ \
    |_| |_||_|_| |_| |_|_.__/ \__,_|___/

    -------------------------------------
";

const TOTAL_STEPS: usize = 4;

fn print_step(step: usize, title: &str) {
    println!();
    println!(
        "{}",
        style(format!("[{}/{}] {}", step, TOTAL_STEPS, title))
            .cyan()
            .bold()
    );
    println!();
}

fn setup_provider() -> Result<String> {
    let labels = [
        "openai      (OpenAI API)",
        "openrouter  (OpenRouter)",
        "gemini      (Google Gemini, OpenAI-compatible endpoint)",
        "ollama      (local models, no key)",
    ];

    let selection = Select::new()
        .with_prompt("Select your LLM provider")
        .items(&labels)
        .default(0)
        .interact()
        .context("Failed to select provider")?;

    Ok(AVAILABLE_PROVIDERS[selection].to_string())
}

fn setup_api_key(provider: &str) -> Result<String> {
    if provider == "ollama" {
        println!("  {} Ollama runs locally, no API key needed", style("✓").green());
        return Ok(String::new());
    }

    let api_key: String = Password::new()
        .with_prompt(format!("Enter your {provider} API key"))
        .interact()
        .context("Failed to read API key")?;

    if api_key.trim().is_empty() {
        return Err(anyhow::anyhow!("API key cannot be empty"));
    }

    Ok(api_key.trim().to_string())
}

fn models_for(provider: &str) -> &'static [&'static str] {
    match provider {
        "gemini" => &["gemini-2.5-flash", "gemini-2.5-pro", "gemini-2.0-flash"],
        "openrouter" => &[
            "google/gemini-2.5-flash",
            "openai/gpt-4o-mini",
            "anthropic/claude-sonnet-4",
        ],
        "ollama" => &["llama3.2", "qwen2.5", "mistral"],
        _ => &["gpt-4o", "gpt-4o-mini", "gpt-4.1", "gpt-4.1-mini"],
    }
}

fn setup_model(provider: &str) -> Result<String> {
    let models = models_for(provider);

    let selection = Select::new()
        .with_prompt("Select your model")
        .items(models)
        .default(0)
        .interact()
        .context("Failed to select model")?;

    Ok(models[selection].to_string())
}

fn setup_agent(defaults: &Config) -> Result<(AgentConfig, String)> {
    let name: String = Input::new()
        .with_prompt("Agent name")
        .default(defaults.agent.name.clone())
        .interact_text()
        .context("Failed to read agent name")?;

    let listen: String = Input::new()
        .with_prompt("Listen address for `nimbus serve`")
        .default(defaults.listen.clone())
        .interact_text()
        .context("Failed to read listen address")?;

    Ok((
        AgentConfig {
            name,
            ..defaults.agent.clone()
        },
        listen,
    ))
}

pub fn run_onboard() -> Result<Config> {
    println!("{}", style(BANNER).cyan().bold());

    println!("  {}", style("Welcome to nimbus!").white().bold());
    println!(
        "  {}",
        style("This wizard configures a weather agent and its LLM provider.").dim()
    );
    println!();

    let defaults = Config::default();

    print_step(1, "Provider");
    let provider = setup_provider()?;

    print_step(2, "API Key Setup");
    let api_key = setup_api_key(&provider)?;

    print_step(3, "Model Selection");
    let model = setup_model(&provider)?;

    print_step(4, "Agent Setup");
    let (agent, listen) = setup_agent(&defaults)?;

    let config = Config {
        provider: Some(provider),
        api_key,
        model,
        listen,
        agent,
        ..defaults
    };

    println!();
    println!("  {} Configuration complete!", style("✓").green().bold());
    println!(
        "  {} Config saved to {}",
        style("→").green(),
        style(nimbus_core::config::get_config_path().display()).cyan()
    );
    println!(
        "  {} Add peers under {} to enable escalation",
        style("→").green(),
        style("[[peers]]").cyan()
    );
    println!();
    println!(
        "  {} You can now run: {} or {}",
        style("→").green(),
        style("nimbus chat").cyan().bold(),
        style("nimbus serve").cyan().bold()
    );
    println!();

    Ok(config)
}
