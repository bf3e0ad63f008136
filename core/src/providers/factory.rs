use crate::config::Config;
use crate::providers::OpenAiCompatibleProvider;
use crate::traits::Provider;
use anyhow::{Result, anyhow};
use std::sync::Arc;

pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";
pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/openai";
pub const OLLAMA_BASE_URL: &str = "http://localhost:11434/v1";

pub const AVAILABLE_PROVIDERS: &[&str] = &["openai", "openrouter", "gemini", "ollama"];

pub fn create_provider(config: &Config) -> Result<Arc<dyn Provider>> {
    let provider_name = config.provider_name().to_lowercase();

    let provider = match provider_name.as_str() {
        "ollama" => OpenAiCompatibleProvider::new("ollama", OLLAMA_BASE_URL),
        "openai" => {
            let api_key = resolve_api_key_with_fallback(
                &["OPENAI_API_KEY", "NIMBUS_OPENAI_API_KEY"],
                &config.api_key,
            )?;
            OpenAiCompatibleProvider::new("openai", OPENAI_BASE_URL).with_api_key(api_key)
        }
        "openrouter" => {
            let api_key = resolve_api_key_with_fallback(
                &["OPENROUTER_API_KEY", "NIMBUS_OPENROUTER_API_KEY"],
                &config.api_key,
            )?;
            OpenAiCompatibleProvider::new("openrouter", OPENROUTER_BASE_URL)
                .with_api_key(api_key)
                .with_header("X-Title", "nimbus")
        }
        "gemini" | "google" => {
            let api_key = resolve_api_key_with_fallback(
                &["GEMINI_API_KEY", "GOOGLE_API_KEY", "NIMBUS_GEMINI_API_KEY"],
                &config.api_key,
            )?;
            OpenAiCompatibleProvider::new("gemini", GEMINI_BASE_URL).with_api_key(api_key)
        }
        _ => {
            return Err(anyhow!(
                "Unknown provider: {}. Available: {}",
                provider_name,
                AVAILABLE_PROVIDERS.join(", ")
            ));
        }
    };

    let mut provider = provider.with_model(config.model.clone());
    if let Some(base_url) = &config.base_url {
        provider = provider.with_base_url(base_url.clone());
    }
    Ok(Arc::new(provider))
}

fn resolve_api_key_with_fallback(env_vars: &[&str], config_key: &str) -> Result<String> {
    for var_name in env_vars {
        if let Ok(key) = std::env::var(var_name) {
            if !key.trim().is_empty() {
                return Ok(key);
            }
        }
    }
    if !config_key.is_empty() {
        Ok(config_key.to_string())
    } else {
        Err(anyhow!(
            "No API key found. Set {} or run 'nimbus onboard'.",
            env_vars.first().copied().unwrap_or("an API key variable")
        ))
    }
}
