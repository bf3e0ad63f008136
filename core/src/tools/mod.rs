use crate::error::Result;
use crate::mcp::ToolRegistry;
use serde_json::Value;
use std::sync::Arc;

pub mod weather;

pub use weather::CurrentWeatherTool;

pub fn extract_string_arg(args: &Value, key: &str) -> anyhow::Result<String> {
    args.get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow::anyhow!("Missing '{}' parameter", key))
        .map(|s| s.to_string())
}

pub fn extract_string_arg_opt(args: &Value, key: &str, default: &str) -> String {
    args.get(key)
        .and_then(|v| v.as_str())
        .unwrap_or(default)
        .to_string()
}

/// Registers the built-in tools and seals the registry.
pub fn default_registry(weather_base_url: &str) -> Result<ToolRegistry> {
    let mut builder = ToolRegistry::builder();
    builder.register_tool(Arc::new(CurrentWeatherTool::with_base_url(weather_base_url)))?;
    Ok(builder.seal())
}
