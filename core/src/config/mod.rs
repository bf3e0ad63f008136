use crate::a2a::{BackoffPolicy, RoutingPolicy};
use crate::agent::LoopLimits;
use crate::mcp::ExecutorPolicy;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const NIMBUS_DIR: &str = ".nimbus";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgentConfig {
    pub name: String,
    pub description: String,
    pub instruction: Option<String>,
    pub version: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: "weather_agent".to_string(),
            description: "Provides current weather conditions for a specified city.".to_string(),
            instruction: None,
            version: "1.0.0".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_tool_calls: usize,
    pub max_failures: usize,
    pub max_query_chars: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        let limits = LoopLimits::default();
        Self {
            max_tool_calls: limits.max_tool_calls,
            max_failures: limits.max_failures,
            max_query_chars: limits.max_query_chars,
        }
    }
}

impl LimitsConfig {
    pub fn loop_limits(&self) -> LoopLimits {
        LoopLimits {
            max_tool_calls: self.max_tool_calls,
            max_failures: self.max_failures,
            max_query_chars: self.max_query_chars,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ToolsConfig {
    pub timeout_ms: u64,
    pub transient_retries: u32,
    pub retry_backoff_ms: u64,
    pub weather_base_url: String,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 10_000,
            transient_retries: 1,
            retry_backoff_ms: 200,
            weather_base_url: crate::tools::weather::OPEN_METEO_URL.to_string(),
        }
    }
}

impl ToolsConfig {
    pub fn executor_policy(&self) -> ExecutorPolicy {
        ExecutorPolicy {
            timeout: Duration::from_millis(self.timeout_ms),
            transient_retries: self.transient_retries,
            retry_backoff: Duration::from_millis(self.retry_backoff_ms),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RoutingConfig {
    pub peer_retries: u32,
    pub retry_backoff_ms: u64,
    pub max_hops: u32,
    pub session_retention_secs: u64,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            peer_retries: 1,
            retry_backoff_ms: 500,
            max_hops: 3,
            session_retention_secs: 300,
        }
    }
}

impl RoutingConfig {
    pub fn routing_policy(&self) -> RoutingPolicy {
        RoutingPolicy {
            peer_retries: self.peer_retries,
            retry_backoff: Duration::from_millis(self.retry_backoff_ms),
            max_hops: self.max_hops,
            session_retention: Duration::from_secs(self.session_retention_secs),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TransportConfig {
    pub connect_attempts: u32,
    pub backoff_initial_ms: u64,
    pub backoff_max_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_attempts: 3,
            backoff_initial_ms: 100,
            backoff_max_ms: 5_000,
        }
    }
}

impl TransportConfig {
    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy {
            attempts: self.connect_attempts,
            initial: Duration::from_millis(self.backoff_initial_ms),
            max: Duration::from_millis(self.backoff_max_ms),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PeerConfig {
    pub name: String,
    pub address: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub provider: Option<String>,
    pub api_key: String,
    pub base_url: Option<String>,
    pub model: String,
    pub temperature: f64,
    pub listen: String,
    pub agent: AgentConfig,
    pub limits: LimitsConfig,
    pub tools: ToolsConfig,
    pub routing: RoutingConfig,
    pub transport: TransportConfig,
    pub peers: Vec<PeerConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            provider: None,
            api_key: String::new(),
            base_url: None,
            model: "gpt-4o".to_string(),
            temperature: 0.2,
            listen: "localhost:10000".to_string(),
            agent: AgentConfig::default(),
            limits: LimitsConfig::default(),
            tools: ToolsConfig::default(),
            routing: RoutingConfig::default(),
            transport: TransportConfig::default(),
            peers: Vec::new(),
        }
    }
}

pub fn get_nimbus_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(NIMBUS_DIR)
}

pub fn get_config_path() -> PathBuf {
    get_nimbus_dir().join("config.toml")
}

pub fn ensure_nimbus_dir() -> Result<PathBuf> {
    let nimbus_dir = get_nimbus_dir();

    if !nimbus_dir.exists() {
        std::fs::create_dir_all(&nimbus_dir).with_context(|| {
            format!(
                "Failed to create nimbus directory at {}",
                nimbus_dir.display()
            )
        })?;
    }

    Ok(nimbus_dir)
}

impl Config {
    pub fn load_or_init() -> Result<Self> {
        if config_exists() {
            load_config()
        } else {
            Ok(Config::default())
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                anyhow::anyhow!(
                    "Config file not found at {}. Run 'nimbus onboard' to set up your configuration.",
                    path.display()
                )
            } else {
                anyhow::anyhow!("Failed to read config from {}: {}", path.display(), e)
            }
        })?;

        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).with_context(|| "Failed to serialize config to TOML")?;

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config to {}", path.display()))
    }

    pub fn provider_name(&self) -> &str {
        self.provider.as_deref().unwrap_or("openai")
    }
}

pub fn load_config() -> Result<Config> {
    Config::load_from(&get_config_path())
}

pub fn save_config(config: &Config) -> Result<()> {
    ensure_nimbus_dir()?;
    config.save_to(&get_config_path())
}

pub fn config_exists() -> bool {
    get_config_path().exists()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
provider = "gemini"
model = "gemini-2.5-flash"

[limits]
max_tool_calls = 3

[[peers]]
name = "traffic"
address = "localhost:10001"
capabilities = ["traffic", "roads"]
"#,
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.provider_name(), "gemini");
        assert_eq!(config.limits.max_tool_calls, 3);
        assert_eq!(config.limits.max_failures, 2);
        assert_eq!(config.routing.max_hops, 3);
        assert_eq!(config.listen, "localhost:10000");
        assert_eq!(config.peers[0].capabilities, vec!["traffic", "roads"]);
        assert_eq!(
            config.tools.executor_policy().timeout,
            Duration::from_secs(10)
        );
    }

    #[test]
    fn save_then_load_keeps_settings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut config = Config::default();
        config.provider = Some("ollama".into());
        config.routing.peer_retries = 4;
        config.peers.push(PeerConfig {
            name: "fallback".into(),
            address: "localhost:10002".into(),
            capabilities: vec!["*".into()],
        });

        config.save_to(&path).unwrap();
        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.provider_name(), "ollama");
        assert_eq!(loaded.routing.routing_policy().peer_retries, 4);
        assert_eq!(loaded.peers, config.peers);
    }

    #[test]
    fn missing_file_mentions_onboarding() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load_from(&dir.path().join("absent.toml")).unwrap_err();
        assert!(err.to_string().contains("nimbus onboard"));
    }
}
