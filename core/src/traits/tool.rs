use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Error raised by a tool implementation.
///
/// `Transient` marks faults worth one more attempt (network timeouts, 5xx
/// responses). Everything else is a logic failure and is reported as-is.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ToolError {
    #[error("Transient failure: {0}")]
    Transient(String),
    #[error("{0}")]
    Failed(String),
}

impl ToolError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

impl From<anyhow::Error> for ToolError {
    fn from(e: anyhow::Error) -> Self {
        Self::Failed(e.to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters_schema: Value,
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn input_schema(&self) -> Value;

    /// Schema the success payload must satisfy. The default accepts any value.
    fn output_schema(&self) -> Value {
        serde_json::json!({})
    }

    /// Keywords published with the tool's skill on the agent card.
    fn tags(&self) -> Vec<String> {
        vec![]
    }

    /// Sample queries this tool helps answer.
    fn examples(&self) -> Vec<String> {
        vec![]
    }

    async fn invoke(&self, args: Value) -> Result<Value, ToolError>;

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters_schema: self.input_schema(),
        }
    }
}
