use crate::error::Result;
use crate::mcp::{ToolDescriptor, ToolRegistry};
use crate::traits::ToolError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::task::AbortOnDropHandle;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy)]
pub struct ExecutorPolicy {
    pub timeout: Duration,
    pub transient_retries: u32,
    pub retry_backoff: Duration,
}

impl Default for ExecutorPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            transient_retries: 1,
            retry_backoff: Duration::from_millis(200),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    TransientTimeout,
    TransientTransport,
    ToolFault,
    InvalidOutput,
    /// The call never reached the tool (unknown id or invalid arguments).
    Rejected,
}

impl FailureKind {
    pub fn is_transient(self) -> bool {
        matches!(self, Self::TransientTimeout | Self::TransientTransport)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolInvocationResult {
    Success { payload: Value },
    Failure { kind: FailureKind, detail: String },
}

impl ToolInvocationResult {
    pub fn success(payload: Value) -> Self {
        Self::Success { payload }
    }

    pub fn failure(kind: FailureKind, detail: impl Into<String>) -> Self {
        Self::Failure {
            kind,
            detail: detail.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn payload(&self) -> Option<&Value> {
        match self {
            Self::Success { payload } => Some(payload),
            Self::Failure { .. } => None,
        }
    }
}

/// Validates, invokes and normalises tool calls.
///
/// Only lookup and input validation are reported as `Err`; anything that
/// goes wrong inside the tool comes back as a `Failure` result.
pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    policy: ExecutorPolicy,
}

impl ToolExecutor {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self {
            registry,
            policy: ExecutorPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: ExecutorPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub async fn execute(&self, tool_id: &str, arguments: &Value) -> Result<ToolInvocationResult> {
        let descriptor = self.registry.lookup(tool_id)?;
        descriptor.validate_input(arguments)?;

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self.invoke_once(&descriptor, arguments.clone()).await {
                Ok(payload) => {
                    debug!(tool_id, attempt, "tool succeeded");
                    return Ok(match descriptor.validate_output(&payload) {
                        Ok(()) => ToolInvocationResult::success(payload),
                        Err(detail) => {
                            warn!(tool_id, %detail, "tool output violates its schema");
                            ToolInvocationResult::failure(FailureKind::InvalidOutput, detail)
                        }
                    });
                }
                Err((kind, detail)) if kind.is_transient() && attempt <= self.policy.transient_retries => {
                    warn!(tool_id, attempt, ?kind, %detail, "transient tool failure, retrying");
                    tokio::time::sleep(self.policy.retry_backoff).await;
                }
                Err((kind, detail)) => {
                    warn!(tool_id, attempt, ?kind, %detail, "tool failed");
                    return Ok(ToolInvocationResult::failure(kind, detail));
                }
            }
        }
    }

    async fn invoke_once(
        &self,
        descriptor: &ToolDescriptor,
        args: Value,
    ) -> std::result::Result<Value, (FailureKind, String)> {
        let tool = descriptor.handle();
        let task = AbortOnDropHandle::new(tokio::spawn(async move { tool.invoke(args).await }));

        match tokio::time::timeout(self.policy.timeout, task).await {
            Err(_) => Err((
                FailureKind::TransientTimeout,
                format!("timed out after {:?}", self.policy.timeout),
            )),
            Ok(Err(join_error)) if join_error.is_panic() => {
                Err((FailureKind::ToolFault, "tool panicked".to_string()))
            }
            Ok(Err(_)) => Err((FailureKind::ToolFault, "tool task aborted".to_string())),
            Ok(Ok(Err(ToolError::Transient(detail)))) => {
                Err((FailureKind::TransientTransport, detail))
            }
            Ok(Ok(Err(ToolError::Failed(detail)))) => Err((FailureKind::ToolFault, detail)),
            Ok(Ok(Ok(payload))) => Ok(payload),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AgentError;
    use crate::traits::Tool;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedTool {
        name: &'static str,
        calls: AtomicUsize,
        behaviour: fn(usize) -> Behaviour,
    }

    enum Behaviour {
        Reply(Value),
        Transient,
        Fail,
        Hang,
        Panic,
    }

    impl ScriptedTool {
        fn new(name: &'static str, behaviour: fn(usize) -> Behaviour) -> Arc<Self> {
            Arc::new(Self {
                name,
                calls: AtomicUsize::new(0),
                behaviour,
            })
        }
    }

    #[async_trait]
    impl Tool for ScriptedTool {
        fn name(&self) -> &str {
            self.name
        }

        fn description(&self) -> &str {
            "scripted"
        }

        fn input_schema(&self) -> Value {
            json!({
                "type": "object",
                "properties": { "city": { "type": "string" } },
                "required": ["city"]
            })
        }

        fn output_schema(&self) -> Value {
            json!({
                "type": "object",
                "properties": { "celsius": { "type": "number" } },
                "required": ["celsius"]
            })
        }

        async fn invoke(&self, _args: Value) -> std::result::Result<Value, ToolError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            match (self.behaviour)(call) {
                Behaviour::Reply(v) => Ok(v),
                Behaviour::Transient => Err(ToolError::Transient("connection reset".into())),
                Behaviour::Fail => Err(ToolError::Failed("city not supported".into())),
                Behaviour::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(json!({"celsius": 0}))
                }
                Behaviour::Panic => panic!("boom"),
            }
        }
    }

    fn executor_for(tool: Arc<ScriptedTool>) -> ToolExecutor {
        let mut builder = ToolRegistry::builder();
        builder.register_tool(tool).unwrap();
        ToolExecutor::new(Arc::new(builder.seal())).with_policy(ExecutorPolicy {
            timeout: Duration::from_secs(2),
            transient_retries: 1,
            retry_backoff: Duration::from_millis(50),
        })
    }

    #[tokio::test]
    async fn success_passes_payload_through() {
        let tool = ScriptedTool::new("temp_lookup", |_| Behaviour::Reply(json!({"celsius": 28})));
        let executor = executor_for(tool);
        let result = executor
            .execute("temp_lookup", &json!({"city": "Pune"}))
            .await
            .unwrap();
        assert_eq!(result.payload(), Some(&json!({"celsius": 28})));
    }

    #[tokio::test]
    async fn schema_mismatch_is_an_error_and_tool_is_not_called() {
        let tool = ScriptedTool::new("temp_lookup", |_| Behaviour::Reply(json!({"celsius": 1})));
        let executor = executor_for(tool.clone());
        let err = executor
            .execute("temp_lookup", &json!({"town": "Pune"}))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::SchemaValidation { .. }));
        assert_eq!(tool.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unknown_tool_is_an_error() {
        let tool = ScriptedTool::new("temp_lookup", |_| Behaviour::Fail);
        let executor = executor_for(tool);
        let err = executor.execute("nope", &json!({})).await.unwrap_err();
        assert_eq!(err, AgentError::UnknownTool("nope".into()));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_is_retried_once_then_reported() {
        let tool = ScriptedTool::new("temp_lookup", |_| Behaviour::Hang);
        let executor = executor_for(tool.clone());
        let result = executor
            .execute("temp_lookup", &json!({"city": "Pune"}))
            .await
            .unwrap();
        assert!(matches!(
            result,
            ToolInvocationResult::Failure {
                kind: FailureKind::TransientTimeout,
                ..
            }
        ));
        assert_eq!(tool.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failure_recovers_on_retry() {
        let tool = ScriptedTool::new("temp_lookup", |call| {
            if call == 0 {
                Behaviour::Transient
            } else {
                Behaviour::Reply(json!({"celsius": 21.5}))
            }
        });
        let executor = executor_for(tool.clone());
        let result = executor
            .execute("temp_lookup", &json!({"city": "Paris"}))
            .await
            .unwrap();
        assert!(result.is_success());
        assert_eq!(tool.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn logic_failures_are_not_retried() {
        let tool = ScriptedTool::new("temp_lookup", |_| Behaviour::Fail);
        let executor = executor_for(tool.clone());
        let result = executor
            .execute("temp_lookup", &json!({"city": "Atlantis"}))
            .await
            .unwrap();
        assert_eq!(
            result,
            ToolInvocationResult::failure(FailureKind::ToolFault, "city not supported")
        );
        assert_eq!(tool.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn panics_are_captured_as_failures() {
        let tool = ScriptedTool::new("temp_lookup", |_| Behaviour::Panic);
        let executor = executor_for(tool);
        let result = executor
            .execute("temp_lookup", &json!({"city": "Berlin"}))
            .await
            .unwrap();
        assert!(matches!(
            result,
            ToolInvocationResult::Failure {
                kind: FailureKind::ToolFault,
                ..
            }
        ));
    }

    #[test]
    fn release_profile_keeps_unwinding_for_panic_capture() {
        let manifest: toml::Value = toml::from_str(include_str!("../../../Cargo.toml")).unwrap();
        let strategy = manifest
            .get("profile")
            .and_then(|p| p.get("release"))
            .and_then(|r| r.get("panic"))
            .and_then(|p| p.as_str());
        assert_ne!(strategy, Some("abort"));
    }

    #[tokio::test]
    async fn output_is_checked_against_output_schema() {
        let tool = ScriptedTool::new("temp_lookup", |_| Behaviour::Reply(json!({"kelvin": 300})));
        let executor = executor_for(tool);
        let result = executor
            .execute("temp_lookup", &json!({"city": "Tokyo"}))
            .await
            .unwrap();
        assert!(matches!(
            result,
            ToolInvocationResult::Failure {
                kind: FailureKind::InvalidOutput,
                ..
            }
        ));
    }
}
