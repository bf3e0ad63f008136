use crate::error::{AgentError, Result};
use crate::mcp::SchemaValidator;
use crate::traits::{Tool, ToolSpec};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A registered tool: identity, compiled schemas and the invocation handle.
pub struct ToolDescriptor {
    id: String,
    description: String,
    tags: Vec<String>,
    examples: Vec<String>,
    input: SchemaValidator,
    output: SchemaValidator,
    handle: Arc<dyn Tool>,
}

impl ToolDescriptor {
    pub fn from_tool(tool: Arc<dyn Tool>) -> Result<Self> {
        let id = tool.name().to_string();
        let input = SchemaValidator::compile(tool.input_schema()).map_err(|detail| {
            AgentError::SchemaValidation {
                tool: id.clone(),
                detail: format!("input schema does not compile: {detail}"),
            }
        })?;
        let output = SchemaValidator::compile(tool.output_schema()).map_err(|detail| {
            AgentError::SchemaValidation {
                tool: id.clone(),
                detail: format!("output schema does not compile: {detail}"),
            }
        })?;

        Ok(Self {
            description: tool.description().to_string(),
            tags: tool.tags(),
            examples: tool.examples(),
            id,
            input,
            output,
            handle: tool,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    pub fn examples(&self) -> &[String] {
        &self.examples
    }

    pub fn input_schema(&self) -> &Value {
        self.input.schema()
    }

    pub fn output_schema(&self) -> &Value {
        self.output.schema()
    }

    pub fn handle(&self) -> Arc<dyn Tool> {
        self.handle.clone()
    }

    pub fn validate_input(&self, arguments: &Value) -> Result<()> {
        self.input
            .validate(arguments)
            .map_err(|detail| AgentError::SchemaValidation {
                tool: self.id.clone(),
                detail,
            })
    }

    pub fn validate_output(&self, payload: &Value) -> std::result::Result<(), String> {
        self.output.validate(payload)
    }

    pub fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.id.clone(),
            description: self.description.clone(),
            parameters_schema: self.input.schema().clone(),
        }
    }
}

impl fmt::Debug for ToolDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolDescriptor")
            .field("id", &self.id)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

/// Collects tools during startup. `seal` freezes the set.
#[derive(Debug, Default)]
pub struct ToolRegistryBuilder {
    tools: Vec<Arc<ToolDescriptor>>,
    index: HashMap<String, usize>,
}

impl ToolRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, descriptor: ToolDescriptor) -> Result<&mut Self> {
        if self.index.contains_key(descriptor.id()) {
            return Err(AgentError::DuplicateTool(descriptor.id().to_string()));
        }
        tracing::debug!(tool_id = %descriptor.id(), "tool registered");
        self.index
            .insert(descriptor.id().to_string(), self.tools.len());
        self.tools.push(Arc::new(descriptor));
        Ok(self)
    }

    pub fn register_tool(&mut self, tool: Arc<dyn Tool>) -> Result<&mut Self> {
        self.register(ToolDescriptor::from_tool(tool)?)
    }

    pub fn seal(self) -> ToolRegistry {
        tracing::info!(count = self.tools.len(), "tool registry sealed");
        ToolRegistry {
            tools: self.tools,
            index: self.index,
        }
    }
}

/// Immutable tool set shared by every session after startup.
#[derive(Debug, Default)]
pub struct ToolRegistry {
    tools: Vec<Arc<ToolDescriptor>>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn builder() -> ToolRegistryBuilder {
        ToolRegistryBuilder::new()
    }

    pub fn lookup(&self, id: &str) -> Result<Arc<ToolDescriptor>> {
        self.index
            .get(id)
            .map(|&i| self.tools[i].clone())
            .ok_or_else(|| AgentError::UnknownTool(id.to_string()))
    }

    /// Descriptors in registration order. Each call starts a fresh pass.
    pub fn list(&self) -> impl Iterator<Item = &ToolDescriptor> + '_ {
        self.tools.iter().map(|d| d.as_ref())
    }

    pub fn specs(&self) -> Vec<ToolSpec> {
        self.list().map(ToolDescriptor::spec).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::ToolError;
    use async_trait::async_trait;
    use serde_json::json;

    struct NamedTool {
        name: &'static str,
        schema: Value,
    }

    impl NamedTool {
        fn new(name: &'static str) -> Arc<dyn Tool> {
            Arc::new(Self {
                name,
                schema: json!({"type": "object"}),
            })
        }
    }

    #[async_trait]
    impl Tool for NamedTool {
        fn name(&self) -> &str {
            self.name
        }

        fn description(&self) -> &str {
            "test tool"
        }

        fn input_schema(&self) -> Value {
            self.schema.clone()
        }

        async fn invoke(&self, args: Value) -> std::result::Result<Value, ToolError> {
            Ok(args)
        }
    }

    #[test]
    fn lookup_returns_the_registered_descriptor() {
        let mut builder = ToolRegistry::builder();
        builder.register_tool(NamedTool::new("temp_lookup")).unwrap();
        builder.register_tool(NamedTool::new("wind_lookup")).unwrap();
        let registry = builder.seal();

        let first = registry.lookup("temp_lookup").unwrap();
        let second = registry.lookup("temp_lookup").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.id(), "temp_lookup");
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn duplicate_registration_fails() {
        let mut builder = ToolRegistry::builder();
        builder.register_tool(NamedTool::new("echo")).unwrap();
        let err = builder.register_tool(NamedTool::new("echo")).unwrap_err();
        assert_eq!(err, AgentError::DuplicateTool("echo".into()));
        assert_eq!(builder.seal().len(), 1);
    }

    #[test]
    fn unknown_lookup_fails() {
        let registry = ToolRegistry::builder().seal();
        assert!(registry.is_empty());
        assert_eq!(
            registry.lookup("missing").unwrap_err(),
            AgentError::UnknownTool("missing".into())
        );
    }

    #[test]
    fn list_is_ordered_and_restartable() {
        let mut builder = ToolRegistry::builder();
        for name in ["a", "b", "c"] {
            builder.register_tool(NamedTool::new(name)).unwrap();
        }
        let registry = builder.seal();

        let first: Vec<&str> = registry.list().map(|d| d.id()).collect();
        let second: Vec<&str> = registry.list().map(|d| d.id()).collect();
        assert_eq!(first, vec!["a", "b", "c"]);
        assert_eq!(first, second);
        assert_eq!(registry.specs()[1].name, "b");
    }

    #[test]
    fn rejects_schema_that_does_not_compile() {
        let tool: Arc<dyn Tool> = Arc::new(NamedTool {
            name: "broken",
            schema: json!({"type": 12}),
        });
        let err = ToolDescriptor::from_tool(tool).unwrap_err();
        assert!(matches!(err, AgentError::SchemaValidation { .. }));
    }
}
