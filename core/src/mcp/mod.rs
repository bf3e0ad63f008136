//! Tool registry and execution: the uniform capability layer the agent core
//! dispatches through.

pub mod executor;
pub mod registry;
pub mod schema;

pub use executor::{ExecutorPolicy, FailureKind, ToolExecutor, ToolInvocationResult};
pub use registry::{ToolDescriptor, ToolRegistry, ToolRegistryBuilder};
pub use schema::SchemaValidator;
