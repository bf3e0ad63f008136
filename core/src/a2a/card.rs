use crate::mcp::{ToolDescriptor, ToolRegistry};
use serde::{Deserialize, Serialize};

/// Self-description an agent publishes to its peers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentCard {
    pub name: String,
    pub description: String,
    pub url: String,
    pub version: String,
    pub default_input_modes: Vec<String>,
    pub default_output_modes: Vec<String>,
    pub capabilities: AgentCapabilities,
    pub skills: Vec<AgentSkill>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentCapabilities {
    pub streaming: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSkill {
    pub id: String,
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub examples: Vec<String>,
}

impl AgentSkill {
    pub fn from_descriptor(descriptor: &ToolDescriptor) -> Self {
        Self {
            id: descriptor.id().to_string(),
            name: descriptor.id().replace('_', " "),
            description: descriptor.description().to_string(),
            tags: descriptor.tags().to_vec(),
            examples: descriptor.examples().to_vec(),
        }
    }
}

impl AgentCard {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        url: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            url: url.into(),
            version: version.into(),
            default_input_modes: vec!["text".to_string()],
            default_output_modes: vec!["text".to_string()],
            capabilities: AgentCapabilities { streaming: true },
            skills: vec![],
        }
    }

    /// Publishes one skill per registered tool.
    pub fn with_registry(mut self, registry: &ToolRegistry) -> Self {
        self.skills
            .extend(registry.list().map(AgentSkill::from_descriptor));
        self
    }

    pub fn with_skill(mut self, skill: AgentSkill) -> Self {
        self.skills.push(skill);
        self
    }
}
