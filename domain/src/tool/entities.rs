//! Tool domain entities

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// What `list_tools_res` advertises for one tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

/// How a tool is fulfilled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolKind {
    /// Answered inside the daemon; no provider is consulted.
    Local,
    /// Fulfilled by a routed provider call.
    Llm { system_prompt: String },
}

/// Capabilities a tool asks of the model that serves it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolRequirements {
    pub extended_thinking: bool,
    pub large_context: bool,
    pub vision: bool,
}

/// Definition of a tool the daemon can dispatch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub descriptor: ToolDescriptor,
    pub kind: ToolKind,
    #[serde(default)]
    pub requirements: ToolRequirements,
    /// Expected run time in seconds, advertised through `call_tool_ack`.
    #[serde(default)]
    pub timeout_hint_secs: Option<u64>,
}

impl ToolDefinition {
    pub fn local(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            descriptor: ToolDescriptor {
                name: name.into(),
                description: description.into(),
                input_schema: serde_json::json!({"type": "object"}),
            },
            kind: ToolKind::Local,
            requirements: ToolRequirements::default(),
            timeout_hint_secs: None,
        }
    }

    pub fn llm(
        name: impl Into<String>,
        description: impl Into<String>,
        system_prompt: impl Into<String>,
    ) -> Self {
        Self {
            kind: ToolKind::Llm {
                system_prompt: system_prompt.into(),
            },
            ..Self::local(name, description)
        }
    }

    pub fn with_schema(mut self, schema: Value) -> Self {
        self.descriptor.input_schema = schema;
        self
    }

    pub fn with_requirements(mut self, requirements: ToolRequirements) -> Self {
        self.requirements = requirements;
        self
    }

    pub fn with_timeout_hint(mut self, secs: u64) -> Self {
        self.timeout_hint_secs = Some(secs);
        self
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn is_local(&self) -> bool {
        matches!(self.kind, ToolKind::Local)
    }
}

/// Registry of dispatchable tools
#[derive(Debug, Clone, Default)]
pub struct ToolSpec {
    tools: HashMap<String, ToolDefinition>,
    /// Registration order, so listings are stable.
    order: Vec<String>,
    /// Alias → canonical name mapping (e.g. "think" → "thinkdeep")
    aliases: HashMap<String, String>,
}

impl ToolSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, tool: ToolDefinition) -> Self {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), tool).is_none() {
            self.order.push(name);
        }
        self
    }

    pub fn register_alias(mut self, alias: impl Into<String>, canonical: impl Into<String>) -> Self {
        self.aliases.insert(alias.into(), canonical.into());
        self
    }

    /// Resolve any name (canonical or alias) to the canonical name.
    pub fn resolve<'a>(&'a self, name: &'a str) -> Option<&'a str> {
        if self.tools.contains_key(name) {
            return Some(name);
        }
        self.aliases
            .get(name)
            .map(|s| s.as_str())
            .filter(|canonical| self.tools.contains_key(*canonical))
    }

    pub fn get(&self, name: &str) -> Option<&ToolDefinition> {
        self.resolve(name).and_then(|canonical| self.tools.get(canonical))
    }

    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|t| t.descriptor.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
