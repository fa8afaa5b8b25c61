//! Builtin tool catalog.
//!
//! | Tool | Kind | Notes |
//! |------|------|-------|
//! | `echo` | local | Returns its arguments; never touches a provider |
//! | `chat` | LLM | General prompt |
//! | `thinkdeep` | LLM | Requests extended thinking |
//! | `analyze` | LLM | Requests a large-context model |

use serde_json::{Value, json};
use toolbridge_application::ToolCatalog;
use toolbridge_domain::{DomainError, ToolDefinition, ToolRequirements, ToolSpec};

const CHAT_SYSTEM_PROMPT: &str =
    "You are a helpful senior engineer. Answer directly and concisely.";
const THINKDEEP_SYSTEM_PROMPT: &str = "You are a careful reasoner. Work through the problem step \
     by step, challenge your own assumptions, then state a clear conclusion.";
const ANALYZE_SYSTEM_PROMPT: &str = "You are a code and document analyst. Read all supplied \
     material, then report structure, risks and concrete recommendations.";

fn prompt_schema(extra: Value) -> Value {
    let mut properties = json!({
        "prompt": {"type": "string", "description": "What to ask"},
        "files": {
            "type": "array",
            "description": "Inline material: strings, or {name, content} objects",
            "items": {}
        }
    });
    if let (Some(base), Some(extra)) = (properties.as_object_mut(), extra.as_object()) {
        for (k, v) in extra {
            base.insert(k.clone(), v.clone());
        }
    }
    json!({"type": "object", "properties": properties, "required": ["prompt"]})
}

pub fn echo_definition() -> ToolDefinition {
    ToolDefinition::local("echo", "Return the arguments unchanged (connectivity check)")
}

pub fn chat_definition() -> ToolDefinition {
    ToolDefinition::llm("chat", "Ask a general question", CHAT_SYSTEM_PROMPT)
        .with_schema(prompt_schema(json!({})))
}

pub fn thinkdeep_definition() -> ToolDefinition {
    ToolDefinition::llm(
        "thinkdeep",
        "Extended reasoning on a hard problem",
        THINKDEEP_SYSTEM_PROMPT,
    )
    .with_schema(prompt_schema(json!({
        "thinking_mode": {"type": "string", "enum": ["low", "medium", "high", "max"]}
    })))
    .with_requirements(ToolRequirements {
        extended_thinking: true,
        ..Default::default()
    })
    .with_timeout_hint(600)
}

pub fn analyze_definition() -> ToolDefinition {
    ToolDefinition::llm(
        "analyze",
        "Analyze large code or documents",
        ANALYZE_SYSTEM_PROMPT,
    )
    .with_schema(prompt_schema(json!({
        "focus": {"type": "string", "description": "Aspect to concentrate on"}
    })))
    .with_requirements(ToolRequirements {
        large_context: true,
        ..Default::default()
    })
    .with_timeout_hint(600)
}

/// The tools every daemon serves.
pub struct BuiltinToolCatalog {
    spec: ToolSpec,
}

impl BuiltinToolCatalog {
    pub fn new() -> Self {
        let spec = ToolSpec::new()
            .register(echo_definition())
            .register(chat_definition())
            .register(thinkdeep_definition())
            .register(analyze_definition())
            .register_alias("ping", "echo")
            .register_alias("ask", "chat")
            .register_alias("think", "thinkdeep")
            .register_alias("review", "analyze");
        Self { spec }
    }
}

impl Default for BuiltinToolCatalog {
    fn default() -> Self {
        Self::new()
    }
}

fn render_files(files: &[Value]) -> String {
    let mut out = String::new();
    for (i, file) in files.iter().enumerate() {
        let (label, content) = match file {
            Value::String(s) => (format!("file {}", i + 1), s.as_str()),
            Value::Object(obj) => {
                let label = obj
                    .get("name")
                    .or_else(|| obj.get("path"))
                    .and_then(|v| v.as_str())
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("file {}", i + 1));
                let content = obj.get("content").and_then(|v| v.as_str()).unwrap_or("");
                (label, content)
            }
            _ => continue,
        };
        out.push_str(&format!("\n\n--- {} ---\n{}", label, content));
    }
    out
}

impl ToolCatalog for BuiltinToolCatalog {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    fn run_local(&self, name: &str, arguments: &Value) -> Result<Vec<Value>, DomainError> {
        match self.spec.resolve(name) {
            Some("echo") => Ok(vec![arguments.clone()]),
            _ => Err(DomainError::UnknownTool(name.to_string())),
        }
    }

    fn build_prompt(&self, name: &str, arguments: &Value) -> Result<String, DomainError> {
        let canonical = self
            .spec
            .resolve(name)
            .ok_or_else(|| DomainError::UnknownTool(name.to_string()))?;

        let prompt = arguments
            .get("prompt")
            .or_else(|| arguments.get("content"))
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                DomainError::InvalidArguments(format!("'{}' requires a non-empty 'prompt'", canonical))
            })?;

        let mut text = String::new();
        if canonical == "analyze"
            && let Some(focus) = arguments.get("focus").and_then(|v| v.as_str())
        {
            text.push_str(&format!("Focus: {}\n\n", focus));
        }
        text.push_str(prompt);
        if let Some(files) = arguments.get("files").and_then(|v| v.as_array()) {
            text.push_str(&render_files(files));
        }
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lists_builtin_tools_in_order() {
        let catalog = BuiltinToolCatalog::new();
        let names: Vec<String> = catalog
            .spec()
            .descriptors()
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(names, vec!["echo", "chat", "thinkdeep", "analyze"]);
    }

    #[test]
    fn echo_returns_arguments() {
        let catalog = BuiltinToolCatalog::new();
        let out = catalog.run_local("ping", &json!({"x": 1})).unwrap();
        assert_eq!(out, vec![json!({"x": 1})]);
        assert!(catalog.run_local("chat", &json!({})).is_err());
    }

    #[test]
    fn requirements_follow_tool() {
        let catalog = BuiltinToolCatalog::new();
        assert!(catalog.spec().get("think").unwrap().requirements.extended_thinking);
        assert!(catalog.spec().get("analyze").unwrap().requirements.large_context);
        assert!(catalog.spec().get("echo").unwrap().is_local());
    }

    #[test]
    fn prompt_includes_files_and_focus() {
        let catalog = BuiltinToolCatalog::new();
        let prompt = catalog
            .build_prompt(
                "analyze",
                &json!({
                    "prompt": "find bugs",
                    "focus": "error handling",
                    "files": ["fn a() {}", {"name": "b.rs", "content": "fn b() {}"}]
                }),
            )
            .unwrap();
        assert!(prompt.starts_with("Focus: error handling"));
        assert!(prompt.contains("find bugs"));
        assert!(prompt.contains("--- file 1 ---\nfn a() {}"));
        assert!(prompt.contains("--- b.rs ---\nfn b() {}"));
    }

    #[test]
    fn missing_prompt_is_invalid() {
        let catalog = BuiltinToolCatalog::new();
        let err = catalog.build_prompt("chat", &json!({"prompt": "  "})).unwrap_err();
        assert!(matches!(err, DomainError::InvalidArguments(_)));
        assert!(catalog.build_prompt("ask", &json!({"content": "hi"})).is_ok());
    }
}
