//! Heuristic characterization of a tool call for routing.

use crate::tool::ToolRequirements;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;

/// Requests with an estimate above this are treated as cost sensitive.
const COST_SENSITIVE_TOKENS: u64 = 50_000;

/// Requests with an estimate above this need a large-context model.
const LARGE_CONTEXT_TOKENS: u64 = 100_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestType {
    Utility,
    #[default]
    Chat,
    Reasoning,
    Analysis,
    CodeReview,
    Debugging,
    Generation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Low,
    #[default]
    Medium,
    High,
}

impl FromStr for Level {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Level::Low),
            "medium" | "normal" => Ok(Level::Medium),
            "high" | "urgent" => Ok(Level::High),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestCharacteristics {
    pub request_type: RequestType,
    /// 0.0 (trivial) to 1.0 (hardest).
    pub complexity: f64,
    pub token_estimate: u64,
    pub needs_vision: bool,
    pub needs_tools: bool,
    pub needs_thinking: bool,
    pub needs_large_context: bool,
    pub urgency: Level,
    pub cost_sensitivity: Level,
    pub latency_sensitivity: Level,
}

impl Default for RequestCharacteristics {
    fn default() -> Self {
        Self {
            request_type: RequestType::Chat,
            complexity: 0.5,
            token_estimate: 0,
            needs_vision: false,
            needs_tools: false,
            needs_thinking: false,
            needs_large_context: false,
            urgency: Level::Medium,
            cost_sensitivity: Level::Medium,
            latency_sensitivity: Level::Medium,
        }
    }
}

/// Roughly four characters per token.
pub fn estimate_tokens(value: &Value) -> u64 {
    let chars = match value {
        Value::Null => 0,
        Value::String(s) => s.len(),
        other => other.to_string().len(),
    };
    (chars as u64).div_ceil(4)
}

fn classify_name(tool_name: &str) -> (RequestType, f64) {
    let name = tool_name.to_ascii_lowercase();
    if name.contains("think") || name.contains("reason") || name.contains("plan") {
        (RequestType::Reasoning, 0.9)
    } else if name.contains("review") || name.contains("audit") || name.contains("secaudit") {
        (RequestType::CodeReview, 0.7)
    } else if name.contains("debug") || name.contains("trace") {
        (RequestType::Debugging, 0.7)
    } else if name.contains("analy") || name.contains("consensus") {
        (RequestType::Analysis, 0.8)
    } else if name.contains("gen") || name.contains("refactor") || name.contains("doc") {
        (RequestType::Generation, 0.6)
    } else if name == "echo" || name == "ping" || name == "version" || name == "listmodels" {
        (RequestType::Utility, 0.0)
    } else {
        (RequestType::Chat, 0.4)
    }
}

fn has_nonempty(args: &Value, keys: &[&str]) -> bool {
    keys.iter().any(|k| match args.get(k) {
        Some(Value::Array(a)) => !a.is_empty(),
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Null) | None => false,
        Some(_) => true,
    })
}

fn level_hint(args: &Value, key: &str) -> Option<Level> {
    args.get("routing")
        .and_then(|r| r.get(key))
        .or_else(|| args.get(key))
        .and_then(|v| v.as_str())
        .and_then(|s| s.parse().ok())
}

/// Derive routing characteristics from a tool name, its arguments and the
/// tool's declared requirements.
///
/// Explicit hints in the arguments (`urgency`, `cost_sensitivity`,
/// `latency_sensitivity`, either top-level or under `routing`) win over the
/// heuristics.
pub fn characterize(
    tool_name: &str,
    arguments: &Value,
    requirements: &ToolRequirements,
) -> RequestCharacteristics {
    let (request_type, base_complexity) = classify_name(tool_name);
    let token_estimate = estimate_tokens(arguments);

    let size_bonus = (token_estimate as f64 / 50_000.0).min(0.2);
    let thinking_hint = arguments
        .get("thinking_mode")
        .and_then(|v| v.as_str())
        .map(|m| matches!(m, "high" | "max"))
        .unwrap_or(false);
    let complexity = (base_complexity + size_bonus + if thinking_hint { 0.1 } else { 0.0 })
        .clamp(0.0, 1.0);

    let needs_vision = requirements.vision || has_nonempty(arguments, &["images", "image"]);
    let needs_tools = has_nonempty(arguments, &["tools"]);
    let needs_thinking = requirements.extended_thinking
        || thinking_hint
        || (request_type == RequestType::Reasoning && complexity >= 0.8);
    let needs_large_context =
        requirements.large_context || token_estimate > LARGE_CONTEXT_TOKENS;

    let default_latency = match request_type {
        RequestType::Utility | RequestType::Chat => Level::High,
        RequestType::Reasoning | RequestType::Analysis => Level::Low,
        _ => Level::Medium,
    };
    let default_cost = if token_estimate > COST_SENSITIVE_TOKENS {
        Level::High
    } else {
        Level::Medium
    };

    RequestCharacteristics {
        request_type,
        complexity,
        token_estimate,
        needs_vision,
        needs_tools,
        needs_thinking,
        needs_large_context,
        urgency: level_hint(arguments, "urgency").unwrap_or(Level::Medium),
        cost_sensitivity: level_hint(arguments, "cost_sensitivity").unwrap_or(default_cost),
        latency_sensitivity: level_hint(arguments, "latency_sensitivity")
            .unwrap_or(default_latency),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn echo_is_trivial_utility() {
        let c = characterize("echo", &json!({"x": 1}), &ToolRequirements::default());
        assert_eq!(c.request_type, RequestType::Utility);
        assert_eq!(c.complexity, 0.0);
        assert_eq!(c.latency_sensitivity, Level::High);
        assert!(!c.needs_thinking);
    }

    #[test]
    fn thinkdeep_needs_thinking() {
        let c = characterize(
            "thinkdeep",
            &json!({"prompt": "why?"}),
            &ToolRequirements::default(),
        );
        assert_eq!(c.request_type, RequestType::Reasoning);
        assert!(c.needs_thinking);
        assert_eq!(c.latency_sensitivity, Level::Low);
    }

    #[test]
    fn images_imply_vision() {
        let c = characterize(
            "chat",
            &json!({"prompt": "look", "images": ["a.png"]}),
            &ToolRequirements::default(),
        );
        assert!(c.needs_vision);
        let c = characterize(
            "chat",
            &json!({"prompt": "look", "images": []}),
            &ToolRequirements::default(),
        );
        assert!(!c.needs_vision);
    }

    #[test]
    fn large_arguments_are_cost_sensitive_and_need_context() {
        let big = "x".repeat(500_000);
        let c = characterize("chat", &json!({ "prompt": big }), &ToolRequirements::default());
        assert!(c.token_estimate > 100_000);
        assert!(c.needs_large_context);
        assert_eq!(c.cost_sensitivity, Level::High);
        assert!(c.complexity > 0.4);
    }

    #[test]
    fn explicit_hints_override_heuristics() {
        let c = characterize(
            "analyze",
            &json!({"routing": {"latency_sensitivity": "high"}, "urgency": "urgent"}),
            &ToolRequirements::default(),
        );
        assert_eq!(c.latency_sensitivity, Level::High);
        assert_eq!(c.urgency, Level::High);
    }

    #[test]
    fn declared_requirements_are_honoured() {
        let req = ToolRequirements {
            extended_thinking: true,
            large_context: true,
            vision: false,
        };
        let c = characterize("chat", &Value::Null, &req);
        assert!(c.needs_thinking);
        assert!(c.needs_large_context);
        assert_eq!(c.token_estimate, 0);
    }

    #[test]
    fn token_estimate_rounds_up() {
        assert_eq!(estimate_tokens(&json!("abcde")), 2);
        assert_eq!(estimate_tokens(&Value::Null), 0);
    }
}
