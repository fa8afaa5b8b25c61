//! Tool catalog port
//!
//! The set of tools a daemon advertises, plus execution of the ones answered
//! locally without a provider.

use serde_json::Value;
use toolbridge_domain::{DomainError, ToolSpec};

pub trait ToolCatalog: Send + Sync {
    fn spec(&self) -> &ToolSpec;

    /// Run a [`ToolKind::Local`](toolbridge_domain::ToolKind::Local) tool.
    fn run_local(&self, name: &str, arguments: &Value) -> Result<Vec<Value>, DomainError>;

    /// Build the user prompt for an LLM-backed tool from its arguments.
    fn build_prompt(&self, name: &str, arguments: &Value) -> Result<String, DomainError>;
}
