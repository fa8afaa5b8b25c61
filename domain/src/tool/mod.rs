//! Tool domain module
//!
//! Tools are what a gateway client invokes through `call_tool`. Each is
//! described by a [`ToolDefinition`]: the advertised [`ToolDescriptor`], how
//! it is fulfilled ([`ToolKind`]), and which model capabilities it needs.
//!
//! ```text
//! ┌──────────────┐    ┌──────────────┐    ┌──────────────┐
//! │ ToolSpec     │───▶│ Dispatch     │───▶│ Router       │
//! │ (registry)   │    │ (call_tool)  │    │ (provider)   │
//! └──────┬───────┘    └──────────────┘    └──────────────┘
//!        │
//!        ├─ aliases: "think" → "thinkdeep"
//!        └─ tools:   "thinkdeep" → ToolDefinition
//! ```
//!
//! The catalog contents are supplied by the infrastructure layer; this module
//! only holds the pure definitions.

pub mod entities;

pub use entities::{ToolDefinition, ToolDescriptor, ToolKind, ToolRequirements, ToolSpec};
