//! Use cases
//!
//! Application-level operations that orchestrate domain logic.

pub mod adaptive_router;
pub mod call_tool;
pub mod invoke_provider;
