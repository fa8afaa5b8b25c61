//! Application layer for toolbridge
//!
//! This crate contains use cases, port definitions, and application configuration.
//! It depends only on the domain layer.

pub mod circuit;
pub mod config;
pub mod ports;
pub mod use_cases;

// Re-export commonly used types
pub use circuit::SharedCircuitBreaker;
pub use config::{DispatchParams, RetryPolicy, RouterParams};
pub use ports::{
    audit_logger::{AuditEvent, AuditLogger, NoAuditLogger},
    message_bus::{BusError, BusStatus, DisabledMessageBus, MessageBusPort},
    provider_client::{
        GenerateParams, GenerateRequest, ProviderClient, ProviderError, ProviderResponse,
    },
    tool_catalog::ToolCatalog,
};
pub use use_cases::adaptive_router::{AdaptiveRouter, ProbeGuard, RouterError};
pub use use_cases::call_tool::{CallToolUseCase, DispatchError};
pub use use_cases::invoke_provider::{InvokeError, Invocation, invoke_with_retry};
