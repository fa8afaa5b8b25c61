//! Domain layer for toolbridge
//!
//! Pure types with no I/O: the daemon wire protocol, the circuit breaker
//! state machine, provider metrics and profiles, routing policy, message
//! bus records and tool definitions.
//!
//! # Core Concepts
//!
//! ## Dispatch frames
//!
//! Newline-delimited JSON objects discriminated by `op`. Parsed once at the
//! transport boundary into [`ClientFrame`] / [`ServerFrame`].
//!
//! ## Circuit breaking
//!
//! One [`CircuitBreaker`] implementation, instantiated per provider by the
//! router and once by the message bus.
//!
//! ## Adaptive routing
//!
//! [`characterize`] turns a tool call into [`RequestCharacteristics`];
//! [`RoutingStrategy`] scores candidate providers from their
//! [`ProviderMetrics`].

pub mod bus;
pub mod circuit;
pub mod core;
pub mod protocol;
pub mod providers;
pub mod routing;
pub mod tool;
pub mod util;

// Re-export commonly used types
pub use bus::{BusReference, CompressionKind, MessageBusRecord, RecordStatus};
pub use circuit::{CircuitBreaker, CircuitBreakerConfig, CircuitSnapshot, CircuitState, Transition};
pub use core::error::{DomainError, ErrorKind};
pub use protocol::{CallToolResult, ClientFrame, CloseCode, FrameError, ServerFrame};
pub use providers::{
    CallOutcome, ModelProfile, ProviderMetrics, ProviderMetricsSnapshot, ProviderProfile,
};
pub use routing::{
    Level, RequestCharacteristics, RequestType, RoutingDecision, RoutingStrategy, characterize,
};
pub use tool::{ToolDefinition, ToolDescriptor, ToolKind, ToolRequirements, ToolSpec};
