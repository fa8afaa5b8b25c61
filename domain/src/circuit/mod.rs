//! Failure isolation.

pub mod breaker;

pub use breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitSnapshot, CircuitState, Transition};
