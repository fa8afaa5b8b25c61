//! Provider profiles and per-provider performance metrics.
//!
//! These types are provider-neutral; the HTTP clients that actually talk to
//! a backend live in the infrastructure layer.

pub mod metrics;
pub mod profile;

pub use metrics::{CallOutcome, DEFAULT_EMA_ALPHA, ProviderMetrics, ProviderMetricsSnapshot};
pub use profile::{ModelProfile, ProviderProfile};
