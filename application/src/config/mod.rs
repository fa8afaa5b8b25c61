//! Application-level configuration.
//!
//! Parameter types that control how use cases behave:
//!
//! - [`DispatchParams`]: call_tool acknowledgement, progress and inline limits
//! - [`RouterParams`]: strategy and per-provider circuit thresholds
//! - [`RetryPolicy`]: provider retry with exponential backoff

pub mod dispatch_params;
pub mod retry;
pub mod router_params;

pub use dispatch_params::DispatchParams;
pub use retry::RetryPolicy;
pub use router_params::RouterParams;
